// coroio
//
// The software is released under the MIT license. see LICENSE.txt

use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error;

type Listener<T> = Box<dyn FnOnce(io::Result<T>) + Send>;

struct State<T> {
    outcome: Option<io::Result<T>>,
    listener: Option<Listener<T>>,
    settled: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    condvar: Condvar,
}

impl<T: Send + 'static> Shared<T> {
    fn settle(&self, res: io::Result<T>) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.settled {
            return false;
        }
        state.settled = true;
        match state.listener.take() {
            Some(listener) => {
                drop(state);
                self.condvar.notify_all();
                listener(res);
            }
            None => {
                state.outcome = Some(res);
                drop(state);
                self.condvar.notify_all();
            }
        }
        true
    }
}

/// The write-once side of an eventual result.
///
/// Completing a promise settles its [`Future`]. If a promise is dropped
/// without being completed, the future is failed with
/// [`error::promise_abandoned`] so no awaiting coroutine is left suspended
/// forever.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Promise<T> {
    pub fn new() -> Promise<T> {
        Promise {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    outcome: None,
                    listener: None,
                    settled: false,
                }),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Returns the read side of this promise.
    pub fn future(&self) -> Future<T> {
        Future {
            shared: self.shared.clone(),
        }
    }

    /// Settles the future with the given outcome.
    ///
    /// # Panics
    /// Panics if the promise was already completed.
    pub fn complete(&self, res: io::Result<T>) {
        assert!(self.shared.settle(res), "promise completed twice");
    }

    /// Like `complete`, but returns false instead of panicking when the
    /// promise was already completed.
    pub fn try_complete(&self, res: io::Result<T>) -> bool {
        self.shared.settle(res)
    }

    pub fn succeed(&self, value: T) {
        self.complete(Ok(value));
    }

    pub fn fail(&self, cause: io::Error) {
        self.complete(Err(cause));
    }
}

impl<T: Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Promise::new()
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap();
        if !state.settled {
            state.settled = true;
            match state.listener.take() {
                Some(listener) => {
                    drop(state);
                    self.shared.condvar.notify_all();
                    listener(Err(error::promise_abandoned()));
                }
                None => {
                    state.outcome = Some(Err(error::promise_abandoned()));
                    drop(state);
                    self.shared.condvar.notify_all();
                }
            }
        }
    }
}

/// The read side of an eventually-available result.
///
/// A future is settled exactly once with a success value or a failure cause
/// and consumed exactly once, either by its single completion listener, by
/// [`try_take`](Future::try_take), or by a coroutine awaiting it.
pub struct Future<T> {
    shared: Arc<Shared<T>>,
}

impl<T> std::fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Future<T> {
    /// Constructs an already-succeeded future.
    ///
    /// # Examples
    /// ```
    /// use coroio::Future;
    ///
    /// let fut = Future::succeeded(5);
    /// assert_eq!(fut.try_take().unwrap().unwrap(), 5);
    /// ```
    pub fn succeeded(value: T) -> Future<T> {
        Future::settled(Ok(value))
    }

    /// Constructs an already-failed future.
    pub fn failed(cause: io::Error) -> Future<T> {
        Future::settled(Err(cause))
    }

    fn settled(res: io::Result<T>) -> Future<T> {
        Future {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    outcome: Some(res),
                    listener: None,
                    settled: true,
                }),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Returns true once the future has been settled, even after its outcome
    /// was consumed.
    pub fn is_settled(&self) -> bool {
        self.shared.state.lock().unwrap().settled
    }

    /// Takes the outcome if the future is settled and not yet consumed.
    pub fn try_take(&self) -> Option<io::Result<T>> {
        self.shared.state.lock().unwrap().outcome.take()
    }

    /// Registers the completion listener, invoking it immediately when the
    /// future is already settled. The listener may fire on whatever thread
    /// settles the promise.
    ///
    /// # Panics
    /// Panics if a listener is already registered, or if the outcome was
    /// already consumed.
    pub fn on_complete<F>(&self, listener: F)
    where
        F: FnOnce(io::Result<T>) + Send + 'static,
    {
        let mut state = self.shared.state.lock().unwrap();
        assert!(
            state.listener.is_none(),
            "future supports a single completion listener"
        );
        if state.settled {
            let res = state
                .outcome
                .take()
                .expect("future outcome already consumed");
            drop(state);
            listener(res);
        } else {
            state.listener = Some(Box::new(listener));
        }
    }

    /// Blocks the calling thread until the future settles or the timeout
    /// elapses. Verification harness for tests and shutdown paths; never
    /// call it from a task running on an execution context.
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if let Some(res) = state.outcome.take() {
                return res;
            }
            if state.settled {
                panic!("future outcome already consumed");
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(error::timed_out());
            }
            let (guard, _) = self
                .shared
                .condvar
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_succeeded() {
        let fut = Future::succeeded("hello");
        assert!(fut.is_settled());
        assert_eq!(fut.try_take().unwrap().unwrap(), "hello");
        assert!(fut.try_take().is_none());
        assert!(fut.is_settled());
    }

    #[test]
    fn test_listener_after_settle() {
        let promise = Promise::new();
        let fut = promise.future();
        promise.succeed(7);
        let (tx, rx) = std::sync::mpsc::channel();
        fut.on_complete(move |res| tx.send(res.unwrap()).unwrap());
        // The listener fired inline on this thread.
        assert_eq!(rx.try_recv().unwrap(), 7);
    }

    #[test]
    fn test_listener_before_settle() {
        let promise = Promise::new();
        let fut = promise.future();
        let (tx, rx) = std::sync::mpsc::channel();
        fut.on_complete(move |res| tx.send(res.unwrap()).unwrap());
        promise.succeed(7);
        assert_eq!(rx.recv().unwrap(), 7);
    }

    #[test]
    fn test_wait_timeout_cross_thread() {
        let promise = Promise::new();
        let fut = promise.future();
        let completer = thread::spawn(move || promise.succeed(42));
        assert_eq!(fut.wait_timeout(Duration::from_secs(5)).unwrap(), 42);
        completer.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_expires() {
        let promise: Promise<i32> = Promise::new();
        let fut = promise.future();
        let err = fut.wait_timeout(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_abandoned_promise_fails() {
        let promise: Promise<i32> = Promise::new();
        let fut = promise.future();
        drop(promise);
        let err = fut.try_take().unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    #[should_panic(expected = "promise completed twice")]
    fn test_double_complete() {
        let promise = Promise::new();
        let _fut = promise.future();
        promise.succeed(1);
        promise.succeed(2);
    }

    #[test]
    fn test_try_complete() {
        let promise = Promise::new();
        let fut = promise.future();
        assert!(promise.try_complete(Ok(1)));
        assert!(!promise.try_complete(Ok(2)));
        assert_eq!(fut.try_take().unwrap().unwrap(), 1);
    }
}
