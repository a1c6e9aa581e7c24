// coroio
//
// The software is released under the MIT license. see LICENSE.txt

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::callstack::{self, CallStackEntry};

type TaskFn = Box<dyn FnOnce(&ExecutionContext) + Send + 'static>;

struct Executor {
    mutex: Mutex<VecDeque<TaskFn>>,
    condvar: Condvar,
    stopped: AtomicBool,
    driving: AtomicBool,
    outstanding_work: AtomicUsize,
}

/// A serialized task queue representing one logical thread of control.
///
/// Tasks posted to a context execute strictly in posting order, one at a
/// time. Distinct contexts may run in parallel with each other, but a single
/// context never runs two tasks concurrently: `run` admits one driving
/// thread at a time.
#[derive(Clone)]
pub struct ExecutionContext(Arc<Executor>);

impl ExecutionContext {
    /// Constructs a new `ExecutionContext`.
    ///
    /// # Examples
    /// ```
    /// use coroio::ExecutionContext;
    ///
    /// let ctx = ExecutionContext::new();
    /// ```
    pub fn new() -> ExecutionContext {
        ExecutionContext(Arc::new(Executor {
            mutex: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            stopped: AtomicBool::new(false),
            driving: AtomicBool::new(false),
            outstanding_work: AtomicUsize::new(0),
        }))
    }

    /// Requests the context to invoke the given task later and returns
    /// immediately.
    ///
    /// Posting is the only way work crosses onto a context; a task posted
    /// from any thread runs on whichever thread is driving `run`, after all
    /// previously posted tasks.
    ///
    /// # Examples
    /// ```
    /// use coroio::ExecutionContext;
    /// use std::sync::atomic::{AtomicBool, Ordering};
    ///
    /// static PASS: AtomicBool = AtomicBool::new(false);
    ///
    /// let ctx = ExecutionContext::new();
    /// ctx.post(|_| PASS.store(true, Ordering::Relaxed));
    /// assert_eq!(PASS.load(Ordering::Relaxed), false);
    ///
    /// ctx.run();
    /// assert_eq!(PASS.load(Ordering::Relaxed), true);
    /// ```
    pub fn post<F>(&self, task: F)
    where
        F: FnOnce(&ExecutionContext) + Send + 'static,
    {
        let mut queue = self.0.mutex.lock().unwrap();
        queue.push_back(Box::new(task));
        self.0.condvar.notify_one();
    }

    /// Runs posted tasks until the queue is drained and no outstanding work
    /// remains, or the context is stopped. Returns the number of tasks
    /// executed.
    ///
    /// While [`Work`] guards are alive the call keeps waiting for further
    /// tasks instead of returning, so completions arriving from other
    /// threads are not missed.
    ///
    /// Only one thread may drive a context; a concurrent `run` on the same
    /// context returns `0` without executing anything.
    pub fn run(&self) -> usize {
        let _drive = match DriveGuard::acquire(self) {
            Some(guard) => guard,
            None => return 0,
        };
        let _entry = CallStackEntry::new(self.id());
        let mut n = 0;
        while let Some(task) = self.pop() {
            task(self);
            n += 1;
        }
        n
    }

    /// Like `run`, but executes at most one task.
    pub fn run_one(&self) -> usize {
        let _drive = match DriveGuard::acquire(self) {
            Some(guard) => guard,
            None => return 0,
        };
        let _entry = CallStackEntry::new(self.id());
        match self.pop() {
            Some(task) => {
                task(self);
                1
            }
            None => 0,
        }
    }

    /// Sets a stop request: parked drivers wake up and `run` returns once
    /// the queue is drained, regardless of outstanding work.
    ///
    /// # Examples
    /// ```
    /// use coroio::ExecutionContext;
    ///
    /// let ctx = ExecutionContext::new();
    /// assert_eq!(ctx.stopped(), false);
    /// ctx.stop();
    /// assert_eq!(ctx.stopped(), true);
    /// ```
    pub fn stop(&self) {
        if !self.0.stopped.swap(true, Ordering::SeqCst) {
            let _queue = self.0.mutex.lock().unwrap();
            self.0.condvar.notify_all();
        }
    }

    /// Returns true if this has been stopped.
    pub fn stopped(&self) -> bool {
        self.0.stopped.load(Ordering::Relaxed)
    }

    /// Resets a stopped context so it can be run again.
    ///
    /// # Examples
    /// ```
    /// use coroio::ExecutionContext;
    ///
    /// let ctx = ExecutionContext::new();
    /// ctx.stop();
    /// ctx.restart();
    /// assert_eq!(ctx.stopped(), false);
    /// ```
    pub fn restart(&self) {
        self.0.stopped.store(false, Ordering::Relaxed)
    }

    /// Registers outstanding work, keeping `run` from returning while the
    /// guard is alive even when the task queue is momentarily empty.
    pub fn work(&self) -> Work {
        self.0.outstanding_work.fetch_add(1, Ordering::SeqCst);
        Work(self.clone())
    }

    /// Returns true if the calling thread is currently driving this context.
    pub fn on_current_thread(&self) -> bool {
        callstack::contains(self.id())
    }

    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    fn pop(&self) -> Option<TaskFn> {
        let mut queue = self.0.mutex.lock().unwrap();
        loop {
            if let Some(task) = queue.pop_front() {
                return Some(task);
            }
            let idle = self.0.outstanding_work.load(Ordering::SeqCst) == 0;
            if idle || self.stopped() {
                return None;
            }
            queue = self.0.condvar.wait(queue).unwrap();
        }
    }

    fn work_finished(&self) {
        if self.0.outstanding_work.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _queue = self.0.mutex.lock().unwrap();
            self.0.condvar.notify_all();
        }
    }
}

impl PartialEq for ExecutionContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ExecutionContext {}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ExecutionContext({:#x})", self.id())
    }
}

struct DriveGuard<'a>(&'a ExecutionContext);

impl<'a> DriveGuard<'a> {
    fn acquire(ctx: &'a ExecutionContext) -> Option<Self> {
        if (ctx.0).driving.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(DriveGuard(ctx))
        }
    }
}

impl<'a> Drop for DriveGuard<'a> {
    fn drop(&mut self) {
        (self.0 .0).driving.store(false, Ordering::Release);
    }
}

/// RAII token for outstanding work on an [`ExecutionContext`].
pub struct Work(ExecutionContext);

impl Drop for Work {
    fn drop(&mut self) {
        self.0.work_finished();
    }
}

/// Types that carry an owning [`ExecutionContext`].
pub trait AsExecutionContext {
    fn as_ctx(&self) -> &ExecutionContext;
}

impl AsExecutionContext for ExecutionContext {
    fn as_ctx(&self) -> &ExecutionContext {
        self
    }
}

impl AsExecutionContext for Work {
    fn as_ctx(&self) -> &ExecutionContext {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_post_order() {
        let ctx = ExecutionContext::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = seen.clone();
            ctx.post(move |_| seen.lock().unwrap().push(i));
        }
        assert_eq!(ctx.run(), 5);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_task_can_repost() {
        let ctx = ExecutionContext::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        ctx.post(move |ctx| {
            c.fetch_add(1, Ordering::SeqCst);
            let c = c.clone();
            ctx.post(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        });
        assert_eq!(ctx.run(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_work_keeps_run_alive() {
        let ctx = ExecutionContext::new();
        let work = ctx.work();
        let done = Arc::new(AtomicUsize::new(0));

        // The driver parks on the empty queue while the work guard is alive
        // and only returns once the guard is dropped by a posted task.
        let driver = {
            let ctx = ctx.clone();
            thread::spawn(move || ctx.run())
        };

        let d = done.clone();
        ctx.post(move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        });
        ctx.post(move |_| drop(work));

        assert_eq!(driver.join().unwrap(), 2);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stopped_context_keeps_queue() {
        let ctx = ExecutionContext::new();
        ctx.stop();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        ctx.post(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        // A stopped context still drains already queued tasks on run.
        assert_eq!(ctx.run(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        ctx.restart();
        assert_eq!(ctx.run(), 0);
    }

    #[test]
    fn test_single_driver() {
        let ctx = ExecutionContext::new();
        let inner = ctx.clone();
        ctx.post(move |_| {
            // Reentrant run from a task must not execute anything.
            assert_eq!(inner.run(), 0);
        });
        assert_eq!(ctx.run(), 1);
    }

    #[test]
    fn test_on_current_thread() {
        let ctx = ExecutionContext::new();
        assert!(!ctx.on_current_thread());
        let inner = ctx.clone();
        ctx.post(move |ctx| {
            assert!(ctx.on_current_thread());
            assert!(inner.on_current_thread());
        });
        ctx.run();
        assert!(!ctx.on_current_thread());
    }
}
