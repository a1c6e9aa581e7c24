// coroio
//
// The software is released under the MIT license. see LICENSE.txt

use std::fmt;
use std::io;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use context::stack::ProtectedFixedSizeStack;
use context::{Context, Transfer};
use log::trace;

use crate::channel::{Outcome, ResultChannel};
use crate::error;
use crate::executor::{AsExecutionContext, ExecutionContext, Work};
use crate::future::{Future, Promise};

/// Default size in bytes of a coroutine's continuation stack.
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

// Yield protocol between the continuation and its step task: the exit
// trampoline reports 0 once the body is done, a suspension reports 1.
const YIELD_FINISHED: usize = 0;
const YIELD_SUSPENDED: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Completion {
    Success,
    Failure,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Created,
    Running,
    Suspended,
    Completed(Completion),
}

struct Inner {
    state: State,
    machine: Option<Context>,
    channel: ResultChannel,
    suspensions: usize,
}

// The continuation and the boxed results only ever cross threads through the
// owning context's task queue, one task at a time.
unsafe impl Send for Inner {}

impl Inner {
    fn transition(&mut self, to: State) {
        let legal = matches!(
            (self.state, to),
            (State::Created, State::Running)
                | (State::Running, State::Suspended)
                | (State::Suspended, State::Running)
                | (State::Running, State::Completed(_))
        );
        assert!(
            legal,
            "illegal coroutine state transition: {:?} -> {:?}",
            self.state, to
        );
        self.state = to;
    }
}

struct CoroutineImpl {
    ctx: ExecutionContext,
    inner: Mutex<Inner>,
}

/// Handle to a suspendable unit of sequential execution.
///
/// The handle is passed to the body by [`spawn`] and threaded explicitly
/// through the call path; all awaiting goes through it. It is cheap to clone,
/// but [`await_on`](Coroutine::await_on) only succeeds while the coroutine is
/// the running unit on its owning context.
#[derive(Clone)]
pub struct Coroutine(Arc<CoroutineImpl>);

impl Coroutine {
    /// Awaits the future without blocking the driving thread.
    ///
    /// An already-settled future yields its outcome immediately. Otherwise
    /// the coroutine suspends until the future settles, at which point the
    /// value is returned — or the failure cause re-raised — right here, so
    /// the body's ordinary `?`/`match` error handling applies unmodified.
    ///
    /// # Examples
    /// ```
    /// use coroio::{spawn, ExecutionContext, Future};
    ///
    /// let ctx = ExecutionContext::new();
    /// let fut = spawn(&ctx, |coro| {
    ///     let x = coro.await_on(Future::succeeded(5))?;
    ///     Ok(x + 1)
    /// }).unwrap();
    /// ctx.run();
    /// assert_eq!(fut.try_take().unwrap().unwrap(), 6);
    /// ```
    pub fn await_on<R: Send + 'static>(&self, future: Future<R>) -> io::Result<R> {
        {
            let inner = self.0.inner.lock().unwrap();
            if inner.state != State::Running {
                return Err(error::await_outside_scope());
            }
        }
        if !self.0.ctx.on_current_thread() {
            return Err(error::cross_context_await());
        }
        self.suspend(future)
    }

    /// Number of true suspensions so far; awaits that hit the fast path of an
    /// already-settled future are not counted.
    pub fn suspension_count(&self) -> usize {
        self.0.inner.lock().unwrap().suspensions
    }

    fn suspend<R: Send + 'static>(&self, future: Future<R>) -> io::Result<R> {
        if let Some(res) = future.try_take() {
            trace!("{:?}: await fast path", self);
            return res;
        }

        let coro = self.clone();
        future.on_complete(move |res| {
            // Affinity guard: the listener may fire on any thread and never
            // touches the coroutine; the outcome crosses over only as a task
            // posted to the owning context.
            let outcome = match res {
                Ok(value) => Outcome::Value(Box::new(value)),
                Err(cause) => Outcome::Failure(cause),
            };
            let ctx = coro.0.ctx.clone();
            trace!("{:?}: posting resume", coro);
            ctx.post(move |_| coro.resume_with(outcome));
        });

        let sched = {
            let mut inner = self.0.inner.lock().unwrap();
            inner.transition(State::Suspended);
            inner.suspensions += 1;
            inner
                .machine
                .take()
                .expect("coroutine continuation slot empty at yield")
        };
        trace!("{:?}: suspended", self);
        let t = unsafe { sched.resume(YIELD_SUSPENDED) };

        let outcome = {
            let mut inner = self.0.inner.lock().unwrap();
            inner.machine = Some(t.context);
            inner.channel.read_and_clear()
        };
        match outcome {
            Outcome::Value(value) => match value.downcast::<R>() {
                Ok(value) => Ok(*value),
                Err(_) => panic!("result channel delivered a value of the wrong type"),
            },
            Outcome::Failure(cause) => Err(cause),
        }
    }

    fn first_step(&self) {
        self.0.inner.lock().unwrap().transition(State::Running);
        self.reenter();
    }

    fn resume_with(&self, outcome: Outcome) {
        {
            let mut inner = self.0.inner.lock().unwrap();
            inner.transition(State::Running);
            inner.channel.write(outcome);
        }
        self.reenter();
    }

    // Re-enters the continuation exactly once; only runs from tasks already
    // executing on the owning context.
    fn reenter(&self) {
        debug_assert!(self.0.ctx.on_current_thread());
        let machine = {
            let mut inner = self.0.inner.lock().unwrap();
            inner
                .machine
                .take()
                .expect("coroutine re-entered while already running")
        };
        let t = unsafe { machine.resume(0) };
        if t.data == YIELD_FINISHED {
            // The exit trampoline dropped the coroutine stack; the context in
            // this transfer is dead and must not be stored or resumed.
            mem::forget(t.context);
            return;
        }
        let mut inner = self.0.inner.lock().unwrap();
        inner.machine = Some(t.context);
    }
}

impl AsExecutionContext for Coroutine {
    fn as_ctx(&self) -> &ExecutionContext {
        &self.0.ctx
    }
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let id = Arc::as_ptr(&self.0) as usize;
        match self.0.inner.try_lock() {
            Ok(inner) => write!(f, "Coroutine({:#x}, {:?})", id, inner.state),
            Err(_) => write!(f, "Coroutine({:#x})", id),
        }
    }
}

struct InitData {
    coro: Coroutine,
    work: Work,
    stack: ProtectedFixedSizeStack,
    body: Box<dyn FnOnce(&Coroutine) -> Completion + Send>,
}

extern "C" fn coro_entry(t: Transfer) -> ! {
    let InitData {
        coro,
        work,
        stack,
        body,
    } = unsafe {
        let init = &mut *(t.data as *mut Option<InitData>);
        init.take().expect("coroutine entered without init data")
    };

    // Bootstrap handshake: hand the paused continuation back to the launcher
    // before any user code runs. The next resume comes from a posted step.
    let Transfer { context, .. } = unsafe { t.context.resume(YIELD_SUSPENDED) };
    coro.0.inner.lock().unwrap().machine = Some(context);

    let completion = body(&coro);

    let context = {
        let mut inner = coro.0.inner.lock().unwrap();
        inner.transition(State::Completed(completion));
        inner
            .machine
            .take()
            .expect("coroutine continuation slot empty at exit")
    };

    // Nothing on this stack is ever unwound; everything still owned here must
    // be dropped before the exit trampoline releases the stack itself.
    drop(coro);
    drop(work);

    let mut stack = Some(stack);
    unsafe { context.resume_ontop(&mut stack as *mut _ as usize, coro_exit) };
    unreachable!()
}

extern "C" fn coro_exit(mut t: Transfer) -> Transfer {
    {
        let stack = unsafe { &mut *(t.data as *mut Option<ProtectedFixedSizeStack>) };
        // Drop the stack
        let _ = stack.take().unwrap();
    }
    t.data = YIELD_FINISHED;
    t
}

/// Launches a coroutine on the owning execution context and returns the
/// future of its outcome.
///
/// The body never runs on the caller's stack: its first step is posted to the
/// context like any other task, so side effects are ordered consistently no
/// matter where `spawn` is called from — including from inside another
/// coroutine's body, which is how nested scopes compose.
///
/// Fails with a configuration error if the context has been stopped.
///
/// # Examples
/// ```
/// use coroio::{spawn, ExecutionContext, Future};
///
/// let ctx = ExecutionContext::new();
/// let fut = spawn(&ctx, |coro| {
///     let greeting: &str = coro.await_on(Future::succeeded("hello"))?;
///     Ok(greeting.len())
/// }).unwrap();
/// ctx.run();
/// assert_eq!(fut.try_take().unwrap().unwrap(), 5);
/// ```
pub fn spawn<C, T, F>(ctx: &C, body: F) -> io::Result<Future<T>>
where
    C: AsExecutionContext,
    T: Send + 'static,
    F: FnOnce(&Coroutine) -> io::Result<T> + Send + 'static,
{
    spawn_with_stack_size(ctx, DEFAULT_STACK_SIZE, body)
}

/// Like [`spawn`], with an explicit continuation stack size. Useful when many
/// coroutines are alive at once and the default would be wasteful.
pub fn spawn_with_stack_size<C, T, F>(ctx: &C, stack_size: usize, body: F) -> io::Result<Future<T>>
where
    C: AsExecutionContext,
    T: Send + 'static,
    F: FnOnce(&Coroutine) -> io::Result<T> + Send + 'static,
{
    let ctx = ctx.as_ctx().clone();
    if ctx.stopped() {
        return Err(error::context_unavailable());
    }

    let promise = Promise::new();
    let outward = promise.future();

    let coro = Coroutine(Arc::new(CoroutineImpl {
        ctx: ctx.clone(),
        inner: Mutex::new(Inner {
            state: State::Created,
            machine: None,
            channel: ResultChannel::new(),
            suspensions: 0,
        }),
    }));

    let wrapped = Box::new(move |coro: &Coroutine| {
        let res = panic::catch_unwind(AssertUnwindSafe(|| body(coro)))
            .unwrap_or_else(|_| Err(error::body_panicked()));
        let completion = if res.is_ok() {
            Completion::Success
        } else {
            Completion::Failure
        };
        // Settling here keeps listener callbacks on the owning context.
        promise.complete(res);
        completion
    });

    let init = InitData {
        coro: coro.clone(),
        work: ctx.work(),
        stack: ProtectedFixedSizeStack::new(stack_size)
            .map_err(|_| error::stack_allocation_failed())?,
        body: wrapped,
    };

    let context = unsafe { Context::new(&init.stack, coro_entry) };
    let mut init = Some(init);
    let t = unsafe { context.resume(&mut init as *mut _ as usize) };
    coro.0.inner.lock().unwrap().machine = Some(t.context);
    trace!("{:?}: spawned on {:?}", coro, ctx);

    let first = coro.clone();
    ctx.post(move |_| first.first_step());
    Ok(outward)
}
