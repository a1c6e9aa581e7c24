// coroio
//
// The software is released under the MIT license. see LICENSE.txt

//! Blocking-style coroutines for callback-based event loops.
//!
//! A coroutine spawned with [`spawn`] runs as straight-line code on a
//! serialized [`ExecutionContext`], suspending at every [`Coroutine::await_on`]
//! call whose [`Future`] is still pending and resuming on the owning context
//! once it settles. The driving thread is never blocked; while a coroutine is
//! suspended the context keeps executing other tasks.
//!
//! ```
//! use coroio::{spawn, ExecutionContext, Future};
//!
//! let ctx = ExecutionContext::new();
//! let fut = spawn(&ctx, |coro| {
//!     let ids = coro.await_on(Future::succeeded(vec![1, 2, 3]))?;
//!     Ok(ids.len())
//! }).unwrap();
//!
//! ctx.run();
//! assert_eq!(fut.try_take().unwrap().unwrap(), 3);
//! ```

mod callstack;
mod channel;
mod coroutine;
mod executor;
mod future;

pub mod error;

pub use self::coroutine::{spawn, spawn_with_stack_size, Coroutine, DEFAULT_STACK_SIZE};
pub use self::executor::{AsExecutionContext, ExecutionContext, Work};
pub use self::future::{Future, Promise};
