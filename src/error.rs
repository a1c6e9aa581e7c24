// coroio
//
// The software is released under the MIT license. see LICENSE.txt

//! Error constructors.
//!
//! Everything fallible in this crate reports `std::io::Error`. Usage errors
//! (a misused await) carry `ErrorKind::InvalidInput` so callers can tell them
//! apart from asynchronous failures delivered through a [`Future`](crate::Future).

use std::io;

/// `await_on` was called while the coroutine is not the running unit,
/// e.g. through a handle smuggled out of its body or kept after completion.
pub fn await_outside_scope() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        "await used outside an async scope",
    )
}

/// `await_on` was called on a thread that is not driving the coroutine's
/// owning execution context.
pub fn cross_context_await() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        "await called from a context that does not own the coroutine",
    )
}

/// The owning execution context was stopped when `spawn` was called.
pub fn context_unavailable() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "execution context unavailable")
}

/// The coroutine body panicked; the outward future is failed with this.
pub fn body_panicked() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "coroutine body panicked")
}

/// The write side of a future was dropped without being completed.
pub fn promise_abandoned() -> io::Error {
    io::Error::new(
        io::ErrorKind::BrokenPipe,
        "promise dropped before completion",
    )
}

/// The continuation stack could not be allocated.
pub fn stack_allocation_failed() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "coroutine stack allocation failed")
}

/// `Future::wait_timeout` gave up before the future settled.
pub fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "future was not settled in time")
}
