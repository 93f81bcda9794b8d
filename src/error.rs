//! Error kinds shared across the buffer, pipeline, and channel subsystems.
//!
//! The teacher (`mio`) threads `std::io::Error` through almost everything
//! because it has no domain beyond raw I/O. `vortex` has several failure
//! modes that are not I/O errors at all (a bad cursor, a released buffer
//! touched again, a handler added twice) and needs a real enum for them.

use std::io;

use thiserror::Error;

/// Errors produced by `vortex`'s buffer, pipeline, channel, and event-loop
/// subsystems.
///
/// Accessor errors (`IndexOutOfBounds`, `IllegalReferenceCount`,
/// `IllegalArgument`) surface synchronously to the caller. Transport and
/// pipeline errors are usually funneled into an `exceptionCaught` inbound
/// event instead of being returned (see [`crate::pipeline`]).
#[derive(Debug, Error)]
pub enum Error {
    /// A cursor or accessor addressed bytes outside `[0, capacity)`.
    #[error("index out of bounds: index={index}, length={length}, capacity={capacity}")]
    IndexOutOfBounds {
        index: usize,
        length: usize,
        capacity: usize,
    },

    /// A buffer was retained past its overflow ceiling, or released at a
    /// count that was already zero.
    #[error("illegal reference count: {0}")]
    IllegalReferenceCount(RefCountFault),

    /// A channel, pipeline, or promise operation was attempted from a state
    /// that does not permit it (e.g. writing after `close`).
    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    /// A bad capacity or configuration value was supplied.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// A transport-level I/O failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A blocking `sync`/`await` on a promise was interrupted.
    #[error("interrupted while waiting on promise")]
    Interrupted,

    /// A task was submitted to an event loop that is shutting down or has
    /// shut down.
    #[error("task rejected: event loop is {0:?}")]
    RejectedExecution(crate::event_loop::LoopState),

    /// A promise or scheduled task was cancelled before completion.
    #[error("operation cancelled")]
    Cancelled,

    /// An operation was attempted on a channel that is already closed.
    #[error("channel closed")]
    ClosedChannel,

    /// A handler's callback panicked; the pipeline caught it rather than
    /// unwinding through the event loop.
    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
}

/// The specific way a reference-count operation went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefCountFault {
    /// `retain()` pushed the count past `RefCount::MAX`.
    Overflow,
    /// `release()` was called when the count was already zero.
    Underflow,
    /// Any access (`read`, `write`, `slice`, ...) on a buffer whose count is
    /// currently zero.
    AccessAfterFree,
}

impl std::fmt::Display for RefCountFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            RefCountFault::Overflow => "retain() overflowed the reference count",
            RefCountFault::Underflow => "release() called on a buffer with refcount 0",
            RefCountFault::AccessAfterFree => "access to a buffer with refcount 0",
        };
        f.write_str(msg)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
