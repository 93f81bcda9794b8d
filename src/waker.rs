//! Cross-thread wake-up handle for a [`Poll`](crate::poll::Poll).
//!
//! Public wrapper over the platform [`sys::Waker`](crate::sys::Waker),
//! mirrored on the teacher's own public `Waker` (`waker.rs`): any thread may
//! call [`wake`](Waker::wake) to break a blocked `poll` out of its timeout
//! early, which is exactly the primitive spec.md §4.C's "Wake-up" needs for
//! a non-loop thread to unblock task submission.

use std::io;

use crate::poll::Registry;
use crate::sys;
use crate::token::Token;

pub struct Waker {
    inner: sys::Waker,
}

impl Waker {
    pub fn new(registry: &Registry, token: Token) -> io::Result<Waker> {
        sys::Waker::new(registry.selector(), token).map(|inner| Waker { inner })
    }

    pub fn wake(&self) -> io::Result<()> {
        self.inner.wake()
    }

    pub(crate) fn reset(&self) -> io::Result<()> {
        self.inner.reset()
    }
}
