//! Adapter bridging any `AsRawFd` socket into an [`event::Source`].
//!
//! Grounded in the teacher's `io_source.rs`: `IoSource<T>` is the bridge
//! that lets concrete transports (`std::net::TcpStream`/`TcpListener`) be
//! registered with a [`Registry`] without each transport reimplementing the
//! raw `epoll_ctl` plumbing itself.

use std::io;
use std::ops::{Deref, DerefMut};
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use crate::event::Source;
use crate::interest::Interest;
use crate::poll::Registry;
use crate::token::Token;

/// Wraps `T` (anything `AsRawFd`) so it can be registered with a [`Registry`].
pub struct IoSource<T> {
    inner: T,
}

impl<T> IoSource<T> {
    pub fn new(io: T) -> IoSource<T> {
        IoSource { inner: io }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> Deref for IoSource<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for IoSource<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: AsRawFd> Source for IoSource<T> {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        registry.selector().register(self.inner.as_raw_fd(), token, interests)
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        registry.selector().reregister(self.inner.as_raw_fd(), token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.selector().deregister(self.inner.as_raw_fd())
    }
}
