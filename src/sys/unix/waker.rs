//! `eventfd`-backed cross-thread wake primitive.
//!
//! Copied almost verbatim in spirit from the teacher's
//! `sys/unix/waker/eventfd.rs`: an 8-byte-counter `eventfd`, written to wake
//! a blocked `epoll_wait`, read (and reset) once observed.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};

use super::selector::Selector;
use super::syscall;
use crate::interest::Interest;
use crate::token::Token;

#[derive(Debug)]
pub(crate) struct Waker {
    fd: File,
}

impl Waker {
    pub(crate) fn new(selector: &Selector, token: Token) -> io::Result<Waker> {
        let flags = libc::EFD_CLOEXEC | libc::EFD_NONBLOCK;
        let raw = syscall!(eventfd(0, flags))?;
        let fd = unsafe { File::from_raw_fd(raw) };
        selector.register(fd.as_raw_fd(), token, Interest::READABLE)?;
        Ok(Waker { fd })
    }

    #[allow(clippy::unused_io_amount)]
    pub(crate) fn wake(&self) -> io::Result<()> {
        let buf: [u8; 8] = 1u64.to_ne_bytes();
        match (&self.fd).write(&buf) {
            Ok(_) => Ok(()),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                self.reset()?;
                self.wake()
            }
            Err(err) => Err(err),
        }
    }

    #[allow(clippy::unused_io_amount)]
    pub(crate) fn reset(&self) -> io::Result<()> {
        let mut buf: [u8; 8] = [0; 8];
        match (&self.fd).read(&mut buf) {
            Ok(_) => Ok(()),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(err),
        }
    }
}
