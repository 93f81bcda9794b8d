use std::fmt;

use crate::sys;
use crate::token::Token;

/// A readiness event: a [`Token`] paired with the readiness state that
/// caused `Poll::poll` to wake.
#[repr(transparent)]
pub struct Event {
    inner: sys::Event,
}

impl Event {
    pub(crate) fn from_sys_event(inner: sys::Event) -> Event {
        Event { inner }
    }

    #[inline]
    pub fn token(&self) -> Token {
        sys::event::token(&self.inner)
    }

    #[inline]
    pub fn is_readable(&self) -> bool {
        sys::event::is_readable(&self.inner)
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        sys::event::is_writable(&self.inner)
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        sys::event::is_error(&self.inner)
    }

    #[inline]
    pub fn is_read_closed(&self) -> bool {
        sys::event::is_read_closed(&self.inner)
    }

    #[inline]
    pub fn is_write_closed(&self) -> bool {
        sys::event::is_write_closed(&self.inner)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("token", &self.token())
            .field("readable", &self.is_readable())
            .field("writable", &self.is_writable())
            .field("error", &self.is_error())
            .finish()
    }
}
