//! `Poll`: the readiness multiplexer the event loop drives.
//!
//! Grounded in the teacher's `poll.rs`: a `Poll` handle owning a `Registry`,
//! which in turn owns an `Arc<sys::Selector>` so registrations can be made
//! from any thread while polling happens on one.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::trace;

use crate::event::{Event, Events};
use crate::interest::Interest;
use crate::sys;
use crate::token::Token;

/// Polls for readiness events on all registered sources.
///
/// `Poll` blocks the calling thread in [`poll`](Poll::poll); registration
/// happens through the cloneable [`Registry`] returned by
/// [`registry`](Poll::registry), which may be called from any thread. This
/// split is what lets [`EventLoop::channel`](crate::event_loop::EventLoop)
/// hand out a thread-safe sender while the loop itself stays single
/// threaded (spec.md §4.C).
pub struct Poll {
    registry: Registry,
}

/// Registers I/O sources with a [`Poll`] instance.
#[derive(Clone)]
pub struct Registry {
    selector: Arc<sys::Selector>,
}

impl Poll {
    pub fn new() -> io::Result<Poll> {
        let selector = Arc::new(sys::Selector::new()?);
        Ok(Poll {
            registry: Registry { selector },
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        loop {
            match self.registry.selector.select(events.sys_mut(), timeout) {
                Ok(()) => return Ok(events.len()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl Registry {
    pub fn register<S>(&self, source: &mut S, token: Token, interests: Interest) -> io::Result<()>
    where
        S: crate::event::Source + ?Sized,
    {
        trace!("registering {:?} with interests {:?}", token, interests);
        source.register(self, token, interests)
    }

    pub fn reregister<S>(&self, source: &mut S, token: Token, interests: Interest) -> io::Result<()>
    where
        S: crate::event::Source + ?Sized,
    {
        trace!("reregistering {:?} with interests {:?}", token, interests);
        source.reregister(self, token, interests)
    }

    pub fn deregister<S>(&self, source: &mut S) -> io::Result<()>
    where
        S: crate::event::Source + ?Sized,
    {
        source.deregister(self)
    }

    pub(crate) fn selector(&self) -> &sys::Selector {
        &self.selector
    }

    pub(crate) fn try_clone(&self) -> io::Result<Registry> {
        Ok(Registry {
            selector: Arc::new(self.selector.try_clone()?),
        })
    }
}

impl std::fmt::Debug for Poll {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poll").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

#[allow(dead_code)]
pub(crate) fn from_sys_event(e: sys::Event) -> Event {
    Event::from_sys_event(e)
}
