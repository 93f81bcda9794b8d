use std::fmt;

use crate::event::Event;
use crate::sys;

/// A buffer of readiness events filled in by [`Poll::poll`](crate::Poll::poll).
///
/// Mirrors the teacher's `event::Events` (`event/events.rs`): a thin
/// capacity-bounded wrapper over the platform's raw event buffer, reused
/// across polls to avoid per-tick allocation.
pub struct Events {
    inner: sys::Events,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Events {
        Events {
            inner: sys::Events::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self,
            pos: 0,
        }
    }

    pub(crate) fn sys_mut(&mut self) -> &mut sys::Events {
        &mut self.inner
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Iterator over the events stored in [`Events`].
pub struct Iter<'a> {
    inner: &'a Events,
    pos: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        let ev = self.inner.inner.get(self.pos)?;
        self.pos += 1;
        Some(Event::from_sys_event(ev))
    }
}

impl<'a> IntoIterator for &'a Events {
    type Item = Event;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}
