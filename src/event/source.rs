use std::io;

use crate::interest::Interest;
use crate::poll::Registry;
use crate::token::Token;

/// A value that can be registered with a [`Registry`] and receive readiness
/// events for it.
///
/// Mirrors the teacher's `Evented`/`event::Source` trait (`event_imp.rs`,
/// `event/source.rs`): user code should not call these methods directly,
/// only `Registry::register`/`reregister`/`deregister` should.
pub trait Source {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest)
        -> io::Result<()>;

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()>;

    fn deregister(&mut self, registry: &Registry) -> io::Result<()>;
}

impl<T: Source + ?Sized> Source for Box<T> {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        (**self).register(registry, token, interests)
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        (**self).reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        (**self).deregister(registry)
    }
}
