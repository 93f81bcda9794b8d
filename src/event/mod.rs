//! Readiness events and the `Source` registration trait.
//!
//! Grounded in the teacher's `event/` module (`event/event.rs`,
//! `event/evented.rs`, `event/events.rs`, `event/source.rs`): a thin,
//! platform-neutral wrapper around whatever the `sys` backend returns from
//! its selector, plus the trait that `Registry::register` is built on.

mod event;
mod events;
mod source;

pub use event::Event;
pub use events::{Events, Iter};
pub use source::Source;
