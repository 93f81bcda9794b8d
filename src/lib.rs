//! vortex: a pooled-buffer, pipelined, event-driven networking runtime.
//!
//! Grounded in the teacher (`tokio-rs/mio`)'s own `lib.rs` shape: a thin
//! crate root that wires together a handful of focused modules and
//! re-exports the handful of types applications touch most, leaving the
//! platform-specific plumbing under `sys` entirely private.
//!
//! The reactor core (`token`, `interest`, `poll`, `event`, `waker`,
//! `io_source`, `sys`) is the teacher almost unchanged. Everything above
//! it — pooled buffers, the channel abstraction, the handler pipeline, the
//! outbound write queue, and promises — is `vortex`'s own layer, built in
//! the teacher's idiom (see DESIGN.md for what is grounded where).

pub mod buf;
pub mod channel;
pub mod error;
pub mod event;
pub mod event_loop;
pub mod future;
pub mod interest;
pub mod io_source;
pub mod outbound_buffer;
pub mod pipeline;
pub mod poll;
pub mod token;
pub mod waker;

mod sys;

pub use channel::{Channel, ChannelConfig, ChannelFacade};
pub use error::{Error, Result};
pub use event::{Event, Events};
pub use event_loop::{EventLoop, EventLoopGroup, EventLoopHandle};
pub use future::{Future, Promise};
pub use interest::Interest;
pub use poll::{Poll, Registry};
pub use token::Token;
pub use waker::Waker;
