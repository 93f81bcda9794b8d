//! The channel abstraction: a single open or openable I/O connection with
//! its own pipeline, configuration, and outbound write queue (spec.md
//! §4.D).
//!
//! The teacher has nothing at this layer — mio stops at raw readiness — so
//! the trait split here (`ChannelFacade`/`ChannelUnsafe`/`Channel`) is
//! grounded in spec.md §4.D's own three-way split between "what any caller
//! may read", "what only the framework may invoke", and "the public
//! operations users call", translated into Rust's trait-object idiom for a
//! heterogeneous collection of transports (see DESIGN.md).

pub mod attr;
pub mod config;
pub mod tcp;

pub use attr::{AttributeKey, AttributeMap};
pub use config::{ChannelConfig, RecvByteBufAllocatorKind};
pub use tcp::{TcpChannel, TcpServerChannel};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::buf::alloc::ByteBufAllocator;
use crate::buf::ByteBuf;
use crate::error::Result;
use crate::event_loop::EventLoopHandle;
use crate::future::{Future, Promise};
use crate::pipeline::Pipeline;
use crate::token::ChannelId;

/// A channel's position in its open/registered/active lifecycle (spec.md
/// §4.D): `Unregistered` <-> `Registered` -> `Active` -> `Inactive` ->
/// `Closed`. `Closed` is reachable from any other state; the rest only move
/// forward (or back to `Unregistered` via `deregister`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    Unregistered = 0,
    Registered = 1,
    Active = 2,
    Inactive = 3,
    Closed = 4,
}

impl ChannelState {
    fn from_u8(v: u8) -> ChannelState {
        match v {
            0 => ChannelState::Unregistered,
            1 => ChannelState::Registered,
            2 => ChannelState::Active,
            3 => ChannelState::Inactive,
            _ => ChannelState::Closed,
        }
    }
}

/// Atomic holder for a channel's [`ChannelState`], shared between the
/// channel's public accessors and its `Unsafe` implementation.
#[derive(Default)]
pub struct ChannelLifecycle(AtomicU8);

impl ChannelLifecycle {
    pub fn new() -> ChannelLifecycle {
        ChannelLifecycle(AtomicU8::new(ChannelState::Unregistered as u8))
    }

    pub fn get(&self) -> ChannelState {
        ChannelState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ChannelState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.get() != ChannelState::Closed
    }

    pub fn is_active(&self) -> bool {
        self.get() == ChannelState::Active
    }

    pub fn is_registered(&self) -> bool {
        matches!(self.get(), ChannelState::Registered | ChannelState::Active)
    }
}

/// Guesses the next receive buffer size from recent read history, growing
/// after a read that fully used its buffer and shrinking after one that
/// used little of it (spec.md §4.D "the read loop... uses a buffer-size
/// guess that adapts to recent history").
pub struct RecvByteBufAllocHandle {
    guess: usize,
    min: usize,
    max: usize,
}

impl RecvByteBufAllocHandle {
    pub fn new() -> RecvByteBufAllocHandle {
        RecvByteBufAllocHandle {
            guess: 2048,
            min: 64,
            max: 64 * 1024,
        }
    }

    pub fn guess(&self) -> usize {
        self.guess
    }

    /// `last_read` is how many bytes the most recent `read()` call actually
    /// returned; `buffer_capacity` is the capacity of the buffer it read
    /// into.
    pub fn record(&mut self, last_read: usize, buffer_capacity: usize) {
        if last_read == buffer_capacity {
            self.guess = (self.guess.saturating_mul(2)).min(self.max);
        } else if last_read < self.guess / 2 {
            self.guess = (self.guess / 2).max(self.min);
        }
    }
}

impl Default for RecvByteBufAllocHandle {
    fn default() -> RecvByteBufAllocHandle {
        RecvByteBufAllocHandle::new()
    }
}

/// The read-only facade a pipeline hands to handlers via
/// `HandlerContext::channel()`. Deliberately narrower than [`Channel`]:
/// handlers observe a channel, they do not drive its lifecycle directly
/// (they go through outbound methods on the context instead).
pub trait ChannelFacade: Send + Sync {
    fn id(&self) -> ChannelId;
    fn is_active(&self) -> bool;
    fn alloc(&self) -> Arc<dyn ByteBufAllocator>;
    fn event_loop(&self) -> &EventLoopHandle;
    fn local_addr(&self) -> Option<SocketAddr>;
    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// The raw transport operations a pipeline's head context invokes. Not part
/// of the public API — user code reaches these only indirectly, through
/// [`Channel`]'s outbound methods, which route through the pipeline first
/// (spec.md §4.D "Unsafe").
pub trait ChannelUnsafe: Send + Sync {
    fn do_bind(&self, addr: SocketAddr, promise: Promise<()>);
    fn do_connect(&self, addr: SocketAddr, promise: Promise<()>);
    fn do_disconnect(&self, promise: Promise<()>);
    fn do_close(&self, promise: Promise<()>);
    fn do_close_forcibly(&self);
    fn do_deregister(&self, promise: Promise<()>);
    fn do_begin_read(&self);
    fn do_write(&self, msg: ByteBuf, promise: Promise<()>);
    fn do_flush(&self);
}

/// The public channel contract (spec.md §4.D). Outbound operations default
/// to creating a promise bound to the channel's event loop and handing it
/// to the pipeline's tail, matching `channel.write(msg) ==
/// pipeline.write(msg)` (spec.md §4.E).
pub trait Channel: ChannelFacade {
    fn parent(&self) -> Option<ChannelId>;
    fn config(&self) -> &parking_lot::Mutex<ChannelConfig>;
    fn is_open(&self) -> bool;
    fn is_registered(&self) -> bool;
    fn pipeline(&self) -> &Arc<Pipeline>;
    fn attrs(&self) -> &AttributeMap;

    fn bind(&self, addr: SocketAddr) -> Future<()> {
        let promise = Promise::with_executor(self.event_loop().clone());
        let fut = promise.future();
        self.pipeline().bind(addr, promise);
        fut
    }

    fn connect(&self, addr: SocketAddr) -> Future<()> {
        let promise = Promise::with_executor(self.event_loop().clone());
        let fut = promise.future();
        self.pipeline().connect(addr, promise);
        fut
    }

    fn disconnect(&self) -> Future<()> {
        let promise = Promise::with_executor(self.event_loop().clone());
        let fut = promise.future();
        self.pipeline().disconnect(promise);
        fut
    }

    fn close(&self) -> Future<()> {
        let promise = Promise::with_executor(self.event_loop().clone());
        let fut = promise.future();
        self.pipeline().close(promise);
        fut
    }

    fn deregister(&self) -> Future<()> {
        let promise = Promise::with_executor(self.event_loop().clone());
        let fut = promise.future();
        self.pipeline().deregister(promise);
        fut
    }

    fn read(&self) {
        self.pipeline().read();
    }

    fn write(&self, msg: ByteBuf) -> Future<()> {
        let promise = Promise::with_executor(self.event_loop().clone());
        let fut = promise.future();
        self.pipeline().write(msg, promise);
        fut
    }

    fn flush(&self) {
        self.pipeline().flush();
    }

    fn write_and_flush(&self, msg: ByteBuf) -> Future<()> {
        let fut = self.write(msg);
        self.flush();
        fut
    }
}

/// Registers `channel`'s `IoSource` with `event_loop` under a fresh token,
/// transitions it to `Registered`, and fires `channelRegistered`. Shared by
/// every concrete channel type's `register()` so the lifecycle bookkeeping
/// lives in one place (spec.md §4.D "register").
pub(crate) fn mark_registered(lifecycle: &ChannelLifecycle, pipeline: &Arc<Pipeline>) -> Result<()> {
    lifecycle.set(ChannelState::Registered);
    pipeline.fire_channel_registered();
    Ok(())
}

pub(crate) fn mark_active(lifecycle: &ChannelLifecycle, pipeline: &Arc<Pipeline>) {
    lifecycle.set(ChannelState::Active);
    pipeline.fire_channel_active();
}

pub(crate) fn mark_inactive(lifecycle: &ChannelLifecycle, pipeline: &Arc<Pipeline>) {
    if lifecycle.get() == ChannelState::Active {
        lifecycle.set(ChannelState::Inactive);
        pipeline.fire_channel_inactive();
    }
}

pub(crate) fn mark_unregistered(lifecycle: &ChannelLifecycle, pipeline: &Arc<Pipeline>) {
    lifecycle.set(ChannelState::Unregistered);
    pipeline.fire_channel_unregistered();
}

pub(crate) fn mark_closed(lifecycle: &ChannelLifecycle) {
    lifecycle.set(ChannelState::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_starts_unregistered_and_tracks_active() {
        let lifecycle = ChannelLifecycle::new();
        assert_eq!(lifecycle.get(), ChannelState::Unregistered);
        lifecycle.set(ChannelState::Registered);
        assert!(lifecycle.is_registered());
        assert!(!lifecycle.is_active());
        lifecycle.set(ChannelState::Active);
        assert!(lifecycle.is_active());
        lifecycle.set(ChannelState::Closed);
        assert!(!lifecycle.is_open());
    }

    #[test]
    fn recv_handle_grows_after_full_read_and_shrinks_after_small_one() {
        let mut handle = RecvByteBufAllocHandle::new();
        let initial = handle.guess();
        handle.record(initial, initial);
        assert!(handle.guess() > initial);
        let grown = handle.guess();
        handle.record(10, grown);
        assert!(handle.guess() < grown);
    }
}
