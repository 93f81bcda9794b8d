//! The handler vocabulary: the inbound/outbound event methods a pipeline
//! stage may override, each defaulting to "forward unchanged" (spec.md
//! §4.E).

use std::net::SocketAddr;
use std::sync::Arc;

use crate::buf::ByteBuf;
use crate::error::Error;
use crate::future::Promise;

use super::context::HandlerContext;

/// A framework-level notification that isn't one of the fixed inbound
/// events. `InputShutdown` is fired when a half-closed peer's read side
/// reaches EOF while the local write side stays open (spec.md §4.D "Partial
/// close").
#[derive(Clone)]
pub enum UserEvent {
    InputShutdown,
    Custom(Arc<dyn std::any::Any + Send + Sync>),
}

/// One stage in a channel's pipeline. Every method has a default that simply
/// forwards the event to the next peer in its direction, so a handler needs
/// only override what it actually cares about — the rest pass through
/// untouched, exactly as [`ChannelHandlerAdapter`] does on its own.
pub trait Handler: Send {
    /// Called once, synchronously, while the handler is being linked into
    /// the chain (spec.md §4.E state `ADD_PENDING` -> `ADD_COMPLETE`).
    fn handler_added(&mut self, _ctx: &HandlerContext) {}
    /// Called once the handler has been unlinked (state `REMOVE_COMPLETE`).
    fn handler_removed(&mut self, _ctx: &HandlerContext) {}

    fn channel_registered(&mut self, ctx: &HandlerContext) {
        ctx.fire_channel_registered();
    }
    fn channel_unregistered(&mut self, ctx: &HandlerContext) {
        ctx.fire_channel_unregistered();
    }
    fn channel_active(&mut self, ctx: &HandlerContext) {
        ctx.fire_channel_active();
    }
    fn channel_inactive(&mut self, ctx: &HandlerContext) {
        ctx.fire_channel_inactive();
    }
    fn channel_read(&mut self, ctx: &HandlerContext, msg: ByteBuf) {
        ctx.fire_channel_read(msg);
    }
    fn channel_read_complete(&mut self, ctx: &HandlerContext) {
        ctx.fire_channel_read_complete();
    }
    fn channel_writability_changed(&mut self, ctx: &HandlerContext) {
        ctx.fire_channel_writability_changed();
    }
    fn user_event_triggered(&mut self, ctx: &HandlerContext, evt: UserEvent) {
        ctx.fire_user_event_triggered(evt);
    }
    /// Default behavior is to forward to the next handler; a handler that
    /// does not override this is assumed to not handle exceptions (spec.md
    /// §4.E "a handler that does not override exceptionCaught forwards it").
    fn exception_caught(&mut self, ctx: &HandlerContext, err: Error) {
        ctx.fire_exception_caught(err);
    }

    fn bind(&mut self, ctx: &HandlerContext, addr: SocketAddr, promise: Promise<()>) {
        ctx.bind_outward(addr, promise);
    }
    fn connect(&mut self, ctx: &HandlerContext, addr: SocketAddr, promise: Promise<()>) {
        ctx.connect_outward(addr, promise);
    }
    fn disconnect(&mut self, ctx: &HandlerContext, promise: Promise<()>) {
        ctx.disconnect_outward(promise);
    }
    fn close(&mut self, ctx: &HandlerContext, promise: Promise<()>) {
        ctx.close_outward(promise);
    }
    fn deregister(&mut self, ctx: &HandlerContext, promise: Promise<()>) {
        ctx.deregister_outward(promise);
    }
    fn read(&mut self, ctx: &HandlerContext) {
        ctx.read_outward();
    }
    fn write(&mut self, ctx: &HandlerContext, msg: ByteBuf, promise: Promise<()>) {
        ctx.write_outward(msg, promise);
    }
    fn flush(&mut self, ctx: &HandlerContext) {
        ctx.flush_outward();
    }
}

/// A handler with every method left at its pass-through default. Useful as
/// a base to wrap, or directly as a no-op placeholder while wiring up a
/// pipeline (spec.md §6 "adapter with sensible defaults").
#[derive(Default)]
pub struct ChannelHandlerAdapter;

impl Handler for ChannelHandlerAdapter {}
