//! A handler's view of its position in the chain.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::buf::ByteBuf;
use crate::channel::{ChannelFacade, ChannelUnsafe};
use crate::error::Error;
use crate::future::Promise;

use super::handler::UserEvent;
use super::Pipeline;

/// Passed to every [`Handler`](super::Handler) callback. Lets a handler
/// forward an inbound event to its next peer, start an outbound operation
/// at its own position, or reach the owning channel's read-only facade.
pub struct HandlerContext {
    pipeline: Arc<Pipeline>,
    index: usize,
}

impl HandlerContext {
    pub(super) fn new(pipeline: Arc<Pipeline>, index: usize) -> HandlerContext {
        HandlerContext { pipeline, index }
    }

    pub fn name(&self) -> String {
        self.pipeline.name_of(self.index)
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn channel(&self) -> Arc<dyn ChannelFacade> {
        self.pipeline.channel_facade()
    }

    pub(crate) fn channel_unsafe(&self) -> Arc<dyn ChannelUnsafe> {
        self.pipeline.channel_unsafe_ops()
    }

    // ===== inbound: forward to the next inbound-capable peer =====

    pub fn fire_channel_registered(&self) {
        if let Some(idx) = self.pipeline.seek_inbound(self.next_index()) {
            self.pipeline.invoke_at(idx, |h, ctx| h.channel_registered(ctx));
        }
    }
    pub fn fire_channel_unregistered(&self) {
        if let Some(idx) = self.pipeline.seek_inbound(self.next_index()) {
            self.pipeline.invoke_at(idx, |h, ctx| h.channel_unregistered(ctx));
        }
    }
    pub fn fire_channel_active(&self) {
        if let Some(idx) = self.pipeline.seek_inbound(self.next_index()) {
            self.pipeline.invoke_at(idx, |h, ctx| h.channel_active(ctx));
        }
    }
    pub fn fire_channel_inactive(&self) {
        if let Some(idx) = self.pipeline.seek_inbound(self.next_index()) {
            self.pipeline.invoke_at(idx, |h, ctx| h.channel_inactive(ctx));
        }
    }
    pub fn fire_channel_read(&self, msg: ByteBuf) {
        if let Some(idx) = self.pipeline.seek_inbound(self.next_index()) {
            self.pipeline.invoke_at(idx, move |h, ctx| h.channel_read(ctx, msg));
        }
    }
    pub fn fire_channel_read_complete(&self) {
        if let Some(idx) = self.pipeline.seek_inbound(self.next_index()) {
            self.pipeline.invoke_at(idx, |h, ctx| h.channel_read_complete(ctx));
        }
    }
    pub fn fire_channel_writability_changed(&self) {
        if let Some(idx) = self.pipeline.seek_inbound(self.next_index()) {
            self.pipeline
                .invoke_at(idx, |h, ctx| h.channel_writability_changed(ctx));
        }
    }
    pub fn fire_user_event_triggered(&self, evt: UserEvent) {
        if let Some(idx) = self.pipeline.seek_inbound(self.next_index()) {
            self.pipeline.invoke_at(idx, move |h, ctx| h.user_event_triggered(ctx, evt));
        }
    }
    pub fn fire_exception_caught(&self, err: Error) {
        if let Some(idx) = self.pipeline.seek_inbound(self.next_index()) {
            self.pipeline.invoke_at(idx, move |h, ctx| h.exception_caught(ctx, err));
        }
    }

    // ===== outbound: forward to the next outbound-capable peer =====

    pub fn bind_outward(&self, addr: SocketAddr, promise: Promise<()>) {
        if let Some(idx) = self.pipeline.seek_outbound(self.prev_index()) {
            self.pipeline.invoke_at(idx, move |h, ctx| h.bind(ctx, addr, promise));
        }
    }
    pub fn connect_outward(&self, addr: SocketAddr, promise: Promise<()>) {
        if let Some(idx) = self.pipeline.seek_outbound(self.prev_index()) {
            self.pipeline.invoke_at(idx, move |h, ctx| h.connect(ctx, addr, promise));
        }
    }
    pub fn disconnect_outward(&self, promise: Promise<()>) {
        if let Some(idx) = self.pipeline.seek_outbound(self.prev_index()) {
            self.pipeline.invoke_at(idx, move |h, ctx| h.disconnect(ctx, promise));
        }
    }
    pub fn close_outward(&self, promise: Promise<()>) {
        if let Some(idx) = self.pipeline.seek_outbound(self.prev_index()) {
            self.pipeline.invoke_at(idx, move |h, ctx| h.close(ctx, promise));
        }
    }
    pub fn deregister_outward(&self, promise: Promise<()>) {
        if let Some(idx) = self.pipeline.seek_outbound(self.prev_index()) {
            self.pipeline.invoke_at(idx, move |h, ctx| h.deregister(ctx, promise));
        }
    }
    pub fn read_outward(&self) {
        if let Some(idx) = self.pipeline.seek_outbound(self.prev_index()) {
            self.pipeline.invoke_at(idx, |h, ctx| h.read(ctx));
        }
    }
    pub fn write_outward(&self, msg: ByteBuf, promise: Promise<()>) {
        if let Some(idx) = self.pipeline.seek_outbound(self.prev_index()) {
            self.pipeline.invoke_at(idx, move |h, ctx| h.write(ctx, msg, promise));
        }
    }
    pub fn flush_outward(&self) {
        if let Some(idx) = self.pipeline.seek_outbound(self.prev_index()) {
            self.pipeline.invoke_at(idx, |h, ctx| h.flush(ctx));
        }
    }

    fn next_index(&self) -> usize {
        self.pipeline.next_of(self.index)
    }

    fn prev_index(&self) -> usize {
        self.pipeline.prev_of(self.index)
    }
}
