//! A one-shot handler that installs the "real" pipeline on
//! `channelRegistered`, then removes itself (spec.md §6).
//!
//! Mirrors the common bootstrap pattern of registering a single setup
//! handler rather than building the whole pipeline before the channel
//! exists: by the time `initChannel`-equivalent code runs, the channel's
//! event loop, id, and local/remote addresses are already available to it.

use std::sync::{Arc, Mutex};

use super::context::HandlerContext;
use super::handler::Handler;
use super::Pipeline;

type Init = Box<dyn FnOnce(&Arc<Pipeline>) + Send>;

pub struct ChannelInitializer {
    init: Mutex<Option<Init>>,
}

impl ChannelInitializer {
    pub fn new<F>(init: F) -> ChannelInitializer
    where
        F: FnOnce(&Arc<Pipeline>) + Send + 'static,
    {
        ChannelInitializer {
            init: Mutex::new(Some(Box::new(init))),
        }
    }
}

impl Handler for ChannelInitializer {
    fn channel_registered(&mut self, ctx: &HandlerContext) {
        if let Some(init) = self.init.lock().unwrap().take() {
            let pipeline = Arc::clone(ctx.pipeline());
            init(&pipeline);
            pipeline.remove(&ctx.name());
        }
        ctx.fire_channel_registered();
    }
}
