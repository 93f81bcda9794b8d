//! Scenario: writability flips off once pending bytes cross the configured
//! high watermark, and flips back on once the transport has drained enough
//! to cross back under the low watermark. Exercises the wiring between
//! `OutboundBuffer`'s hysteresis and `TcpChannel`'s
//! `channelWritabilityChanged` event, not just the buffer in isolation
//! (already covered at the unit level in `outbound_buffer.rs`).

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vortex::buf::alloc::ByteBufAllocator;
use vortex::channel::{Channel, ChannelFacade, TcpChannel, TcpServerChannel};
use vortex::pipeline::{Handler, HandlerContext};
use vortex::{EventLoop, Promise};

struct CountWritabilityChanges(Arc<AtomicUsize>);

impl Handler for CountWritabilityChanges {
    fn channel_writability_changed(&mut self, ctx: &HandlerContext) {
        self.0.fetch_add(1, Ordering::SeqCst);
        ctx.fire_channel_writability_changed();
    }
}

/// A server handler that absorbs whatever it reads without echoing, so the
/// client's writes actually drain from its outbound buffer via real
/// transport I/O instead of piling up against a peer that never reads.
struct Sink;
impl Handler for Sink {
    fn channel_read(&mut self, _ctx: &HandlerContext, buf: vortex::buf::ByteBuf) {
        use vortex::buf::ReferenceCounted;
        let _ = buf.release();
    }
}

#[test]
fn writability_flips_off_under_load_and_back_on_after_drain() {
    support::init();
    let mut loop_ = EventLoop::new().expect("event loop");
    let handle = loop_.handle();

    let server = TcpServerChannel::new(handle.clone());
    server.set_accept_handler(|child: Arc<TcpChannel>| {
        child.pipeline().add_last("sink", true, false, Box::new(Sink));
    });
    let bind_promise: Promise<()> = Promise::new();
    let bind_fut = bind_promise.future();
    server.pipeline().bind(support::loopback(), bind_promise);
    assert!(support::tick_until(&mut loop_, Duration::from_secs(2), || bind_fut.is_done()));
    let addr = server.local_addr().expect("bound address");

    let client = TcpChannel::new(handle.clone());
    client.config().lock().set_write_buffer_watermarks(512, 1024);
    let connect_promise: Promise<()> = Promise::new();
    let connect_fut = connect_promise.future();
    client.pipeline().connect(addr, connect_promise);
    assert!(support::tick_until(&mut loop_, Duration::from_secs(2), || connect_fut.is_done()));

    let changes = Arc::new(AtomicUsize::new(0));
    client.pipeline().add_last(
        "count-writability",
        true,
        false,
        Box::new(CountWritabilityChanges(Arc::clone(&changes))),
    );

    assert!(client.is_writable());

    // Enqueue well past the high watermark without flushing: writability
    // must already reflect the unflushed backlog (spec.md §4.F `addMessage`
    // updates `totalPendingBytes` regardless of flush state).
    for _ in 0..4 {
        let mut msg = client.alloc().buffer(512, 512);
        msg.write_bytes(&vec![0u8; 512]).unwrap();
        client.pipeline().write(msg, Promise::new());
    }

    assert!(!client.is_writable(), "2048 pending bytes should exceed the 1024-byte high watermark");
    assert_eq!(changes.load(Ordering::SeqCst), 1, "writability should flip exactly once going unwritable");

    // Flush and let the real transport drain everything through a live
    // event loop; the sink on the other end keeps reading so the buffer
    // empties rather than backing up on both sides.
    client.pipeline().flush();
    assert!(support::tick_until(&mut loop_, Duration::from_secs(2), || client.is_writable()));
    assert_eq!(
        changes.load(Ordering::SeqCst),
        2,
        "writability should flip exactly once more going writable again"
    );
}
