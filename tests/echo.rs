//! Scenario: a client writes a line, a server-side handler upper-cases and
//! echoes it back, and the client's write promise completes once the
//! outbound buffer has drained.

mod support;

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use vortex::buf::alloc::ByteBufAllocator;
use vortex::channel::{Channel, ChannelFacade, TcpChannel, TcpServerChannel};
use vortex::pipeline::{Handler, HandlerContext};
use vortex::{EventLoop, Promise};

struct UppercaseEcho;

impl Handler for UppercaseEcho {
    fn channel_read(&mut self, ctx: &HandlerContext, buf: vortex::buf::ByteBuf) {
        use vortex::buf::ReferenceCounted;
        let bytes = buf.as_native_bytes().unwrap_or_default();
        let _ = buf.release();
        let upper: Vec<u8> = bytes.iter().map(u8::to_ascii_uppercase).collect();
        let mut out = ctx.channel().alloc().buffer(upper.len(), upper.len());
        out.write_bytes(&upper).unwrap();
        ctx.write_outward(out, Promise::new());
        ctx.flush_outward();
    }
}

#[test]
fn echo_round_trip_uppercases_and_completes_the_write_promise() {
    support::init();
    let mut loop_ = EventLoop::new().expect("event loop");
    let handle = loop_.handle();

    let server = TcpServerChannel::new(handle.clone());
    server.set_accept_handler(|child: Arc<TcpChannel>| {
        child.pipeline().add_last("uppercase-echo", true, true, Box::new(UppercaseEcho));
    });

    let bind_promise: Promise<()> = Promise::new();
    let bind_fut = bind_promise.future();
    server.pipeline().bind(support::loopback(), bind_promise);
    assert!(support::tick_until(&mut loop_, Duration::from_secs(2), || bind_fut.is_done()));
    let addr = server.local_addr().expect("bound address");

    let client = TcpChannel::new(handle.clone());
    let connect_promise: Promise<()> = Promise::new();
    let connect_fut = connect_promise.future();
    client.pipeline().connect(addr, connect_promise);
    assert!(support::tick_until(&mut loop_, Duration::from_secs(2), || connect_fut.is_done()));

    let (got_tx, got_rx) = mpsc::channel();
    client.pipeline().add_last(
        "capture",
        true,
        false,
        Box::new({
            struct Capture(mpsc::Sender<Vec<u8>>);
            impl Handler for Capture {
                fn channel_read(&mut self, _ctx: &HandlerContext, buf: vortex::buf::ByteBuf) {
                    use vortex::buf::ReferenceCounted;
                    let bytes = buf.as_native_bytes().unwrap_or_default();
                    let _ = buf.release();
                    self.0.send(bytes).ok();
                }
            }
            Capture(got_tx)
        }),
    );

    let write_promise: Promise<()> = Promise::new();
    let write_fut = write_promise.future();
    let mut msg = client.alloc().buffer(10, 10);
    msg.write_bytes(b"hello vtx\n").unwrap();
    client.pipeline().write(msg, write_promise);
    client.pipeline().flush();

    assert!(support::tick_until(&mut loop_, Duration::from_secs(2), || write_fut.is_done()));

    let mut echoed = None;
    assert!(support::tick_until(&mut loop_, Duration::from_secs(2), || {
        if let Ok(bytes) = got_rx.try_recv() {
            echoed = Some(bytes);
            true
        } else {
            false
        }
    }));
    assert_eq!(echoed.as_deref(), Some(&b"HELLO VTX\n"[..]));
}
