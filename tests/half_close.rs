//! Scenario: with `allow-half-closure=true`, a remote EOF fires
//! `ChannelInputShutdown` but leaves the channel active for outbound writes;
//! a subsequent explicit close then fires `channelInactive` (spec.md §8
//! scenario 5).

mod support;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vortex::channel::{Channel, ChannelFacade, TcpChannel, TcpServerChannel};
use vortex::pipeline::{Handler, HandlerContext, UserEvent};
use vortex::{EventLoop, Promise};

#[derive(Default)]
struct Flags {
    input_shutdown: AtomicBool,
    inactive_count: AtomicUsize,
}

struct Observer(Arc<Flags>);

impl Handler for Observer {
    fn user_event_triggered(&mut self, _ctx: &HandlerContext, event: UserEvent) {
        if matches!(event, UserEvent::InputShutdown) {
            self.0.input_shutdown.store(true, Ordering::SeqCst);
        }
    }

    fn channel_inactive(&mut self, _ctx: &HandlerContext) {
        self.0.inactive_count.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn remote_eof_with_half_closure_keeps_channel_active_until_explicit_close() {
    support::init();
    let mut loop_ = EventLoop::new().expect("event loop");
    let handle = loop_.handle();

    let flags = Arc::new(Flags::default());
    let accepted: Arc<std::sync::Mutex<Option<Arc<TcpChannel>>>> = Arc::new(std::sync::Mutex::new(None));

    let server = TcpServerChannel::new(handle.clone());
    {
        let flags = Arc::clone(&flags);
        let accepted = Arc::clone(&accepted);
        server.set_accept_handler(move |child: Arc<TcpChannel>| {
            child.config().lock().set_allow_half_closure(true);
            child
                .pipeline()
                .add_last("observer", true, false, Box::new(Observer(Arc::clone(&flags))));
            *accepted.lock().unwrap() = Some(child);
        });
    }

    let bind_promise: Promise<()> = Promise::new();
    let bind_fut = bind_promise.future();
    server.pipeline().bind(support::loopback(), bind_promise);
    assert!(support::tick_until(&mut loop_, Duration::from_secs(2), || bind_fut.is_done()));
    let addr = server.local_addr().expect("bound address");

    // The peer connects and immediately drops, delivering EOF to the
    // accepted channel without the test needing its own TcpChannel wiring.
    let peer = std::net::TcpStream::connect(addr).expect("peer connect");
    drop(peer);

    assert!(support::tick_until(&mut loop_, Duration::from_secs(2), || {
        flags.input_shutdown.load(Ordering::SeqCst)
    }));

    let child = accepted.lock().unwrap().clone().expect("accepted channel");
    assert!(child.is_active(), "half-closed channel must remain active for outbound writes");
    assert_eq!(flags.inactive_count.load(Ordering::SeqCst), 0);

    let close_promise: Promise<()> = Promise::new();
    let close_fut = close_promise.future();
    child.pipeline().close(close_promise);
    assert!(support::tick_until(&mut loop_, Duration::from_secs(2), || close_fut.is_done()));
    assert_eq!(flags.inactive_count.load(Ordering::SeqCst), 1);
}
