// Not every scenario test uses every helper here.
#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Once;
use std::time::{Duration, Instant};

use vortex::EventLoop;

pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        env_logger::try_init().expect("unable to initialise logger");
    })
}

pub fn loopback() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
}

/// Ticks `loop_` until `done` reports true or `timeout` elapses, sleeping a
/// little between ticks so a background connect/accept thread gets to run.
/// Mirrors the hand-rolled polling loop every single-file test in
/// `src/channel/tcp.rs` already uses, factored out so scenario tests don't
/// each repeat it.
pub fn tick_until(loop_: &mut EventLoop, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        loop_.tick();
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return done();
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
