//! Typed per-channel configuration.
//!
//! spec.md §6 describes configuration as "a typed key-value map"; SPEC_FULL
//! §1 resolves this as a concrete builder/struct instead of a generic
//! string-keyed map, matching how the teacher configures things (typed
//! builders like `EventLoopBuilder` in `deprecated/event_loop.rs`).
//! Deprecated aliases are kept as setter methods that redirect to the
//! modern field, per spec.md §9.

use std::time::Duration;

/// The allocator a channel's read path should pull receive buffers from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvByteBufAllocatorKind {
    Pooled,
    Unpooled,
}

/// Per-channel socket and pipeline tuning knobs (spec.md §6).
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    recv_allocator: RecvByteBufAllocatorKind,
    so_rcvbuf: Option<usize>,
    so_sndbuf: Option<usize>,
    tcp_nodelay: bool,
    so_keepalive: bool,
    so_linger: Option<i32>,
    so_reuseaddr: bool,
    connect_timeout: Duration,
    write_spin_count: u32,
    write_buffer_high_water_mark: usize,
    write_buffer_low_water_mark: usize,
    auto_read: bool,
    auto_close: bool,
    allow_half_closure: bool,
    max_messages_per_read: usize,
}

impl ChannelConfig {
    pub fn new() -> ChannelConfig {
        ChannelConfig {
            recv_allocator: RecvByteBufAllocatorKind::Pooled,
            so_rcvbuf: None,
            so_sndbuf: None,
            tcp_nodelay: false,
            so_keepalive: false,
            so_linger: None,
            so_reuseaddr: false,
            connect_timeout: Duration::from_secs(30),
            write_spin_count: 16,
            write_buffer_high_water_mark: 64 * 1024,
            write_buffer_low_water_mark: 32 * 1024,
            auto_read: true,
            auto_close: true,
            allow_half_closure: false,
            max_messages_per_read: crate::event_loop::DEFAULT_MAX_MESSAGES_PER_READ,
        }
    }

    pub fn recv_allocator(&self) -> RecvByteBufAllocatorKind {
        self.recv_allocator
    }
    pub fn set_recv_allocator(&mut self, kind: RecvByteBufAllocatorKind) -> &mut Self {
        self.recv_allocator = kind;
        self
    }

    pub fn so_rcvbuf(&self) -> Option<usize> {
        self.so_rcvbuf
    }
    pub fn set_so_rcvbuf(&mut self, size: usize) -> &mut Self {
        self.so_rcvbuf = Some(size);
        self
    }

    pub fn so_sndbuf(&self) -> Option<usize> {
        self.so_sndbuf
    }
    pub fn set_so_sndbuf(&mut self, size: usize) -> &mut Self {
        self.so_sndbuf = Some(size);
        self
    }

    pub fn tcp_nodelay(&self) -> bool {
        self.tcp_nodelay
    }
    pub fn set_tcp_nodelay(&mut self, value: bool) -> &mut Self {
        self.tcp_nodelay = value;
        self
    }

    pub fn so_keepalive(&self) -> bool {
        self.so_keepalive
    }
    pub fn set_so_keepalive(&mut self, value: bool) -> &mut Self {
        self.so_keepalive = value;
        self
    }

    pub fn so_linger(&self) -> Option<i32> {
        self.so_linger
    }
    pub fn set_so_linger(&mut self, seconds: i32) -> &mut Self {
        self.so_linger = Some(seconds);
        self
    }

    pub fn so_reuseaddr(&self) -> bool {
        self.so_reuseaddr
    }
    pub fn set_so_reuseaddr(&mut self, value: bool) -> &mut Self {
        self.so_reuseaddr = value;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
    pub fn set_connect_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn write_spin_count(&self) -> u32 {
        self.write_spin_count
    }
    pub fn set_write_spin_count(&mut self, count: u32) -> &mut Self {
        self.write_spin_count = count;
        self
    }

    pub fn write_buffer_watermarks(&self) -> (usize, usize) {
        (self.write_buffer_low_water_mark, self.write_buffer_high_water_mark)
    }
    pub fn set_write_buffer_watermarks(&mut self, low: usize, high: usize) -> &mut Self {
        self.write_buffer_low_water_mark = low;
        self.write_buffer_high_water_mark = high;
        self
    }

    pub fn auto_read(&self) -> bool {
        self.auto_read
    }
    pub fn set_auto_read(&mut self, value: bool) -> &mut Self {
        self.auto_read = value;
        self
    }

    pub fn auto_close(&self) -> bool {
        self.auto_close
    }
    pub fn set_auto_close(&mut self, value: bool) -> &mut Self {
        self.auto_close = value;
        self
    }

    pub fn allow_half_closure(&self) -> bool {
        self.allow_half_closure
    }
    pub fn set_allow_half_closure(&mut self, value: bool) -> &mut Self {
        self.allow_half_closure = value;
        self
    }

    pub fn max_messages_per_read(&self) -> usize {
        self.max_messages_per_read
    }
    pub fn set_max_messages_per_read(&mut self, count: usize) -> &mut Self {
        self.max_messages_per_read = count;
        self
    }

    /// Deprecated alias for [`set_max_messages_per_read`](Self::set_max_messages_per_read)
    /// (spec.md §9: accept deprecated options and redirect to their modern
    /// equivalent).
    #[deprecated(note = "use set_max_messages_per_read")]
    pub fn set_max_messages_per_read_deprecated(&mut self, count: usize) -> &mut Self {
        self.set_max_messages_per_read(count)
    }

    /// Deprecated alias for [`set_write_buffer_watermarks`](Self::set_write_buffer_watermarks)'s
    /// high mark.
    #[deprecated(note = "use set_write_buffer_watermarks")]
    pub fn set_write_buffer_high_water_mark(&mut self, high: usize) -> &mut Self {
        self.write_buffer_high_water_mark = high;
        self
    }

    /// Deprecated alias for [`set_write_buffer_watermarks`](Self::set_write_buffer_watermarks)'s
    /// low mark.
    #[deprecated(note = "use set_write_buffer_watermarks")]
    pub fn set_write_buffer_low_water_mark(&mut self, low: usize) -> &mut Self {
        self.write_buffer_low_water_mark = low;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> ChannelConfig {
        ChannelConfig::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = ChannelConfig::new();
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.write_spin_count(), 16);
        assert_eq!(cfg.write_buffer_watermarks(), (32 * 1024, 64 * 1024));
        assert!(cfg.auto_read());
        assert!(cfg.auto_close());
        assert!(!cfg.allow_half_closure());
    }

    #[allow(deprecated)]
    #[test]
    fn deprecated_setters_redirect_to_modern_fields() {
        let mut cfg = ChannelConfig::new();
        cfg.set_max_messages_per_read_deprecated(4);
        assert_eq!(cfg.max_messages_per_read(), 4);
        cfg.set_write_buffer_high_water_mark(100);
        cfg.set_write_buffer_low_water_mark(50);
        assert_eq!(cfg.write_buffer_watermarks(), (50, 100));
    }
}
