//! Readiness-source tokens and channel identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Associates an [`Evented`](crate::event::Source) registration with the
/// events `Poll` returns for it.
///
/// Grounded in mio's own `Token(pub usize)` (see e.g. `os/token.rs` in the
/// teacher): a plain newtype over the platform's event-data word, cheap to
/// copy and to pack into a `u64` selector payload.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Token(pub usize);

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

impl From<usize> for Token {
    fn from(val: usize) -> Token {
        Token(val)
    }
}

impl From<Token> for usize {
    fn from(val: Token) -> usize {
        val.0
    }
}

/// A process-unique, monotonically increasing channel identifier.
///
/// spec.md §4.D says every channel "carries a unique id" without specifying
/// how it is generated. Resolved here (see DESIGN.md) as a simple atomic
/// counter, the same pattern the teacher uses for `Selector::id` under
/// `debug_assertions` (`sys/unix/selector/epoll.rs`).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u64);

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

impl ChannelId {
    pub(crate) fn next() -> ChannelId {
        ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({:#x})", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
