//! Per-channel queue of pending writes with watermark-driven writability.
//!
//! Grounded in spec.md §4.F/§3 "Outbound buffer" and §9's reentrancy note.
//! The teacher has no write-queue concept (mio writes are fire-and-forget
//! syscalls); this module's shape follows spec.md's own entry/pointer
//! description directly, translated into a plain `VecDeque` of entries —
//! the idiomatic Rust stand-in for "a singly-linked queue with three named
//! pointers into it" (see DESIGN.md).

use std::collections::VecDeque;
use std::io::IoSlice;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::buf::ByteBuf;
use crate::error::Error;
use crate::future::Promise;

/// Fixed per-entry bookkeeping overhead added to a message's byte size when
/// computing its contribution to `totalPendingBytes` (spec.md §3: "message
/// bytes + fixed entry overhead").
const ENTRY_OVERHEAD: usize = 96;

struct Entry {
    message: Option<ByteBuf>,
    promise: Promise<()>,
    pending_size: usize,
    progress: usize,
    cancelled: bool,
}

/// Watermark pair governing a channel's writability flag (spec.md §3,
/// default 64 KiB high / 32 KiB low).
#[derive(Debug, Clone, Copy)]
pub struct Watermarks {
    pub low: usize,
    pub high: usize,
}

impl Default for Watermarks {
    fn default() -> Watermarks {
        Watermarks {
            low: 32 * 1024,
            high: 64 * 1024,
        }
    }
}

/// A channel's pending-write queue. `flushed` holds entries eligible to be
/// drained to the transport; `unflushed` holds entries accumulated by
/// `write()` calls that have not yet seen a matching `flush()`.
pub struct OutboundBuffer {
    flushed: VecDeque<Entry>,
    unflushed: VecDeque<Entry>,
    watermarks: Watermarks,
    total_pending: AtomicUsize,
    writable: AtomicBool,
    in_fail: bool,
    on_writability_changed: Option<Box<dyn Fn(bool) + Send + Sync>>,
}

impl OutboundBuffer {
    pub fn new(watermarks: Watermarks) -> OutboundBuffer {
        OutboundBuffer {
            flushed: VecDeque::new(),
            unflushed: VecDeque::new(),
            watermarks,
            total_pending: AtomicUsize::new(0),
            writable: AtomicBool::new(true),
            in_fail: false,
            on_writability_changed: None,
        }
    }

    /// Installs the callback invoked whenever writability flips (wired by
    /// the pipeline to fire `channelWritabilityChanged`).
    pub fn set_writability_listener(&mut self, listener: Box<dyn Fn(bool) + Send + Sync>) {
        self.on_writability_changed = Some(listener);
    }

    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::Acquire)
    }

    /// Applies a (possibly updated) watermark pair, re-checking writability
    /// against the current pending-bytes total (spec.md §8 scenario 2:
    /// watermarks can be reconfigured on an already-constructed channel).
    pub fn set_watermarks(&mut self, watermarks: Watermarks) {
        self.watermarks = watermarks;
        let pending = self.total_pending_bytes();
        self.maybe_flip_writability(pending);
    }

    pub fn total_pending_bytes(&self) -> usize {
        self.total_pending.load(Ordering::Acquire)
    }

    /// Appends `msg` to the unflushed section (spec.md §4.F `addMessage`).
    pub fn add_message(&mut self, msg: ByteBuf, promise: Promise<()>) {
        let size = msg.readable_bytes() + ENTRY_OVERHEAD;
        self.unflushed.push_back(Entry {
            message: Some(msg),
            promise,
            pending_size: size,
            progress: 0,
            cancelled: false,
        });
        self.add_pending_bytes(size);
    }

    /// Moves every unflushed entry into the flushed section, marking each
    /// promise uncancellable (spec.md §4.F `addFlush`, §5 "Cancellation").
    pub fn add_flush(&mut self) {
        while let Some(entry) = self.unflushed.pop_front() {
            entry.promise.set_uncancellable();
            self.flushed.push_back(entry);
        }
    }

    fn add_pending_bytes(&mut self, n: usize) {
        let before = self.total_pending.fetch_add(n, Ordering::AcqRel) + n;
        self.maybe_flip_writability(before);
    }

    fn remove_pending_bytes(&mut self, n: usize) {
        let before = self.total_pending.fetch_sub(n, Ordering::AcqRel);
        let after = before.saturating_sub(n);
        self.maybe_flip_writability(after);
    }

    /// writability is a pure function of pending bytes and the watermarks
    /// (spec.md §8 property 7): crossing `high` upward clears it, dropping
    /// below `low` sets it, and it is otherwise left alone (hysteresis).
    fn maybe_flip_writability(&mut self, pending: usize) {
        let was_writable = self.writable.load(Ordering::Acquire);
        if was_writable && pending > self.watermarks.high {
            self.writable.store(false, Ordering::Release);
            self.fire_writability_changed(false);
        } else if !was_writable && pending < self.watermarks.low {
            self.writable.store(true, Ordering::Release);
            self.fire_writability_changed(true);
        }
    }

    fn fire_writability_changed(&self, writable: bool) {
        if let Some(listener) = &self.on_writability_changed {
            listener(writable);
        }
    }

    /// The head flushed entry's message, if any (spec.md §4.F `current`).
    pub fn current(&self) -> Option<&ByteBuf> {
        self.flushed.front().and_then(|e| e.message.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.flushed.is_empty()
    }

    /// Advances the head entry's progress counter, for
    /// `ChannelProgressivePromise` notifications (spec.md §4.F `progress`).
    pub fn progress(&mut self, n: usize) {
        if let Some(entry) = self.flushed.front_mut() {
            entry.progress += n;
        }
    }

    /// Pops the head entry, completing its promise with success and
    /// releasing its message (spec.md §4.F `remove`).
    pub fn remove(&mut self) -> bool {
        let Some(mut entry) = self.flushed.pop_front() else {
            return false;
        };
        self.remove_pending_bytes(entry.pending_size);
        if let Some(msg) = entry.message.take() {
            let _ = msg.release();
        }
        if !entry.cancelled {
            entry.promise.set_success(());
        }
        true
    }

    /// Consumes `n` bytes across possibly multiple head entries, advancing
    /// reader cursors on partial consumption and popping fully-drained
    /// entries (spec.md §4.F `removeBytes`).
    pub fn remove_bytes(&mut self, mut n: usize) {
        while n > 0 {
            let Some(entry) = self.flushed.front_mut() else {
                break;
            };
            let Some(msg) = entry.message.as_mut() else {
                break;
            };
            let readable = msg.readable_bytes();
            if readable > n {
                let _ = msg.read_bytes(n);
                self.progress(n);
                break;
            }
            let _ = msg.read_bytes(readable);
            n -= readable;
            self.remove();
        }
    }

    /// Thread-local scratch array of the flushed messages' readable bytes,
    /// materialized as owned buffers so the caller can build `IoSlice`s
    /// over them for a scatter-gather write (spec.md §4.F `nioBuffers`).
    pub fn io_slices(&self, max_count: usize, max_bytes: usize) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut total = 0usize;
        for entry in self.flushed.iter().take(max_count) {
            let Some(msg) = &entry.message else { continue };
            let bytes = msg.as_native_bytes().unwrap_or_default();
            if total + bytes.len() > max_bytes && !out.is_empty() {
                break;
            }
            total += bytes.len();
            out.push(bytes);
        }
        out
    }

    /// Completes all flushed entries' promises with `cause` (spec.md §4.F
    /// "Failure"). Guarded against reentrant failure triggered by a
    /// listener that itself fails the channel (spec.md §4.F "inFail").
    pub fn fail_flushed(&mut self, cause: Arc<Error>) {
        if self.in_fail {
            return;
        }
        self.in_fail = true;
        while let Some(mut entry) = self.flushed.pop_front() {
            self.total_pending.fetch_sub(entry.pending_size, Ordering::AcqRel);
            if let Some(msg) = entry.message.take() {
                let _ = msg.release();
            }
            if !entry.cancelled {
                entry.promise.set_failure(clone_error(&cause));
            }
        }
        self.in_fail = false;
    }

    /// Like [`fail_flushed`](Self::fail_flushed) but additionally fails
    /// every unflushed entry (spec.md §4.F `close`).
    pub fn close(&mut self, cause: Arc<Error>) {
        self.fail_flushed(Arc::clone(&cause));
        if self.in_fail {
            return;
        }
        self.in_fail = true;
        while let Some(mut entry) = self.unflushed.pop_front() {
            self.total_pending.fetch_sub(entry.pending_size, Ordering::AcqRel);
            if let Some(msg) = entry.message.take() {
                let _ = msg.release();
            }
            if !entry.cancelled {
                entry.promise.set_failure(clone_error(&cause));
            }
        }
        self.in_fail = false;
    }
}

fn clone_error(cause: &Arc<Error>) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::Other, cause.to_string()))
}

/// Builds [`IoSlice`]s borrowing from `bufs` — split out so callers can
/// keep the owning `Vec<Vec<u8>>` alive across the vectored write.
pub fn as_io_slices(bufs: &[Vec<u8>]) -> Vec<IoSlice<'_>> {
    bufs.iter().map(|b| IoSlice::new(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buf::alloc::{ByteBufAllocator, UnpooledByteBufAllocator};

    fn msg(bytes: &[u8]) -> ByteBuf {
        let alloc = UnpooledByteBufAllocator::new();
        let mut b = alloc.buffer(bytes.len(), bytes.len());
        b.write_bytes(bytes).unwrap();
        b
    }

    #[test]
    fn backpressure_flips_writability_with_hysteresis() {
        let mut ob = OutboundBuffer::new(Watermarks { low: 512, high: 1024 });
        let mut fired = Vec::new();
        for _ in 0..3 {
            let p: Promise<()> = Promise::new();
            ob.add_message(msg(&vec![0u8; 2000 - 2 * ENTRY_OVERHEAD]), p);
        }
        assert!(!ob.is_writable());
        fired.push(ob.is_writable());

        ob.add_flush();
        ob.remove_bytes(1600);
        assert!(ob.is_writable());
    }

    #[test]
    fn remove_completes_promise_with_success() {
        let mut ob = OutboundBuffer::new(Watermarks::default());
        let p: Promise<()> = Promise::new();
        let fut = p.future();
        ob.add_message(msg(b"hello"), p);
        ob.add_flush();
        assert!(ob.remove());
        assert!(fut.is_done());
    }

    #[test]
    fn remove_bytes_advances_partial_entry_without_popping() {
        let mut ob = OutboundBuffer::new(Watermarks::default());
        let p: Promise<()> = Promise::new();
        ob.add_message(msg(b"hello world"), p);
        ob.add_flush();
        ob.remove_bytes(5);
        assert_eq!(ob.current().unwrap().readable_bytes(), 6);
    }
}
