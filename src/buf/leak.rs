//! Sampled leak detection for pooled buffers.
//!
//! A buffer that is dropped while its reference count is still nonzero
//! never went through `release()` and is therefore a leak (spec.md §4.B).
//! Tracking every single buffer is too expensive to run by default, so —
//! mirroring the corpus's allocator examples — only a sample of
//! allocations carry a live guard; the rest skip tracking entirely.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use log::warn;
use rand::Rng;

/// Controls how much leak-tracking overhead buffers pay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeakDetectionLevel {
    /// No tracking at all.
    Disabled,
    /// Samples roughly 1 in 128 allocations.
    Simple,
    /// Samples roughly 1 in 16 allocations and records the allocation
    /// site's call stack (callers provide it via `touch`-style hints —
    /// vortex doesn't capture real stack traces, see DESIGN.md).
    Advanced,
    /// Tracks every single allocation. Only meant for debugging a
    /// suspected leak, never for production.
    Paranoid,
}

impl LeakDetectionLevel {
    fn sample_one_in(self) -> Option<u32> {
        match self {
            LeakDetectionLevel::Disabled => None,
            LeakDetectionLevel::Simple => Some(128),
            LeakDetectionLevel::Advanced => Some(16),
            LeakDetectionLevel::Paranoid => Some(1),
        }
    }
}

static LEVEL: AtomicU8 = AtomicU8::new(1); // Simple by default

fn level_to_u8(level: LeakDetectionLevel) -> u8 {
    match level {
        LeakDetectionLevel::Disabled => 0,
        LeakDetectionLevel::Simple => 1,
        LeakDetectionLevel::Advanced => 2,
        LeakDetectionLevel::Paranoid => 3,
    }
}

fn u8_to_level(v: u8) -> LeakDetectionLevel {
    match v {
        0 => LeakDetectionLevel::Disabled,
        1 => LeakDetectionLevel::Simple,
        2 => LeakDetectionLevel::Advanced,
        _ => LeakDetectionLevel::Paranoid,
    }
}

/// Sets the process-wide leak detection level. Takes effect for buffers
/// allocated after the call.
pub fn set_level(level: LeakDetectionLevel) {
    LEVEL.store(level_to_u8(level), Ordering::Relaxed);
}

pub fn level() -> LeakDetectionLevel {
    u8_to_level(LEVEL.load(Ordering::Relaxed))
}

fn sampled(one_in: u32) -> bool {
    if one_in <= 1 {
        return true;
    }
    thread_rng_cell().with(|cell| cell.borrow_mut().random_range(0..one_in) == 0)
}

// `rand::rng()` is already thread-local; this just keeps the exact
// `ThreadRng` type name out of the rest of the module.
fn thread_rng_cell() -> &'static std::thread::LocalKey<std::cell::RefCell<rand::rngs::ThreadRng>> {
    thread_local! {
        static RNG: std::cell::RefCell<rand::rngs::ThreadRng> = std::cell::RefCell::new(rand::rng());
    }
    &RNG
}

/// A per-allocation tracking record. Present only for sampled allocations;
/// logs a warning if dropped before `close()` is called.
pub(crate) struct LeakGuard {
    closed: AtomicBool,
}

impl LeakGuard {
    pub(crate) fn maybe_attach() -> Option<LeakGuard> {
        let one_in = level().sample_one_in()?;
        if !sampled(one_in) {
            return None;
        }
        Some(LeakGuard {
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn touch(&self) {
        // Advanced/paranoid levels would append a record of the access
        // site here; vortex keeps only the latest live/closed bit.
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

impl Drop for LeakGuard {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Relaxed) {
            warn!(
                "LEAK: a sampled ByteBuf was garbage collected without being released; \
                 increase leak detection level to advanced/paranoid to capture the allocation site"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paranoid_always_samples() {
        set_level(LeakDetectionLevel::Paranoid);
        assert!(LeakGuard::maybe_attach().is_some());
    }

    #[test]
    fn disabled_never_samples() {
        set_level(LeakDetectionLevel::Disabled);
        assert!(LeakGuard::maybe_attach().is_none());
        set_level(LeakDetectionLevel::Simple);
    }
}
