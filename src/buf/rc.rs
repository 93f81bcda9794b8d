//! Explicit, atomic reference counting for pooled objects.
//!
//! Unlike `Arc`'s implicit strong count, a [`ReferenceCounted`] object
//! starts life at count 1 already "held" by its creator and must be
//! explicitly `release()`d; dropping one while the count is still nonzero
//! is a leak, not a deallocation (spec.md §4.B).

use crate::error::Result;

pub trait ReferenceCounted {
    /// Current reference count. Racy the instant it's read if other
    /// threads hold references, same as Netty's `refCnt()`.
    fn ref_count(&self) -> usize;

    fn retain(&self) -> Result<()>;

    fn retain_n(&self, n: usize) -> Result<()>;

    /// Releases one reference. Returns `true` if this call brought the
    /// count to zero (and therefore deallocated the object).
    fn release(&self) -> Result<bool>;

    fn release_n(&self, n: usize) -> Result<bool>;

    /// Records that this object is still reachable, for the leak
    /// detector's sampled finalizer records.
    fn touch(&self);
}
