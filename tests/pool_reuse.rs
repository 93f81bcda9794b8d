//! Scenario: releasing a pooled tiny/small buffer hands it back to the
//! calling thread's cache, and the next same-size allocation on that thread
//! is served from the cache instead of carving a fresh subpage out of a
//! chunk. Exercised here through the public `PooledByteBufAllocator`/`Arena`
//! surface only, as an external counterpart to the inline
//! `repeated_same_size_allocation_reuses_thread_cache` unit test.

use std::sync::atomic::Ordering;

use vortex::buf::alloc::{ByteBufAllocator, PooledByteBufAllocator};
use vortex::buf::ReferenceCounted;

#[test]
fn released_tiny_buffer_is_served_from_the_thread_cache_on_next_allocation() {
    let alloc = PooledByteBufAllocator::new();
    let arena = alloc.arena();

    let first = alloc.buffer(128, 128);
    assert_eq!(first.capacity(), 128);
    let tiny_after_first = arena.metrics.tiny_allocations.load(Ordering::SeqCst);
    assert_eq!(tiny_after_first, 1, "the first 128-byte request must carve a fresh tiny slot");

    assert!(first.release().unwrap());

    let second = alloc.buffer(128, 128);
    assert_eq!(second.capacity(), 128);
    let tiny_after_second = arena.metrics.tiny_allocations.load(Ordering::SeqCst);
    assert_eq!(
        tiny_after_second, tiny_after_first,
        "a same-size allocation following a release should come from the thread cache, not a fresh carve"
    );
    assert!(second.release().unwrap());
}

#[test]
fn released_small_buffer_is_served_from_the_thread_cache_on_next_allocation() {
    let alloc = PooledByteBufAllocator::new();
    let arena = alloc.arena();

    let first = alloc.buffer(1024, 1024);
    assert_eq!(first.capacity(), 1024);
    let small_after_first = arena.metrics.small_allocations.load(Ordering::SeqCst);
    assert_eq!(small_after_first, 1);

    assert!(first.release().unwrap());

    let second = alloc.buffer(1024, 1024);
    assert_eq!(second.capacity(), 1024);
    let small_after_second = arena.metrics.small_allocations.load(Ordering::SeqCst);
    assert_eq!(
        small_after_second, small_after_first,
        "a same-size small allocation following a release should come from the thread cache"
    );
    assert!(second.release().unwrap());
}

#[test]
fn normal_allocations_bypass_the_thread_cache_entirely() {
    // Normal-class requests (one full page or more, below the huge
    // threshold) always carve directly from a chunk; spec.md's thread
    // cache only covers tiny/small subpage slots.
    let alloc = PooledByteBufAllocator::new();
    let arena = alloc.arena();

    let first = alloc.buffer(vortex::buf::arena::PAGE_SIZE, vortex::buf::arena::PAGE_SIZE);
    assert!(first.release().unwrap());
    let normal_after_first = arena.metrics.normal_allocations.load(Ordering::SeqCst);
    assert_eq!(normal_after_first, 1);

    let second = alloc.buffer(vortex::buf::arena::PAGE_SIZE, vortex::buf::arena::PAGE_SIZE);
    let normal_after_second = arena.metrics.normal_allocations.load(Ordering::SeqCst);
    assert_eq!(
        normal_after_second, 2,
        "normal-class requests never consult the thread cache, so each allocation increments the counter"
    );
    assert!(second.release().unwrap());
}
