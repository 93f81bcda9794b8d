//! Allocator front door: the public entry point applications hold onto.
//!
//! spec.md §4.A describes allocation *behavior* but names no Rust-facing
//! type; `ByteBufAllocator` is the named seam this crate needs, mirrored on
//! the teacher's own pattern of a small public trait over an internal
//! mechanism (`event::Source` over `sys::Selector`).

use std::sync::Arc;

use super::arena::Arena;
use super::composite::CompositeByteBuf;
use super::{ByteBuf, Origin, Storage};

/// Produces buffers, pooled or not, heap or direct.
///
/// `heap_buffer`/`direct_buffer` are both backed by a `Vec<u8>` in this
/// safe-Rust implementation — there is no off-heap distinction once you
/// give up a managed heap, so "direct" here means only "prefer pooling",
/// matching spec.md §3's framing of direct buffers as the off-heap
/// counterpart to heap ones without mandating a specific representation
/// (see DESIGN.md).
pub trait ByteBufAllocator: Send + Sync {
    fn buffer(&self, initial_capacity: usize, max_capacity: usize) -> ByteBuf;

    fn heap_buffer(&self, initial_capacity: usize, max_capacity: usize) -> ByteBuf {
        self.buffer(initial_capacity, max_capacity)
    }

    fn direct_buffer(&self, initial_capacity: usize, max_capacity: usize) -> ByteBuf {
        self.buffer(initial_capacity, max_capacity)
    }

    fn composite_buffer(&self) -> CompositeByteBuf {
        CompositeByteBuf::new()
    }
}

/// Allocates straight from the global heap; every buffer is released to the
/// allocator (effectively freed) rather than recycled.
#[derive(Clone, Default)]
pub struct UnpooledByteBufAllocator;

impl UnpooledByteBufAllocator {
    pub fn new() -> UnpooledByteBufAllocator {
        UnpooledByteBufAllocator
    }
}

impl ByteBufAllocator for UnpooledByteBufAllocator {
    fn buffer(&self, initial_capacity: usize, max_capacity: usize) -> ByteBuf {
        ByteBuf::new_root(Storage::Owned(vec![0u8; initial_capacity]), max_capacity, Origin::Unpooled)
    }
}

/// Allocates from an [`Arena`], following spec.md §4.A's size-class routing
/// (tiny/small/normal through the arena's pooled path, huge as an
/// always-unpooled passthrough).
#[derive(Clone)]
pub struct PooledByteBufAllocator {
    arena: Arc<Arena>,
}

impl PooledByteBufAllocator {
    pub fn new() -> PooledByteBufAllocator {
        PooledByteBufAllocator { arena: Arena::new() }
    }

    pub fn with_arena(arena: Arc<Arena>) -> PooledByteBufAllocator {
        PooledByteBufAllocator { arena }
    }

    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }
}

impl Default for PooledByteBufAllocator {
    fn default() -> PooledByteBufAllocator {
        PooledByteBufAllocator::new()
    }
}

impl ByteBufAllocator for PooledByteBufAllocator {
    fn buffer(&self, initial_capacity: usize, max_capacity: usize) -> ByteBuf {
        let handle = self.arena.allocate(initial_capacity);
        ByteBuf::new_root(
            Storage::Chunked(handle),
            max_capacity,
            Origin::Pooled {
                arena: Arc::clone(&self.arena),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buf::rc::ReferenceCounted;

    #[test]
    fn pooled_allocator_round_trips_through_arena() {
        let alloc = PooledByteBufAllocator::new();
        let mut buf = alloc.buffer(100, 4096);
        assert_eq!(buf.capacity(), 112); // 100 rounds up to the next 16-byte tiny step
        buf.write_bytes(b"hi").unwrap();
        assert_eq!(buf.readable_bytes(), 2);
        assert!(buf.release().unwrap());
    }

    #[test]
    fn unpooled_allocator_gives_exact_capacity() {
        let alloc = UnpooledByteBufAllocator::new();
        let buf = alloc.buffer(10, 100);
        assert_eq!(buf.capacity(), 10);
    }

    #[test]
    fn pooled_buffer_growth_reallocates_and_preserves_bytes() {
        let alloc = PooledByteBufAllocator::new();
        let mut buf = alloc.buffer(4, 4096);
        assert_eq!(buf.capacity(), 16);
        buf.write_bytes(&[0u8; 16]).unwrap();
        buf.write_u8(0xAB).unwrap();
        assert_eq!(buf.capacity(), 32);
        assert_eq!(buf.get_u8(16).unwrap(), 0xAB);
        assert!(buf.release().unwrap());
    }
}
