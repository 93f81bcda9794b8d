//! The pooled arena: a jemalloc/Netty-style chunk allocator.
//!
//! Grounded in spec.md §4.A's allocation algorithm and §3's "Arena"/"Chunk"
//! data model. The teacher has nothing like this (mio never owns memory, it
//! only multiplexes readiness), so the binary-tree chunk and size-class
//! bookkeeping below follows the shape of Netty's `PoolChunk`/`PoolArena`
//! that spec.md itself distills, expressed with `parking_lot` locks and
//! `Vec`-backed pool lists in place of hand-rolled intrusive linked lists —
//! the natural Rust translation of "a doubly-linked list of same-sized
//! pages" (see DESIGN.md).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Height of the chunk's binary tree (spec.md §3: "height 11").
const MAX_ORDER: u32 = 11;
/// A leaf page is 8 KiB.
pub const PAGE_SIZE: usize = 8 * 1024;
const PAGE_SHIFT: u32 = 13;
/// Number of leaf pages in one chunk: `1 << MAX_ORDER`.
const NUM_PAGES: usize = 1 << MAX_ORDER;
/// A chunk is 16 MiB: `PAGE_SIZE * NUM_PAGES`.
pub const CHUNK_SIZE: usize = PAGE_SIZE * NUM_PAGES;
/// Tree node array length (1-indexed, root at index 1).
const MAP_LEN: usize = 1 << (MAX_ORDER + 1);
/// Sentinel `memory_map` value meaning "no free node anywhere in subtree".
const UNUSABLE: u8 = (MAX_ORDER + 1) as u8;

/// Upper bound (exclusive) of the tiny size-class range.
const TINY_LIMIT: usize = 512;
/// Tiny classes step by 16 bytes: 16, 32, ..., 496 (spec.md §4.A).
const TINY_STEP: usize = 16;
const NUM_TINY_CLASSES: usize = TINY_LIMIT / TINY_STEP; // 32 (index 0 unused, 1..=31 used)
/// Small classes are powers of two from 512 B up to half a page (4 KiB).
const SMALL_CLASSES: [usize; 4] = [512, 1024, 2048, 4096];

fn depth(id: u32) -> u32 {
    31 - id.leading_zeros()
}

/// Which allocation regime a normalized request falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Tiny,
    Small,
    Normal,
    Huge,
}

/// Classifies and normalizes a requested capacity per spec.md §4.A step 1.
///
/// The tiny/small split is decided on the *normalized* size, not the raw
/// request: rounding a request like 511 up to the nearest 16 bytes lands
/// exactly on 512, which belongs to the small range, not tiny's (mirrors
/// Netty's own `normalizeCapacity` before its `isTiny` check). Likewise
/// small/normal is decided on whether the normalized size still fits under
/// a full page; a request that rounds up to exactly one page is a `normal`
/// whole-page allocation, not a subpage slot.
pub fn classify(requested: usize) -> (SizeClass, usize) {
    if requested > CHUNK_SIZE {
        return (SizeClass::Huge, requested);
    }
    let tiny_normalized = ((requested + TINY_STEP - 1) / TINY_STEP).max(1) * TINY_STEP;
    if tiny_normalized < TINY_LIMIT {
        return (SizeClass::Tiny, tiny_normalized);
    }
    let small_normalized = requested.next_power_of_two().max(TINY_LIMIT);
    if small_normalized < PAGE_SIZE {
        return (SizeClass::Small, small_normalized);
    }
    (SizeClass::Normal, requested.next_power_of_two().max(PAGE_SIZE))
}

fn tiny_index(normalized: usize) -> usize {
    normalized / TINY_STEP
}

fn small_index(normalized: usize) -> usize {
    SMALL_CLASSES.iter().position(|&s| s == normalized).unwrap()
}

/// One 16 MiB chunk, subdivided by a full binary tree into 8 KiB pages.
///
/// `memory_map[id]` holds the depth of the shallowest free node in the
/// subtree rooted at `id`, or [`UNUSABLE`] once that subtree has no free
/// node left — Netty's `PoolChunk` encoding, which this follows directly.
pub(crate) struct Chunk {
    memory: Vec<u8>,
    memory_map: [u8; MAP_LEN],
    subpages: Vec<Option<PoolSubpage>>,
    free_bytes: usize,
    destroyed: bool,
}

impl Chunk {
    fn new() -> Chunk {
        let mut memory_map = [0u8; MAP_LEN];
        for id in 1..MAP_LEN {
            memory_map[id] = depth(id as u32) as u8;
        }
        Chunk {
            memory: vec![0u8; CHUNK_SIZE],
            memory_map,
            subpages: (0..NUM_PAGES).map(|_| None).collect(),
            free_bytes: CHUNK_SIZE,
            destroyed: false,
        }
    }

    fn usage_percent(&self) -> u8 {
        let used = CHUNK_SIZE - self.free_bytes;
        ((used as u64 * 100) / CHUNK_SIZE as u64) as u8
    }

    /// Allocates the leftmost free node at tree depth `d`, per the
    /// textbook buddy-tree walk (Netty `PoolChunk.allocateNode`).
    fn allocate_node(&mut self, d: u32) -> i32 {
        let mut id: u32 = 1;
        if self.memory_map[1] as u32 > d {
            return -1;
        }
        while (self.memory_map[id as usize] as u32) < d || depth(id) != d {
            id <<= 1;
            let val = self.memory_map[id as usize] as u32;
            if val > d {
                id ^= 1;
                let val2 = self.memory_map[id as usize] as u32;
                if val2 > d {
                    return -1;
                }
            }
        }
        let value = self.memory_map[id as usize];
        debug_assert_eq!(value as u32, d, "allocator picked a node at the wrong depth");
        self.memory_map[id as usize] = UNUSABLE;
        self.update_parents_alloc(id);
        id as i32
    }

    fn update_parents_alloc(&mut self, mut id: u32) {
        while id > 1 {
            let parent = id >> 1;
            let left = self.memory_map[(parent << 1) as usize];
            let right = self.memory_map[((parent << 1) | 1) as usize];
            self.memory_map[parent as usize] = left.min(right);
            id = parent;
        }
    }

    fn free_node(&mut self, id: u32) {
        let d = depth(id);
        self.memory_map[id as usize] = d as u8;
        self.update_parents_alloc(id);
    }

    fn run_length(d: u32) -> usize {
        PAGE_SIZE << (MAX_ORDER - d)
    }

    fn page_offset_of(id: u32) -> usize {
        let d = depth(id);
        let run = Self::run_length(d);
        let index_in_row = id - (1 << d);
        index_in_row as usize * run
    }

    /// Allocates a `normal`-class region of exactly `size` bytes (a power of
    /// two, page-size or larger). Returns the tree node id on success.
    fn allocate_normal(&mut self, size: usize) -> Option<u32> {
        let pages = size / PAGE_SIZE;
        let d = MAX_ORDER - (pages.trailing_zeros());
        let id = self.allocate_node(d);
        if id < 0 {
            return None;
        }
        self.free_bytes -= size;
        Some(id as u32)
    }

    fn free_normal(&mut self, id: u32) {
        let d = depth(id);
        self.free_bytes += Self::run_length(d);
        self.free_node(id);
    }

    /// Allocates a whole page (depth `MAX_ORDER`) to host a fresh
    /// [`PoolSubpage`] for `element_size`, returning the page index
    /// (`id - NUM_PAGES`, i.e. a value in `[0, NUM_PAGES)`).
    fn allocate_page_for_subpage(&mut self) -> Option<u32> {
        let id = self.allocate_node(MAX_ORDER);
        if id < 0 {
            return None;
        }
        self.free_bytes -= PAGE_SIZE;
        Some(id as u32)
    }

    fn free_page(&mut self, page_id: u32) {
        self.free_bytes += PAGE_SIZE;
        self.free_node(page_id);
    }

    fn region_offset(id: u32, subpage_slot: Option<u32>, element_size: usize) -> usize {
        let base = Self::page_offset_of(id);
        match subpage_slot {
            Some(slot) => base + (slot as usize) * element_size,
            None => base,
        }
    }
}

/// A page carved into equal-sized slots for tiny/small allocations.
struct PoolSubpage {
    element_size: usize,
    num_slots: usize,
    used: Vec<bool>,
    num_available: usize,
}

impl PoolSubpage {
    fn new(element_size: usize) -> PoolSubpage {
        let num_slots = PAGE_SIZE / element_size;
        PoolSubpage {
            element_size,
            num_slots,
            used: vec![false; num_slots],
            num_available: num_slots,
        }
    }

    fn allocate_slot(&mut self) -> Option<u32> {
        if self.num_available == 0 {
            return None;
        }
        let slot = self.used.iter().position(|&u| !u)?;
        self.used[slot] = true;
        self.num_available -= 1;
        Some(slot as u32)
    }

    fn free_slot(&mut self, slot: u32) {
        self.used[slot as usize] = false;
        self.num_available += 1;
    }

    fn is_full(&self) -> bool {
        self.num_available == 0
    }

    fn is_empty(&self) -> bool {
        self.num_available == self.num_slots
    }
}

/// Opaque allocation handle. Low 32 bits of `code` encode the chunk's tree
/// node id; high 32 bits encode the subpage slot index (`u32::MAX` when the
/// allocation is a whole `normal`-class node, not a subpage), per spec.md
/// §6's "Handle format".
#[derive(Clone)]
pub struct Handle {
    pub(crate) inner: HandleInner,
}

#[derive(Clone)]
pub(crate) enum HandleInner {
    /// Bypasses the chunk machinery entirely; still a plain growable `Vec`,
    /// but one `Handle`s can read/write/resize through like any pooled
    /// region, so `BufferCore` never needs to know which kind it holds.
    Huge {
        bytes: Arc<Mutex<Vec<u8>>>,
    },
    Pooled {
        arena: Arc<Arena>,
        chunk: Arc<Mutex<Chunk>>,
        code: u64,
        size_class: SizeClass,
        normalized_size: usize,
        offset: usize,
    },
}

const NO_SLOT: u32 = u32::MAX;

fn pack(node_id: u32, slot: u32) -> u64 {
    (node_id as u64) | ((slot as u64) << 32)
}

fn unpack(code: u64) -> (u32, u32) {
    (code as u32, (code >> 32) as u32)
}

impl Handle {
    pub fn len(&self) -> usize {
        match &self.inner {
            HandleInner::Huge { bytes } => bytes.lock().len(),
            HandleInner::Pooled { normalized_size, .. } => *normalized_size,
        }
    }

    /// Reads `[start, end)` out of the handle's live backing storage — the
    /// chunk's `memory` for a pooled handle, the owned `Vec` for a huge one.
    pub(crate) fn read_range(&self, start: usize, end: usize) -> Vec<u8> {
        match &self.inner {
            HandleInner::Huge { bytes } => bytes.lock()[start..end].to_vec(),
            HandleInner::Pooled { chunk, offset, .. } => {
                let c = chunk.lock();
                c.memory[offset + start..offset + end].to_vec()
            }
        }
    }

    /// Writes `src` into the handle's live backing storage starting at
    /// `start`.
    pub(crate) fn write_range(&self, start: usize, src: &[u8]) {
        match &self.inner {
            HandleInner::Huge { bytes } => bytes.lock()[start..start + src.len()].copy_from_slice(src),
            HandleInner::Pooled { chunk, offset, .. } => {
                let mut c = chunk.lock();
                let base = offset + start;
                c.memory[base..base + src.len()].copy_from_slice(src);
            }
        }
    }

    /// Shifts bytes within the handle's own region, e.g. for
    /// `discard_read_bytes`.
    pub(crate) fn copy_within_region(&self, src: std::ops::Range<usize>, dest: usize) {
        match &self.inner {
            HandleInner::Huge { bytes } => bytes.lock().copy_within(src, dest),
            HandleInner::Pooled { chunk, offset, .. } => {
                let mut c = chunk.lock();
                let base = *offset;
                c.memory.copy_within(base + src.start..base + src.end, base + dest);
            }
        }
    }

    /// Grows or shrinks this handle to exactly `new_len` bytes. A huge
    /// handle just resizes its own `Vec`; a pooled handle reallocates a
    /// fresh region from its arena (the chunk's carved region can't change
    /// size in place), copies the overlapping prefix across, and frees the
    /// old region — the same "allocate new, memcpy, free old" shape
    /// `PoolArena.reallocate` uses, translated to this arena's API.
    pub(crate) fn resize(&mut self, new_len: usize) {
        let realloc_arena = match &self.inner {
            HandleInner::Pooled { arena, normalized_size, .. } => {
                if classify(new_len).1 == *normalized_size {
                    return;
                }
                Some(Arc::clone(arena))
            }
            HandleInner::Huge { .. } => None,
        };
        match realloc_arena {
            Some(arena) => {
                let old = std::mem::replace(self, arena.allocate(new_len));
                let copy_len = old.len().min(new_len);
                if copy_len > 0 {
                    let bytes = old.read_range(0, copy_len);
                    self.write_range(0, &bytes);
                }
                arena.free(old);
            }
            None => {
                if let HandleInner::Huge { bytes } = &self.inner {
                    bytes.lock().resize(new_len, 0);
                }
            }
        }
    }
}

/// Per-thread recycling caches, one small MPSC-ish queue per size class
/// (spec.md §3 "Thread-local cache"). Trimmed every
/// [`TRIM_INTERVAL`](Arena::TRIM_INTERVAL) allocations.
struct ThreadCache {
    tiny: Vec<Vec<CachedEntry>>,
    small: Vec<Vec<CachedEntry>>,
    since_trim: usize,
}

struct CachedEntry {
    chunk: Arc<Mutex<Chunk>>,
    code: u64,
    normalized_size: usize,
    offset: usize,
}

impl ThreadCache {
    fn new() -> ThreadCache {
        ThreadCache {
            tiny: (0..NUM_TINY_CLASSES).map(|_| Vec::new()).collect(),
            small: (0..SMALL_CLASSES.len()).map(|_| Vec::new()).collect(),
            since_trim: 0,
        }
    }

    fn slot_for(&mut self, class: SizeClass, normalized: usize) -> &mut Vec<CachedEntry> {
        match class {
            SizeClass::Tiny => &mut self.tiny[tiny_index(normalized)],
            SizeClass::Small => &mut self.small[small_index(normalized)],
            _ => unreachable!("only tiny/small are cached"),
        }
    }
}

thread_local! {
    static CACHES: std::cell::RefCell<std::collections::HashMap<usize, ThreadCache>> =
        std::cell::RefCell::new(std::collections::HashMap::new());
}

/// Per-arena allocation counters, exposed read-only for the leak detector's
/// sweep and for tests verifying invariant 4 (total allocated bytes = sum
/// of chunk usage).
#[derive(Default)]
pub struct ArenaMetrics {
    pub tiny_allocations: AtomicU64,
    pub small_allocations: AtomicU64,
    pub normal_allocations: AtomicU64,
    pub huge_allocations: AtomicU64,
    pub active_bytes: AtomicUsize,
}

/// Default cache-trim cadence (spec.md §3: "every N allocations, default
/// 8192").
const TRIM_INTERVAL: usize = 8192;

/// A thread-independent allocator unit owning a set of [`Chunk`]s.
///
/// Chunks live in six usage-banded lists per spec.md §4.A; here each band
/// is a plain `Vec` behind one arena-wide lock rather than a hand-rolled
/// intrusive ring, which is the idiomatic Rust shape for "a handful of
/// small lists mutated under contention" (see DESIGN.md).
pub struct Arena {
    state: Mutex<ArenaState>,
    pub metrics: ArenaMetrics,
}

struct ArenaState {
    q_init: Vec<Arc<Mutex<Chunk>>>,
    q000: Vec<Arc<Mutex<Chunk>>>,
    q025: Vec<Arc<Mutex<Chunk>>>,
    q050: Vec<Arc<Mutex<Chunk>>>,
    q075: Vec<Arc<Mutex<Chunk>>>,
    q100: Vec<Arc<Mutex<Chunk>>>,
    tiny_pools: Vec<Vec<(Arc<Mutex<Chunk>>, u32)>>,
    small_pools: Vec<Vec<(Arc<Mutex<Chunk>>, u32)>>,
}

impl ArenaState {
    fn new() -> ArenaState {
        ArenaState {
            q_init: Vec::new(),
            q000: Vec::new(),
            q025: Vec::new(),
            q050: Vec::new(),
            q075: Vec::new(),
            q100: Vec::new(),
            tiny_pools: (0..NUM_TINY_CLASSES).map(|_| Vec::new()).collect(),
            small_pools: (0..SMALL_CLASSES.len()).map(|_| Vec::new()).collect(),
        }
    }

    /// Re-files `chunk` into the band matching its current usage,
    /// destroying it if usage falls to zero while it would otherwise drop
    /// out of `q000` (spec.md §3 "a chunk falling below q000's floor is
    /// destroyed").
    fn rehome(&mut self, chunk: &Arc<Mutex<Chunk>>) {
        self.q_init.retain(|c| !Arc::ptr_eq(c, chunk));
        self.q000.retain(|c| !Arc::ptr_eq(c, chunk));
        self.q025.retain(|c| !Arc::ptr_eq(c, chunk));
        self.q050.retain(|c| !Arc::ptr_eq(c, chunk));
        self.q075.retain(|c| !Arc::ptr_eq(c, chunk));
        self.q100.retain(|c| !Arc::ptr_eq(c, chunk));

        let pct = chunk.lock().usage_percent();
        if pct == 0 {
            chunk.lock().destroyed = true;
            return;
        }
        if pct < 25 {
            self.q_init.push(Arc::clone(chunk));
        } else if pct < 50 {
            self.q000.push(Arc::clone(chunk));
        } else if pct < 75 {
            self.q025.push(Arc::clone(chunk));
        } else if pct < 100 {
            self.q050.push(Arc::clone(chunk));
        } else {
            self.q100.push(Arc::clone(chunk));
        }
    }

    fn bands_in_alloc_order(&self) -> [&Vec<Arc<Mutex<Chunk>>>; 5] {
        [&self.q050, &self.q025, &self.q000, &self.q_init, &self.q075]
    }
}

impl Arena {
    pub fn new() -> Arc<Arena> {
        Arc::new(Arena {
            state: Mutex::new(ArenaState::new()),
            metrics: ArenaMetrics::default(),
        })
    }

    /// Allocates `requested` bytes, returning a [`Handle`] onto the live
    /// backing storage. Reads/writes go through the handle directly — the
    /// arena never hands back a private copy of the bytes.
    pub fn allocate(self: &Arc<Arena>, requested: usize) -> Handle {
        let (class, normalized) = classify(requested);
        match class {
            SizeClass::Huge => {
                self.metrics.huge_allocations.fetch_add(1, Ordering::Relaxed);
                self.metrics.active_bytes.fetch_add(requested, Ordering::Relaxed);
                Handle {
                    inner: HandleInner::Huge {
                        bytes: Arc::new(Mutex::new(vec![0u8; requested])),
                    },
                }
            }
            SizeClass::Tiny | SizeClass::Small => {
                self.metrics.active_bytes.fetch_add(normalized, Ordering::Relaxed);
                self.allocate_subpage(class, normalized)
            }
            SizeClass::Normal => {
                self.metrics.normal_allocations.fetch_add(1, Ordering::Relaxed);
                self.metrics.active_bytes.fetch_add(normalized, Ordering::Relaxed);
                self.allocate_normal(normalized)
            }
        }
    }

    fn cache_key(self: &Arc<Arena>) -> usize {
        Arc::as_ptr(self) as usize
    }

    fn try_cache(self: &Arc<Arena>, class: SizeClass, normalized: usize) -> Option<Handle> {
        let key = self.cache_key();
        CACHES.with(|caches| {
            let mut caches = caches.borrow_mut();
            let cache = caches.entry(key).or_insert_with(ThreadCache::new);
            let slot = cache.slot_for(class, normalized);
            let entry = slot.pop()?;
            Some(Handle {
                inner: HandleInner::Pooled {
                    arena: Arc::clone(self),
                    chunk: entry.chunk,
                    code: entry.code,
                    size_class: class,
                    normalized_size: entry.normalized_size,
                    offset: entry.offset,
                },
            })
        })
    }

    fn allocate_subpage(self: &Arc<Arena>, class: SizeClass, normalized: usize) -> Handle {
        if let Some(hit) = self.try_cache(class, normalized) {
            return hit;
        }
        // Only a thread-cache miss counts as an arena-level allocation
        // (spec.md §8 scenario 3: a cache hit must leave this counter
        // unchanged).
        match class {
            SizeClass::Tiny => self.metrics.tiny_allocations.fetch_add(1, Ordering::Relaxed),
            SizeClass::Small => self.metrics.small_allocations.fetch_add(1, Ordering::Relaxed),
            _ => unreachable!(),
        };

        let mut state = self.state.lock();
        let pools = match class {
            SizeClass::Tiny => &mut state.tiny_pools[tiny_index(normalized)],
            SizeClass::Small => &mut state.small_pools[small_index(normalized)],
            _ => unreachable!(),
        };

        for (chunk, page_id) in pools.iter() {
            let mut c = chunk.lock();
            if let Some(sub) = c.subpages[*page_id as usize].as_mut() {
                if sub.element_size == normalized && !sub.is_full() {
                    let slot = sub.allocate_slot().unwrap();
                    let offset = Chunk::region_offset(NUM_PAGES as u32 + *page_id, Some(slot), normalized);
                    let code = pack(NUM_PAGES as u32 + *page_id, slot);
                    drop(c);
                    return Handle {
                        inner: HandleInner::Pooled {
                            arena: Arc::clone(self),
                            chunk: Arc::clone(chunk),
                            code,
                            size_class: class,
                            normalized_size: normalized,
                            offset,
                        },
                    };
                }
            }
        }

        // Miss: carve a fresh page out of some chunk (allocating a new
        // chunk if none has room), per spec.md §4.A step 2.
        let (chunk, page_id) = self.carve_page(&mut state);
        {
            let mut c = chunk.lock();
            c.subpages[page_id as usize] = Some(PoolSubpage::new(normalized));
        }
        let pools = match class {
            SizeClass::Tiny => &mut state.tiny_pools[tiny_index(normalized)],
            SizeClass::Small => &mut state.small_pools[small_index(normalized)],
            _ => unreachable!(),
        };
        pools.push((Arc::clone(&chunk), page_id));

        let mut c = chunk.lock();
        let sub = c.subpages[page_id as usize].as_mut().unwrap();
        let slot = sub.allocate_slot().unwrap();
        let offset = Chunk::region_offset(NUM_PAGES as u32 + page_id, Some(slot), normalized);
        let code = pack(NUM_PAGES as u32 + page_id, slot);
        drop(c);
        state.rehome(&chunk);

        Handle {
            inner: HandleInner::Pooled {
                arena: Arc::clone(self),
                chunk,
                code,
                size_class: class,
                normalized_size: normalized,
                offset,
            },
        }
    }

    /// Allocates a whole free page from some existing chunk (iterating
    /// bands in the order spec.md §4.A step 3 names), creating a new chunk
    /// on total miss.
    fn carve_page(self: &Arc<Arena>, state: &mut ArenaState) -> (Arc<Mutex<Chunk>>, u32) {
        for band in state.bands_in_alloc_order() {
            for chunk in band {
                let mut c = chunk.lock();
                if let Some(id) = c.allocate_page_for_subpage() {
                    drop(c);
                    let chunk = Arc::clone(chunk);
                    state.rehome(&chunk);
                    return (chunk, id - NUM_PAGES as u32);
                }
            }
        }
        let chunk = Arc::new(Mutex::new(Chunk::new()));
        let id = chunk.lock().allocate_page_for_subpage().expect("fresh chunk always has room");
        state.q_init.push(Arc::clone(&chunk));
        (chunk, id - NUM_PAGES as u32)
    }

    fn allocate_normal(self: &Arc<Arena>, normalized: usize) -> Handle {
        let mut state = self.state.lock();
        for band in state.bands_in_alloc_order() {
            for chunk in band {
                let mut c = chunk.lock();
                if let Some(id) = c.allocate_normal(normalized) {
                    let offset = Chunk::page_offset_of(id);
                    drop(c);
                    let chunk = Arc::clone(chunk);
                    state.rehome(&chunk);
                    return Handle {
                        inner: HandleInner::Pooled {
                            arena: Arc::clone(self),
                            chunk,
                            code: pack(id, NO_SLOT),
                            size_class: SizeClass::Normal,
                            normalized_size: normalized,
                            offset,
                        },
                    };
                }
            }
        }

        let chunk = Arc::new(Mutex::new(Chunk::new()));
        let id = {
            let mut c = chunk.lock();
            c.allocate_normal(normalized).expect("fresh chunk always has room for <= chunk-size request")
        };
        let offset = Chunk::page_offset_of(id);
        state.q_init.push(Arc::clone(&chunk));

        Handle {
            inner: HandleInner::Pooled {
                arena: Arc::clone(self),
                chunk,
                code: pack(id, NO_SLOT),
                size_class: SizeClass::Normal,
                normalized_size: normalized,
                offset,
            },
        }
    }

    /// Releases `handle`. Offers tiny/small releases to the calling
    /// thread's cache first; on a full cache (or for normal-class
    /// handles), returns the region directly to its chunk.
    pub fn free(self: &Arc<Arena>, handle: Handle) {
        match handle.inner {
            HandleInner::Huge { bytes } => {
                self.metrics.active_bytes.fetch_sub(bytes.lock().len(), Ordering::Relaxed);
            }
            HandleInner::Pooled {
                arena: _,
                chunk,
                code,
                size_class,
                normalized_size,
                offset,
            } => {
                self.metrics.active_bytes.fetch_sub(normalized_size, Ordering::Relaxed);
                if matches!(size_class, SizeClass::Tiny | SizeClass::Small) {
                    if self.offer_to_cache(&chunk, code, size_class, normalized_size, offset) {
                        return;
                    }
                }
                self.free_directly(chunk, code, size_class);
            }
        }
    }

    fn offer_to_cache(
        self: &Arc<Arena>,
        chunk: &Arc<Mutex<Chunk>>,
        code: u64,
        class: SizeClass,
        normalized_size: usize,
        offset: usize,
    ) -> bool {
        let key = self.cache_key();
        let trimmed = CACHES.with(|caches| {
            let mut caches = caches.borrow_mut();
            let cache = caches.entry(key).or_insert_with(ThreadCache::new);
            let slot = cache.slot_for(class, normalized_size);
            const MAX_PER_CLASS: usize = 512;
            if slot.len() >= MAX_PER_CLASS {
                return false;
            }
            slot.push(CachedEntry {
                chunk: Arc::clone(chunk),
                code,
                normalized_size,
                offset,
            });
            cache.since_trim += 1;
            if cache.since_trim >= TRIM_INTERVAL {
                cache.since_trim = 0;
                true // caller should trim
            } else {
                false
            }
        });
        if trimmed {
            self.trim_thread_cache();
        }
        true
    }

    /// Drains this thread's cache for this arena back to the chunks they
    /// came from (spec.md §3: "trims periodically ... releasing unused
    /// entries back to the arena").
    pub fn trim_thread_cache(self: &Arc<Arena>) {
        let key = self.cache_key();
        let drained: Vec<(Arc<Mutex<Chunk>>, u64, SizeClass)> = CACHES.with(|caches| {
            let mut caches = caches.borrow_mut();
            let Some(cache) = caches.get_mut(&key) else {
                return Vec::new();
            };
            let mut out = Vec::new();
            for slot in cache.tiny.iter_mut().chain(cache.small.iter_mut()) {
                for entry in slot.drain(..) {
                    let class = if entry.normalized_size < TINY_LIMIT {
                        SizeClass::Tiny
                    } else {
                        SizeClass::Small
                    };
                    out.push((entry.chunk, entry.code, class));
                }
            }
            out
        });
        for (chunk, code, class) in drained {
            self.free_directly(chunk, code, class);
        }
    }

    fn free_directly(self: &Arc<Arena>, chunk: Arc<Mutex<Chunk>>, code: u64, class: SizeClass) {
        let (node_id, slot) = unpack(code);
        match class {
            SizeClass::Tiny | SizeClass::Small => {
                let mut c = chunk.lock();
                let page_id = (node_id - NUM_PAGES as u32) as usize;
                let fully_free = if let Some(sub) = c.subpages[page_id].as_mut() {
                    sub.free_slot(slot);
                    sub.is_empty()
                } else {
                    false
                };
                if fully_free {
                    c.subpages[page_id] = None;
                    c.free_page(node_id);
                }
                drop(c);
                let mut state = self.state.lock();
                if fully_free {
                    // Drop the now-stale (chunk, page_id) pool entry so the
                    // per-size-class pool list doesn't accumulate emptied
                    // pages forever.
                    let page_id = page_id as u32;
                    for pools in state.tiny_pools.iter_mut().chain(state.small_pools.iter_mut()) {
                        pools.retain(|(c, p)| !(Arc::ptr_eq(c, &chunk) && *p == page_id));
                    }
                }
                state.rehome(&chunk);
            }
            SizeClass::Normal => {
                chunk.lock().free_normal(node_id);
                self.state.lock().rehome(&chunk);
            }
            SizeClass::Huge => unreachable!("huge handles carry no chunk"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_tiny_small_normal_boundaries() {
        assert_eq!(classify(15), (SizeClass::Tiny, 16));
        assert_eq!(classify(511), (SizeClass::Small, 512));
        assert_eq!(classify(PAGE_SIZE), (SizeClass::Normal, PAGE_SIZE));
        assert_eq!(classify(PAGE_SIZE + 1), (SizeClass::Normal, PAGE_SIZE * 2));
    }

    #[test]
    fn huge_passes_through_unchanged() {
        assert_eq!(classify(CHUNK_SIZE + 1), (SizeClass::Huge, CHUNK_SIZE + 1));
    }

    #[test]
    fn allocate_then_free_returns_bytes_to_chunk() {
        let arena = Arena::new();
        let handle = arena.allocate(128);
        assert_eq!(handle.len(), 128);
        assert_eq!(arena.metrics.active_bytes.load(Ordering::Relaxed), 128);
        arena.free(handle);
        arena.trim_thread_cache();
        assert_eq!(arena.metrics.active_bytes.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn repeated_same_size_allocation_reuses_thread_cache() {
        let arena = Arena::new();
        let h1 = arena.allocate(128);
        arena.free(h1);
        let before = arena.metrics.tiny_allocations.load(Ordering::Relaxed);
        let h2 = arena.allocate(128);
        let after = arena.metrics.tiny_allocations.load(Ordering::Relaxed);
        assert_eq!(before, after, "the second allocation should have come from the thread cache");
        arena.free(h2);
    }

    #[test]
    fn normal_allocation_round_trips() {
        let arena = Arena::new();
        let handle = arena.allocate(PAGE_SIZE * 4);
        assert_eq!(handle.len(), PAGE_SIZE * 4);
        arena.free(handle);
    }

    #[test]
    fn reads_and_writes_go_through_the_same_backing_region() {
        let arena = Arena::new();
        let handle = arena.allocate(128);
        handle.write_range(0, b"hello");
        assert_eq!(&handle.read_range(0, 5), b"hello");
        arena.free(handle);
    }

    #[test]
    fn resize_preserves_bytes_across_reallocation() {
        let arena = Arena::new();
        let mut handle = arena.allocate(16);
        handle.write_range(0, b"abcd");
        handle.resize(64);
        assert_eq!(handle.len(), 64);
        assert_eq!(&handle.read_range(0, 4), b"abcd");
        arena.free(handle);
    }
}
