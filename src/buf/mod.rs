//! The pooled buffer: a contiguous byte container with independent
//! reader/writer cursors, derived views, and explicit reference counting.
//!
//! This is the component spec.md §4.A calls out as the core's largest
//! share (~40%). The teacher has no analogue to a managed byte buffer — it
//! only multiplexes readiness — so this module is grounded instead in the
//! corpus's buffer/pool examples (`other_examples/...ksvc-core-src-buffer`,
//! `...zerocopy-src-buffer`, `...strata-transport-src-pool`) for the general
//! cursor/slice shape, combined with spec.md §3/§4.A's exact contract.

mod composite;
mod leak;
mod rc;

pub mod alloc;
pub mod arena;

pub use composite::CompositeByteBuf;
pub use leak::LeakDetectionLevel;
pub use rc::ReferenceCounted;

use std::cmp;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, RefCountFault, Result};

/// Byte order used by a buffer's multi-byte accessors.
///
/// Big-endian is the default per spec.md §6; every width also has an
/// explicit little-endian (`*_le`) accessor regardless of the buffer's
/// configured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

impl Default for ByteOrder {
    fn default() -> ByteOrder {
        ByteOrder::BigEndian
    }
}

/// How a buffer's backing storage was obtained, and how to give it back.
#[derive(Clone)]
pub(crate) enum Origin {
    /// Allocated straight from the global/heap allocator; dropped normally.
    Unpooled,
    /// Allocated from an arena; on release, the handle held by [`Storage`]
    /// must be returned to this arena.
    Pooled { arena: Arc<arena::Arena> },
}

/// Where a buffer's bytes actually live.
///
/// A pooled buffer's storage is a live window into its arena chunk (or, for
/// a huge allocation, an owned `Vec` the handle itself carries) — every
/// accessor below reads and writes straight through the handle rather than
/// a private copy, so pooling actually reuses memory instead of just
/// bookkeeping offsets.
enum Storage {
    Owned(Vec<u8>),
    Chunked(arena::Handle),
}

impl Storage {
    fn len(&self) -> usize {
        match self {
            Storage::Owned(v) => v.len(),
            Storage::Chunked(h) => h.len(),
        }
    }

    fn get_range(&self, start: usize, end: usize) -> Vec<u8> {
        match self {
            Storage::Owned(v) => v[start..end].to_vec(),
            Storage::Chunked(h) => h.read_range(start, end),
        }
    }

    fn get_byte(&self, index: usize) -> u8 {
        match self {
            Storage::Owned(v) => v[index],
            Storage::Chunked(h) => h.read_range(index, index + 1)[0],
        }
    }

    fn set_range(&mut self, start: usize, src: &[u8]) {
        match self {
            Storage::Owned(v) => v[start..start + src.len()].copy_from_slice(src),
            Storage::Chunked(h) => h.write_range(start, src),
        }
    }

    fn set_byte(&mut self, index: usize, value: u8) {
        match self {
            Storage::Owned(v) => v[index] = value,
            Storage::Chunked(h) => h.write_range(index, &[value]),
        }
    }

    fn copy_within(&mut self, src: std::ops::Range<usize>, dest: usize) {
        match self {
            Storage::Owned(v) => v.copy_within(src, dest),
            Storage::Chunked(h) => h.copy_within_region(src, dest),
        }
    }

    fn resize(&mut self, new_len: usize) {
        match self {
            Storage::Owned(v) => v.resize(new_len, 0),
            Storage::Chunked(h) => h.resize(new_len),
        }
    }
}

struct BufferCore {
    data: Mutex<Storage>,
    refcount: AtomicUsize,
    max_capacity: usize,
    origin: Origin,
}

const MAX_REFCOUNT: usize = usize::MAX / 2;

impl BufferCore {
    fn retain_by(&self, n: usize) -> Result<()> {
        let mut cur = self.refcount.load(Ordering::Relaxed);
        loop {
            if cur == 0 {
                return Err(Error::IllegalReferenceCount(RefCountFault::AccessAfterFree));
            }
            let next = cur
                .checked_add(n)
                .filter(|&v| v <= MAX_REFCOUNT)
                .ok_or(Error::IllegalReferenceCount(RefCountFault::Overflow))?;
            match self.refcount.compare_exchange_weak(
                cur,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => cur = observed,
            }
        }
    }

    /// Releases `n` references; returns `true` if the count reached zero as
    /// a result of this call (caller should deallocate).
    fn release_by(&self, n: usize) -> Result<bool> {
        let mut cur = self.refcount.load(Ordering::Relaxed);
        loop {
            if cur < n {
                return Err(Error::IllegalReferenceCount(RefCountFault::Underflow));
            }
            let next = cur - n;
            match self.refcount.compare_exchange_weak(
                cur,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(next == 0),
                Err(observed) => cur = observed,
            }
        }
    }

    fn count(&self) -> usize {
        self.refcount.load(Ordering::Relaxed)
    }
}

/// A pooled or unpooled byte buffer with independent reader/writer cursors.
///
/// Layout per spec.md §3: `0 <= reader <= writer <= capacity <= max_capacity`.
/// `[0, reader)` is discardable, `[reader, writer)` readable, `[writer,
/// capacity)` writable.
pub struct ByteBuf {
    core: Arc<BufferCore>,
    /// Offset of this view's window into `core`'s storage. Zero for the
    /// root buffer and for `duplicate()`s (which share the full window);
    /// nonzero for `slice()`/`readSlice()` derivations.
    base_offset: usize,
    /// Fixed window length for slice-style views; ignored (the live core
    /// length is used instead) for root/duplicate views.
    fixed_capacity: usize,
    /// Slices cannot grow or have their capacity changed; duplicates
    /// (and the root) can.
    is_slice: bool,
    reader: usize,
    writer: usize,
    mark_reader: usize,
    mark_writer: usize,
    order: ByteOrder,
    leak_guard: Option<leak::LeakGuard>,
}

impl ByteBuf {
    pub(crate) fn new_root(initial: Storage, max_capacity: usize, origin: Origin) -> ByteBuf {
        let capacity = initial.len();
        let core = Arc::new(BufferCore {
            data: Mutex::new(initial),
            refcount: AtomicUsize::new(1),
            max_capacity,
            origin,
        });
        ByteBuf {
            core,
            base_offset: 0,
            fixed_capacity: capacity,
            is_slice: false,
            reader: 0,
            writer: 0,
            mark_reader: 0,
            mark_writer: 0,
            order: ByteOrder::default(),
            leak_guard: leak::LeakGuard::maybe_attach(),
        }
    }

    // ===== cursors =====

    pub fn reader_index(&self) -> usize {
        self.reader
    }

    pub fn writer_index(&self) -> usize {
        self.writer
    }

    pub fn capacity(&self) -> usize {
        if self.is_slice {
            self.fixed_capacity
        } else {
            self.core.data.lock().len()
        }
    }

    pub fn max_capacity(&self) -> usize {
        if self.is_slice {
            self.fixed_capacity
        } else {
            self.core.max_capacity
        }
    }

    pub fn readable_bytes(&self) -> usize {
        self.writer - self.reader
    }

    pub fn writable_bytes(&self) -> usize {
        self.capacity() - self.writer
    }

    pub fn is_readable(&self) -> bool {
        self.readable_bytes() > 0
    }

    pub fn is_writable(&self) -> bool {
        self.writable_bytes() > 0
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn set_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    pub fn set_reader_index(&mut self, index: usize) -> Result<()> {
        if index > self.writer {
            return Err(bounds(index, 0, self.capacity()));
        }
        self.reader = index;
        Ok(())
    }

    pub fn set_writer_index(&mut self, index: usize) -> Result<()> {
        if index < self.reader || index > self.capacity() {
            return Err(bounds(index, 0, self.capacity()));
        }
        self.writer = index;
        Ok(())
    }

    pub fn mark_reader_index(&mut self) {
        self.mark_reader = self.reader;
    }

    /// Restores the reader index previously saved by `mark_reader_index`.
    ///
    /// spec.md §9 calls out that upstream comments conflict about whether
    /// this restores the reader or the writer; the contract here follows
    /// the method's own name, not the comment: reset restores the reader.
    pub fn reset_reader_index(&mut self) {
        self.reader = self.mark_reader;
    }

    pub fn mark_writer_index(&mut self) {
        self.mark_writer = self.writer;
    }

    pub fn reset_writer_index(&mut self) {
        self.writer = self.mark_writer;
    }

    pub fn clear(&mut self) {
        self.reader = 0;
        self.writer = 0;
    }

    /// Discards the `[0, reader)` region by shifting remaining readable
    /// bytes to the front. No-op on slice views (they have no spare room
    /// to discard into).
    pub fn discard_read_bytes(&mut self) -> Result<()> {
        if self.reader == 0 {
            return Ok(());
        }
        let readable = self.readable_bytes();
        if self.is_slice {
            let mut data = self.core.data.lock();
            let abs = self.base_offset;
            data.copy_within(abs + self.reader..abs + self.writer, abs);
        } else {
            let mut data = self.core.data.lock();
            data.copy_within(self.reader..self.writer, 0);
        }
        self.writer = readable;
        self.reader = 0;
        Ok(())
    }

    // ===== capacity =====

    /// Grows or shrinks capacity. Per spec.md §3, shrinking below `writer`
    /// truncates both cursors; fails on slice views (capacity is fixed for
    /// a derived window).
    pub fn set_capacity(&mut self, new_capacity: usize) -> Result<()> {
        if self.is_slice {
            return Err(Error::IllegalState("capacity change on a slice view"));
        }
        if new_capacity > self.max_capacity() {
            return Err(Error::IllegalArgument(format!(
                "capacity {} exceeds max_capacity {}",
                new_capacity,
                self.max_capacity()
            )));
        }
        let mut data = self.core.data.lock();
        data.resize(new_capacity);
        drop(data);
        if new_capacity < self.writer {
            self.writer = new_capacity;
        }
        if new_capacity < self.reader {
            self.reader = new_capacity;
        }
        Ok(())
    }

    /// Ensures at least `needed` more writable bytes are available,
    /// growing to the next power of two (capped at `max_capacity`) if not.
    fn ensure_writable(&mut self, needed: usize) -> Result<()> {
        let required = self.writer + needed;
        if required <= self.capacity() {
            return Ok(());
        }
        let max = self.max_capacity();
        if required > max {
            return Err(Error::IllegalArgument(format!(
                "write of {} bytes at writer={} exceeds max_capacity {}",
                needed, self.writer, max
            )));
        }
        let new_capacity = cmp::min(required.next_power_of_two(), max);
        self.set_capacity(new_capacity)
    }

    // ===== bounds-checked raw access =====

    fn check_index(&self, index: usize, len: usize) -> Result<()> {
        if self.core.count() == 0 {
            return Err(Error::IllegalReferenceCount(RefCountFault::AccessAfterFree));
        }
        let cap = self.capacity();
        if index.checked_add(len).map(|end| end > cap).unwrap_or(true) {
            return Err(bounds(index, len, cap));
        }
        Ok(())
    }

    fn abs(&self, index: usize) -> usize {
        self.base_offset + index
    }

    pub fn get_bytes(&self, index: usize, len: usize) -> Result<Vec<u8>> {
        self.check_index(index, len)?;
        let data = self.core.data.lock();
        let a = self.abs(index);
        Ok(data.get_range(a, a + len))
    }

    pub fn set_bytes(&mut self, index: usize, src: &[u8]) -> Result<()> {
        self.check_index(index, src.len())?;
        let mut data = self.core.data.lock();
        let a = self.abs(index);
        data.set_range(a, src);
        Ok(())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let out = self.get_bytes(self.reader, len)?;
        self.reader += len;
        Ok(out)
    }

    pub fn write_bytes(&mut self, src: &[u8]) -> Result<()> {
        self.ensure_writable(src.len())?;
        self.set_bytes(self.writer, src)?;
        self.writer += src.len();
        Ok(())
    }

    // ===== search =====

    /// Scans `[reader, writer)` for the first index (relative to `reader`,
    /// per spec.md §9's `bytesBefore` ambiguity note) whose byte satisfies
    /// `predicate`, searching at most `length` bytes.
    pub fn bytes_before(&self, length: usize, mut predicate: impl FnMut(u8) -> bool) -> Result<Option<usize>> {
        let len = cmp::min(length, self.readable_bytes());
        let start = self.abs(self.reader);
        let window = self.core.data.lock().get_range(start, start + len);
        for (i, &b) in window.iter().enumerate() {
            if predicate(b) {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    pub fn index_of(&self, needle: u8) -> Result<Option<usize>> {
        self.bytes_before(self.readable_bytes(), |b| b == needle)
    }

    // ===== copy =====

    pub fn copy(&self) -> Result<ByteBuf> {
        let bytes = self.get_bytes(0, self.capacity())?;
        let mut out = ByteBuf::new_root(Storage::Owned(bytes), self.max_capacity(), Origin::Unpooled);
        out.reader = self.reader;
        out.writer = self.writer;
        out.order = self.order;
        Ok(out)
    }

    // ===== derived views =====

    fn derive(&self, offset: usize, length: usize, bump_refcount: bool) -> Result<ByteBuf> {
        self.check_index(offset, length)?;
        if bump_refcount {
            self.core.retain_by(1)?;
        }
        Ok(ByteBuf {
            core: Arc::clone(&self.core),
            base_offset: self.abs(offset),
            fixed_capacity: length,
            is_slice: true,
            reader: 0,
            writer: length,
            mark_reader: 0,
            mark_writer: 0,
            order: self.order,
            leak_guard: leak::LeakGuard::maybe_attach(),
        })
    }

    pub fn slice(&self, offset: usize, length: usize) -> Result<ByteBuf> {
        self.derive(offset, length, false)
    }

    pub fn retained_slice(&self, offset: usize, length: usize) -> Result<ByteBuf> {
        self.derive(offset, length, true)
    }

    fn derive_duplicate(&self, bump_refcount: bool) -> Result<ByteBuf> {
        if bump_refcount {
            self.core.retain_by(1)?;
        }
        Ok(ByteBuf {
            core: Arc::clone(&self.core),
            base_offset: self.base_offset,
            fixed_capacity: self.fixed_capacity,
            is_slice: self.is_slice,
            reader: self.reader,
            writer: self.writer,
            mark_reader: self.mark_reader,
            mark_writer: self.mark_writer,
            order: self.order,
            leak_guard: leak::LeakGuard::maybe_attach(),
        })
    }

    pub fn duplicate(&self) -> Result<ByteBuf> {
        self.derive_duplicate(false)
    }

    pub fn retained_duplicate(&self) -> Result<ByteBuf> {
        self.derive_duplicate(true)
    }

    /// Returns the readable region as a new view and advances `reader` past
    /// it, as if it had been consumed by a relative read.
    pub fn read_slice(&mut self, length: usize) -> Result<ByteBuf> {
        let out = self.slice(self.reader, length)?;
        self.reader += length;
        Ok(out)
    }

    pub fn retained_read_slice(&mut self, length: usize) -> Result<ByteBuf> {
        let out = self.retained_slice(self.reader, length)?;
        self.reader += length;
        Ok(out)
    }

    // ===== native export =====

    /// Returns the readable bytes as an owned `Vec<u8>`, for handing off to
    /// native-buffer APIs (`IoSlice`-style scatter-gather writes live on
    /// the outbound buffer, which calls this per flushed entry).
    pub fn as_native_bytes(&self) -> Result<Vec<u8>> {
        self.get_bytes(self.reader, self.readable_bytes())
    }
}

impl ReferenceCounted for ByteBuf {
    fn ref_count(&self) -> usize {
        self.core.count()
    }

    fn retain(&self) -> Result<()> {
        self.core.retain_by(1)
    }

    fn retain_n(&self, n: usize) -> Result<()> {
        self.core.retain_by(n)
    }

    fn release(&self) -> Result<bool> {
        let freed = self.core.release_by(1)?;
        if freed {
            self.deallocate();
        }
        Ok(freed)
    }

    fn release_n(&self, n: usize) -> Result<bool> {
        let freed = self.core.release_by(n)?;
        if freed {
            self.deallocate();
        }
        Ok(freed)
    }

    fn touch(&self) {
        if let Some(guard) = &self.leak_guard {
            guard.touch();
        }
    }
}

impl ByteBuf {
    fn deallocate(&self) {
        if let Some(guard) = &self.leak_guard {
            guard.close();
        }
        match &self.core.origin {
            Origin::Unpooled => {
                // Dropped for real once the last `Arc<BufferCore>` clone
                // goes away; nothing extra to do.
            }
            Origin::Pooled { arena } => {
                let mut data = self.core.data.lock();
                if let Storage::Chunked(handle) = std::mem::replace(&mut *data, Storage::Owned(Vec::new())) {
                    arena.free(handle);
                }
            }
        }
    }
}

fn bounds(index: usize, length: usize, capacity: usize) -> Error {
    Error::IndexOutOfBounds {
        index,
        length,
        capacity,
    }
}

impl fmt::Debug for ByteBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuf")
            .field("reader", &self.reader)
            .field("writer", &self.writer)
            .field("capacity", &self.capacity())
            .field("refcount", &self.core.count())
            .finish()
    }
}

impl ByteBuf {
    pub fn get_u8(&self, index: usize) -> Result<u8> {
        self.check_index(index, 1)?;
        let data = self.core.data.lock();
        Ok(data.get_byte(self.abs(index)))
    }

    pub fn get_i8(&self, index: usize) -> Result<i8> {
        self.get_u8(index).map(|v| v as i8)
    }

    pub fn set_u8(&mut self, index: usize, value: u8) -> Result<()> {
        self.check_index(index, 1)?;
        let mut data = self.core.data.lock();
        let a = self.abs(index);
        data.set_byte(a, value);
        Ok(())
    }

    pub fn set_i8(&mut self, index: usize, value: i8) -> Result<()> {
        self.set_u8(index, value as u8)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let v = self.get_u8(self.reader)?;
        self.reader += 1;
        Ok(v)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.read_u8().map(|v| v as i8)
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.ensure_writable(1)?;
        self.set_u8(self.writer, value)?;
        self.writer += 1;
        Ok(())
    }

    pub fn write_i8(&mut self, value: i8) -> Result<()> {
        self.write_u8(value as u8)
    }

    pub fn get_u16(&self, index: usize) -> Result<u16> {
        let b = self.get_bytes(index, 2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn get_u16_le(&self, index: usize) -> Result<u16> {
        let b = self.get_bytes(index, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn get_i16(&self, index: usize) -> Result<i16> {
        self.get_u16(index).map(|v| v as i16)
    }

    pub fn get_i16_le(&self, index: usize) -> Result<i16> {
        self.get_u16_le(index).map(|v| v as i16)
    }

    pub fn set_u16(&mut self, index: usize, value: u16) -> Result<()> {
        self.set_bytes(index, &value.to_be_bytes())
    }

    pub fn set_u16_le(&mut self, index: usize, value: u16) -> Result<()> {
        self.set_bytes(index, &value.to_le_bytes())
    }

    pub fn set_i16(&mut self, index: usize, value: i16) -> Result<()> {
        self.set_u16(index, value as u16)
    }

    pub fn set_i16_le(&mut self, index: usize, value: i16) -> Result<()> {
        self.set_u16_le(index, value as u16)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let v = self.get_u16(self.reader)?;
        self.reader += 2;
        Ok(v)
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        let v = self.get_u16_le(self.reader)?;
        self.reader += 2;
        Ok(v)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.read_u16().map(|v| v as i16)
    }

    pub fn read_i16_le(&mut self) -> Result<i16> {
        self.read_u16_le().map(|v| v as i16)
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.ensure_writable(2)?;
        self.set_u16(self.writer, value)?;
        self.writer += 2;
        Ok(())
    }

    pub fn write_u16_le(&mut self, value: u16) -> Result<()> {
        self.ensure_writable(2)?;
        self.set_u16_le(self.writer, value)?;
        self.writer += 2;
        Ok(())
    }

    pub fn write_i16(&mut self, value: i16) -> Result<()> {
        self.write_u16(value as u16)
    }

    pub fn write_i16_le(&mut self, value: i16) -> Result<()> {
        self.write_u16_le(value as u16)
    }

    // --- 24-bit (medium) ---

    pub fn get_u24(&self, index: usize) -> Result<u32> {
        let b = self.get_bytes(index, 3)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    pub fn get_u24_le(&self, index: usize) -> Result<u32> {
        let b = self.get_bytes(index, 3)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    pub fn set_u24(&mut self, index: usize, value: u32) -> Result<()> {
        let b = value.to_be_bytes();
        self.set_bytes(index, &b[1..4])
    }

    pub fn set_u24_le(&mut self, index: usize, value: u32) -> Result<()> {
        let b = value.to_le_bytes();
        self.set_bytes(index, &b[0..3])
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        let v = self.get_u24(self.reader)?;
        self.reader += 3;
        Ok(v)
    }

    pub fn read_u24_le(&mut self) -> Result<u32> {
        let v = self.get_u24_le(self.reader)?;
        self.reader += 3;
        Ok(v)
    }

    pub fn write_u24(&mut self, value: u32) -> Result<()> {
        self.ensure_writable(3)?;
        self.set_u24(self.writer, value)?;
        self.writer += 3;
        Ok(())
    }

    pub fn write_u24_le(&mut self, value: u32) -> Result<()> {
        self.ensure_writable(3)?;
        self.set_u24_le(self.writer, value)?;
        self.writer += 3;
        Ok(())
    }

    // --- 32-bit ---

    pub fn get_u32(&self, index: usize) -> Result<u32> {
        let b = self.get_bytes(index, 4)?;
        Ok(u32::from_be_bytes(b.try_into().unwrap()))
    }

    pub fn get_u32_le(&self, index: usize) -> Result<u32> {
        let b = self.get_bytes(index, 4)?;
        Ok(u32::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn get_i32(&self, index: usize) -> Result<i32> {
        self.get_u32(index).map(|v| v as i32)
    }

    pub fn get_i32_le(&self, index: usize) -> Result<i32> {
        self.get_u32_le(index).map(|v| v as i32)
    }

    pub fn set_u32(&mut self, index: usize, value: u32) -> Result<()> {
        self.set_bytes(index, &value.to_be_bytes())
    }

    pub fn set_u32_le(&mut self, index: usize, value: u32) -> Result<()> {
        self.set_bytes(index, &value.to_le_bytes())
    }

    pub fn set_i32(&mut self, index: usize, value: i32) -> Result<()> {
        self.set_u32(index, value as u32)
    }

    pub fn set_i32_le(&mut self, index: usize, value: i32) -> Result<()> {
        self.set_u32_le(index, value as u32)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let v = self.get_u32(self.reader)?;
        self.reader += 4;
        Ok(v)
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let v = self.get_u32_le(self.reader)?;
        self.reader += 4;
        Ok(v)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.read_u32().map(|v| v as i32)
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        self.read_u32_le().map(|v| v as i32)
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.ensure_writable(4)?;
        self.set_u32(self.writer, value)?;
        self.writer += 4;
        Ok(())
    }

    pub fn write_u32_le(&mut self, value: u32) -> Result<()> {
        self.ensure_writable(4)?;
        self.set_u32_le(self.writer, value)?;
        self.writer += 4;
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_u32(value as u32)
    }

    pub fn write_i32_le(&mut self, value: i32) -> Result<()> {
        self.write_u32_le(value as u32)
    }

    // --- 64-bit ---

    pub fn get_u64(&self, index: usize) -> Result<u64> {
        let b = self.get_bytes(index, 8)?;
        Ok(u64::from_be_bytes(b.try_into().unwrap()))
    }

    pub fn get_u64_le(&self, index: usize) -> Result<u64> {
        let b = self.get_bytes(index, 8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn get_i64(&self, index: usize) -> Result<i64> {
        self.get_u64(index).map(|v| v as i64)
    }

    pub fn get_i64_le(&self, index: usize) -> Result<i64> {
        self.get_u64_le(index).map(|v| v as i64)
    }

    pub fn set_u64(&mut self, index: usize, value: u64) -> Result<()> {
        self.set_bytes(index, &value.to_be_bytes())
    }

    pub fn set_u64_le(&mut self, index: usize, value: u64) -> Result<()> {
        self.set_bytes(index, &value.to_le_bytes())
    }

    pub fn set_i64(&mut self, index: usize, value: i64) -> Result<()> {
        self.set_u64(index, value as u64)
    }

    pub fn set_i64_le(&mut self, index: usize, value: i64) -> Result<()> {
        self.set_u64_le(index, value as u64)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let v = self.get_u64(self.reader)?;
        self.reader += 8;
        Ok(v)
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        let v = self.get_u64_le(self.reader)?;
        self.reader += 8;
        Ok(v)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.read_u64().map(|v| v as i64)
    }

    pub fn read_i64_le(&mut self) -> Result<i64> {
        self.read_u64_le().map(|v| v as i64)
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.ensure_writable(8)?;
        self.set_u64(self.writer, value)?;
        self.writer += 8;
        Ok(())
    }

    pub fn write_u64_le(&mut self, value: u64) -> Result<()> {
        self.ensure_writable(8)?;
        self.set_u64_le(self.writer, value)?;
        self.writer += 8;
        Ok(())
    }

    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write_u64(value as u64)
    }

    pub fn write_i64_le(&mut self, value: i64) -> Result<()> {
        self.write_u64_le(value as u64)
    }

    // --- IEEE 754 floats, reinterpreting the integer-accessor bits ---

    pub fn get_f32(&self, index: usize) -> Result<f32> {
        self.get_u32(index).map(f32::from_bits)
    }

    pub fn get_f32_le(&self, index: usize) -> Result<f32> {
        self.get_u32_le(index).map(f32::from_bits)
    }

    pub fn set_f32(&mut self, index: usize, value: f32) -> Result<()> {
        self.set_u32(index, value.to_bits())
    }

    pub fn set_f32_le(&mut self, index: usize, value: f32) -> Result<()> {
        self.set_u32_le(index, value.to_bits())
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.read_u32().map(f32::from_bits)
    }

    pub fn read_f32_le(&mut self) -> Result<f32> {
        self.read_u32_le().map(f32::from_bits)
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_u32(value.to_bits())
    }

    pub fn write_f32_le(&mut self, value: f32) -> Result<()> {
        self.write_u32_le(value.to_bits())
    }

    pub fn get_f64(&self, index: usize) -> Result<f64> {
        self.get_u64(index).map(f64::from_bits)
    }

    pub fn get_f64_le(&self, index: usize) -> Result<f64> {
        self.get_u64_le(index).map(f64::from_bits)
    }

    pub fn set_f64(&mut self, index: usize, value: f64) -> Result<()> {
        self.set_u64(index, value.to_bits())
    }

    pub fn set_f64_le(&mut self, index: usize, value: f64) -> Result<()> {
        self.set_u64_le(index, value.to_bits())
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.read_u64().map(f64::from_bits)
    }

    pub fn read_f64_le(&mut self) -> Result<f64> {
        self.read_u64_le().map(f64::from_bits)
    }

    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.write_u64(value.to_bits())
    }

    pub fn write_f64_le(&mut self, value: f64) -> Result<()> {
        self.write_u64_le(value.to_bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buf::alloc::{ByteBufAllocator, UnpooledByteBufAllocator};

    fn buf(cap: usize) -> ByteBuf {
        UnpooledByteBufAllocator::new().buffer(cap, cap * 4)
    }

    #[test]
    fn write_then_read_round_trips_every_width() {
        let mut b = buf(64);
        b.write_u8(0xAB).unwrap();
        b.write_i8(-5).unwrap();
        b.write_u16(0x1234).unwrap();
        b.write_u16_le(0x1234).unwrap();
        b.write_u24(0x0102_03u32).unwrap();
        b.write_u32(0xDEAD_BEEF).unwrap();
        b.write_u64(0x0123_4567_89AB_CDEF).unwrap();
        b.write_f32(1.5).unwrap();
        b.write_f64(2.5).unwrap();

        assert_eq!(b.read_u8().unwrap(), 0xAB);
        assert_eq!(b.read_i8().unwrap(), -5);
        assert_eq!(b.read_u16().unwrap(), 0x1234);
        assert_eq!(b.read_u16_le().unwrap(), 0x1234);
        assert_eq!(b.read_u24().unwrap(), 0x0102_03);
        assert_eq!(b.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(b.read_u64().unwrap(), 0x0123_4567_89AB_CDEF);
        assert_eq!(b.read_f32().unwrap(), 1.5);
        assert_eq!(b.read_f64().unwrap(), 2.5);
    }

    #[test]
    fn slice_reads_translate_through_parent_offset() {
        let mut b = buf(32);
        b.write_bytes(b"hello world!!!!!").unwrap();
        let s = b.slice(2, 5).unwrap();
        for i in 0..5 {
            assert_eq!(s.get_u8(i).unwrap(), b.get_u8(2 + i).unwrap());
        }
    }

    #[test]
    fn auto_growth_picks_next_power_of_two() {
        let mut b = buf(4);
        b.write_bytes(&[0u8; 4]).unwrap();
        assert_eq!(b.capacity(), 4);
        b.write_u8(1).unwrap();
        assert_eq!(b.capacity(), 8);
    }

    #[test]
    fn capacity_shrink_truncates_cursors() {
        let mut b = buf(16);
        b.write_bytes(&[0u8; 10]).unwrap();
        b.set_reader_index(4).unwrap();
        b.set_capacity(6).unwrap();
        assert_eq!(b.writer_index(), 6);
        assert_eq!(b.reader_index(), 4);
    }

    #[test]
    fn index_out_of_bounds_is_rejected() {
        let b = buf(4);
        assert!(matches!(
            b.get_u8(10),
            Err(Error::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn release_to_zero_then_access_is_illegal_refcount() {
        let b = buf(4);
        assert!(b.release().unwrap());
        assert!(matches!(
            b.get_u8(0),
            Err(Error::IllegalReferenceCount(RefCountFault::AccessAfterFree))
        ));
    }

    #[test]
    fn double_release_underflows() {
        let b = buf(4);
        assert!(b.release().unwrap());
        assert!(matches!(
            b.release(),
            Err(Error::IllegalReferenceCount(RefCountFault::Underflow))
        ));
    }

    #[test]
    fn retained_slice_bumps_parent_refcount_plain_slice_does_not() {
        let b = buf(8);
        assert_eq!(b.ref_count(), 1);
        let plain = b.slice(0, 4).unwrap();
        assert_eq!(b.ref_count(), 1);
        let retained = b.retained_slice(0, 4).unwrap();
        assert_eq!(b.ref_count(), 2);
        drop(plain);
        retained.release().unwrap();
        assert_eq!(b.ref_count(), 1);
    }
}
