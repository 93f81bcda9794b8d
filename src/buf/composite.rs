//! Logical concatenation of component buffers with lazy index translation.
//!
//! Grounded in spec.md §4.A's "Composite buffer": an ordered array of
//! components each carrying its absolute offset and length, O(log N) index
//! lookup via binary search, and roll-up reference counting (releasing the
//! composite releases every component).

use crate::error::{Error, Result};

use super::rc::ReferenceCounted;
use super::ByteBuf;

struct Component {
    buf: ByteBuf,
    offset: usize,
    length: usize,
}

/// A buffer that is the concatenation of N independently-owned
/// [`ByteBuf`]s, addressed as one contiguous logical range.
pub struct CompositeByteBuf {
    components: Vec<Component>,
    reader: usize,
    writer: usize,
}

impl CompositeByteBuf {
    pub fn new() -> CompositeByteBuf {
        CompositeByteBuf {
            components: Vec::new(),
            reader: 0,
            writer: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.components.last().map(|c| c.offset + c.length).unwrap_or(0)
    }

    pub fn reader_index(&self) -> usize {
        self.reader
    }

    pub fn writer_index(&self) -> usize {
        self.writer
    }

    pub fn readable_bytes(&self) -> usize {
        self.writer - self.reader
    }

    /// Appends `buf` as a new final component, advancing the writer index
    /// by the component's readable length. Does not retain; the caller
    /// already owns the reference being handed in.
    pub fn add_component(&mut self, buf: ByteBuf) {
        let length = buf.readable_bytes();
        let offset = self.capacity();
        self.components.push(Component { buf, offset, length });
        self.writer += length;
    }

    /// Removes the component at `index`, shifting every later component's
    /// absolute offset down and truncating reader/writer to stay in range.
    pub fn remove_component(&mut self, index: usize) -> Result<()> {
        if index >= self.components.len() {
            return Err(Error::IndexOutOfBounds {
                index,
                length: 1,
                capacity: self.components.len(),
            });
        }
        let removed = self.components.remove(index);
        let mut offset = if index == 0 {
            0
        } else {
            self.components[index - 1].offset + self.components[index - 1].length
        };
        for c in &mut self.components[index..] {
            c.offset = offset;
            offset += c.length;
        }
        let cap = self.capacity();
        if self.writer > cap {
            self.writer = cap;
        }
        if self.reader > self.writer {
            self.reader = self.writer;
        }
        let _ = removed.length;
        Ok(())
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    /// O(log N) binary search over component offsets, per spec.md §4.A.
    fn locate(&self, absolute_index: usize) -> Result<(usize, usize)> {
        if absolute_index >= self.capacity() {
            return Err(Error::IndexOutOfBounds {
                index: absolute_index,
                length: 0,
                capacity: self.capacity(),
            });
        }
        let idx = self
            .components
            .partition_point(|c| c.offset + c.length <= absolute_index);
        let component = &self.components[idx];
        Ok((idx, absolute_index - component.offset))
    }

    pub fn get_u8(&self, index: usize) -> Result<u8> {
        let (idx, local) = self.locate(index)?;
        self.components[idx].buf.get_u8(local)
    }

    pub fn set_u8(&mut self, index: usize, value: u8) -> Result<()> {
        let (idx, local) = self.locate(index)?;
        self.components[idx].buf.set_u8(local, value)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let v = self.get_u8(self.reader)?;
        self.reader += 1;
        Ok(v)
    }

    /// Reads `len` bytes starting at the reader index, crossing component
    /// boundaries transparently.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            out.push(self.get_u8(self.reader + i)?);
        }
        self.reader += len;
        Ok(out)
    }

    /// Releases every component, rolling up failures from the first
    /// component that fails to release (later components are still
    /// released — spec.md §9 requires flattening to all components
    /// atomically with respect to observers, not stopping early).
    pub fn release_all(&self) -> Result<bool> {
        let mut all_zero = true;
        for c in &self.components {
            if !c.buf.release()? {
                all_zero = false;
            }
        }
        Ok(all_zero)
    }
}

impl Default for CompositeByteBuf {
    fn default() -> CompositeByteBuf {
        CompositeByteBuf::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buf::alloc::{ByteBufAllocator, UnpooledByteBufAllocator};

    fn buf(bytes: &[u8]) -> ByteBuf {
        let alloc = UnpooledByteBufAllocator::new();
        let mut b = alloc.buffer(bytes.len(), bytes.len());
        b.write_bytes(bytes).unwrap();
        b
    }

    #[test]
    fn reads_cross_component_boundaries() {
        let mut composite = CompositeByteBuf::new();
        composite.add_component(buf(b"hello"));
        composite.add_component(buf(b"world"));
        assert_eq!(composite.capacity(), 10);
        let out = composite.read_bytes(10).unwrap();
        assert_eq!(&out, b"helloworld");
    }

    #[test]
    fn locate_finds_the_right_component_via_binary_search() {
        let mut composite = CompositeByteBuf::new();
        composite.add_component(buf(b"abc"));
        composite.add_component(buf(b"de"));
        composite.add_component(buf(b"fghi"));
        assert_eq!(composite.get_u8(0).unwrap(), b'a');
        assert_eq!(composite.get_u8(3).unwrap(), b'd');
        assert_eq!(composite.get_u8(5).unwrap(), b'f');
        assert_eq!(composite.get_u8(8).unwrap(), b'i');
    }

    #[test]
    fn remove_component_shifts_later_offsets() {
        let mut composite = CompositeByteBuf::new();
        composite.add_component(buf(b"abc"));
        composite.add_component(buf(b"de"));
        composite.remove_component(0).unwrap();
        assert_eq!(composite.get_u8(0).unwrap(), b'd');
    }
}
