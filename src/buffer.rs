// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Growable byte buffer backing every posting-list block.
//!
//! Growth is geometric (capacity × 5/4, minimum step 1 byte) but bounded, so
//! a single append never reserves more than [`MAX_GROWTH_STEP`] of slack
//! beyond what the write itself needs. Absolute-position writes are supported
//! so a header byte can be patched after its payload has been written (the
//! qint leading byte and the numeric tag byte rely on this).

/// Upper bound on the extra capacity a single grow step may reserve.
pub const MAX_GROWTH_STEP: usize = 1024 * 1024;

/// Append-only byte buffer with absolute-position patching.
#[derive(Debug, Default, Clone)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty buffer with the given initial capacity.
    #[must_use]
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            data: Vec::with_capacity(cap),
        }
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if nothing has been written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// The written bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn grow_for(&mut self, n: usize) {
        let free = self.data.capacity() - self.data.len();
        if free >= n {
            return;
        }

        let step = (self.data.capacity() / 4).clamp(1, MAX_GROWTH_STEP).max(n);
        self.data.reserve_exact(step);
    }

    /// Appends `bytes`, returning the number of bytes written.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        self.grow_for(bytes.len());
        self.data.extend_from_slice(bytes);
        bytes.len()
    }

    /// Appends a single byte.
    pub fn write_u8(&mut self, byte: u8) -> usize {
        self.grow_for(1);
        self.data.push(byte);
        1
    }

    /// Overwrites previously written bytes at an absolute offset.
    ///
    /// # Panics
    ///
    /// Panics if `[offset, offset + bytes.len())` is not fully inside the
    /// written region.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) {
        let end = offset + bytes.len();
        assert!(end <= self.data.len(), "write_at out of written range");

        // NOTE: bounds asserted above
        #[allow(clippy::indexing_slicing)]
        self.data[offset..end].copy_from_slice(bytes);
    }

    /// Shortens the buffer to `len` bytes.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    /// Compacts the allocation to the written size.
    pub fn shrink_to_fit(&mut self) {
        self.data.shrink_to_fit();
    }

    /// Resets to empty without releasing capacity.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// A reader positioned at the start of the written bytes.
    #[must_use]
    pub fn reader(&self) -> BufferReader<'_> {
        BufferReader::new(&self.data)
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

/// Sequential reader over a byte slice with explicit skip and seek.
#[derive(Debug, Clone)]
pub struct BufferReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BufferReader<'a> {
    /// Creates a reader over `data`, positioned at the start.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Creates a reader positioned at `pos`.
    #[must_use]
    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    /// Current read offset.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns `true` if all bytes have been consumed.
    #[must_use]
    pub fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// The unread remainder.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or_default()
    }

    /// The full underlying slice, independent of position.
    #[must_use]
    pub fn inner(&self) -> &'a [u8] {
        self.data
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> u8 {
        let b = self.data.get(self.pos).copied().unwrap_or_default();
        self.pos += 1;
        b
    }

    /// Reads `n` bytes, returning a slice borrowed from the buffer.
    ///
    /// Short slices at the end are truncated rather than erroring; posting
    /// blocks are trusted input and length mismatches surface as decode
    /// anomalies upstream.
    pub fn read_bytes(&mut self, n: usize) -> &'a [u8] {
        let start = self.pos.min(self.data.len());
        let end = (self.pos + n).min(self.data.len());
        self.pos += n;
        self.data.get(start..end).unwrap_or_default()
    }

    /// Reads a little-endian unsigned integer of `n <= 8` bytes.
    pub fn read_uint_le(&mut self, n: usize) -> u64 {
        let mut out = [0u8; 8];
        let bytes = self.read_bytes(n);
        if let Some(dst) = out.get_mut(..bytes.len()) {
            dst.copy_from_slice(bytes);
        }
        u64::from_le_bytes(out)
    }

    /// Advances the position by `n` bytes.
    pub fn skip(&mut self, n: usize) {
        self.pos += n;
    }

    /// Moves the position to an absolute offset.
    pub fn seek(&mut self, offset: usize) {
        self.pos = offset;
    }
}

impl std::io::Read for BufferReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let src = self.remaining();
        let n = src.len().min(buf.len());

        // NOTE: n is bounded by both lengths
        #[allow(clippy::indexing_slicing)]
        buf[..n].copy_from_slice(&src[..n]);

        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::{Buffer, BufferReader};
    use test_log::test;

    #[test]
    fn buffer_write_read() {
        let mut buf = Buffer::new();
        assert_eq!(3, buf.write(b"abc"));
        assert_eq!(1, buf.write_u8(b'd'));
        assert_eq!(4, buf.len());

        let mut r = buf.reader();
        assert_eq!(b"ab", r.read_bytes(2));
        assert_eq!(b'c', r.read_u8());
        assert!(!r.at_end());
        r.skip(1);
        assert!(r.at_end());
    }

    #[test]
    fn buffer_write_at_patches_header() {
        let mut buf = Buffer::new();
        buf.write_u8(0);
        buf.write(b"xyz");
        buf.write_at(0, &[0xAA]);
        assert_eq!([0xAA, b'x', b'y', b'z'], buf.as_slice());
    }

    #[test]
    fn buffer_growth_is_bounded() {
        let mut buf = Buffer::with_capacity(16);
        for _ in 0..100_000 {
            buf.write(&[0; 16]);
        }
        assert!(buf.capacity() >= buf.len());
        // the grow step is bounded; allow allocator rounding on top
        assert!(buf.capacity() - buf.len() <= 2 * super::MAX_GROWTH_STEP);
    }

    #[test]
    fn buffer_truncate_and_shrink() {
        let mut buf = Buffer::new();
        buf.write(&[1; 1000]);
        buf.truncate(10);
        assert_eq!(10, buf.len());
        buf.shrink_to_fit();
        assert!(buf.capacity() >= 10);
    }

    #[test]
    fn reader_uint_le() {
        let mut r = BufferReader::new(&[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(0x0201, r.read_uint_le(2));
        assert_eq!(0x0403, r.read_uint_le(2));
        assert!(r.at_end());
    }

    #[test]
    fn reader_seek() {
        let mut r = BufferReader::new(b"hello");
        r.seek(3);
        assert_eq!(b'l', r.read_u8());
        assert_eq!(4, r.position());
    }
}
