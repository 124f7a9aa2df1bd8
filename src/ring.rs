//! Fixed-capacity circular byte buffer sitting between the file and the reader.

use std::io::{self, Read};

/// Upper bound on a single read from the source during a fill.
const FILL_CHUNK: usize = 8192;

/// A single-producer, single-consumer byte ring.
///
/// Cursors grow monotonically; positions inside the storage are taken modulo
/// the capacity. `len()` is always within `0..=capacity()`. The buffer does no
/// locking of its own.
#[derive(Debug)]
pub(crate) struct RingBuffer {
    buf: Box<[u8]>,
    read_pos: u64,
    write_pos: u64,
}

impl RingBuffer {
    /// Creates an empty buffer. `capacity` must be non-zero.
    pub(crate) fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of readable bytes.
    pub(crate) fn len(&self) -> usize {
        (self.write_pos - self.read_pos) as usize
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    pub(crate) fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Copies as much of `src` as fits. A count below `src.len()` is a short
    /// write; the rest has to be offered again later.
    pub(crate) fn write(&mut self, src: &[u8]) -> usize {
        let mut written = 0;
        while written < src.len() {
            let region = self.free_region();
            if region.is_empty() {
                break;
            }
            let n = region.len().min(src.len() - written);
            region[..n].copy_from_slice(&src[written..written + n]);
            self.write_pos += n as u64;
            written += n;
        }
        written
    }

    /// Copies up to `dst.len()` readable bytes out and consumes them.
    pub(crate) fn read(&mut self, dst: &mut [u8]) -> usize {
        let mut read = 0;
        while read < dst.len() {
            let region = self.readable_region();
            if region.is_empty() {
                break;
            }
            let n = region.len().min(dst.len() - read);
            dst[read..read + n].copy_from_slice(&region[..n]);
            self.read_pos += n as u64;
            read += n;
        }
        read
    }

    /// Pulls bytes from `reader` until it hits end-of-file or the buffer is
    /// full. Each read asks for no more than the free space, so nothing is
    /// taken from the reader that the buffer cannot hold.
    pub(crate) fn read_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<usize> {
        let mut chunk = [0u8; FILL_CHUNK];
        let mut total = 0;
        loop {
            let want = self.free().min(chunk.len());
            if want == 0 {
                return Ok(total);
            }
            match reader.read(&mut chunk[..want]) {
                Ok(0) => return Ok(total),
                // Never more than `free()` bytes, so the write is never short.
                Ok(n) => total += self.write(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Drops every buffered byte.
    pub(crate) fn clear(&mut self) {
        self.read_pos = self.write_pos;
    }

    fn offset(&self, pos: u64) -> usize {
        (pos % self.capacity() as u64) as usize
    }

    /// Largest contiguous writable slice starting at the write cursor.
    fn free_region(&mut self) -> &mut [u8] {
        let start = self.offset(self.write_pos);
        let len = self.free().min(self.capacity() - start);
        &mut self.buf[start..start + len]
    }

    /// Largest contiguous readable slice starting at the read cursor.
    fn readable_region(&self) -> &[u8] {
        let start = self.offset(self.read_pos);
        let len = self.len().min(self.capacity() - start);
        &self.buf[start..start + len]
    }
}
