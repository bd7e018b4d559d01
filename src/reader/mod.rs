//! Forward-only reader over one delimiter-bounded segment.
//!
//! # Contract
//! A [`SegmentReader`] wraps whatever reader the request parser hands out for
//! a single part.  That inner reader is responsible for recognising the
//! boundary token and refusing to read past it; this type only layers the
//! guarantees the materialization code relies on:
//!
//!   - **Monotonic.**  Bytes are consumed strictly forward, never re-read.
//!   - **Fused.**  The first empty read marks the segment exhausted, and every
//!     later read returns `Chunk::Exhausted` / `Ok(0)` without touching the
//!     inner reader again.  The shared stream has already moved on by then.
//!   - **Observable.**  `is_exhausted()` and `bytes_read()` let callers and
//!     tests detect double consumption without probing the stream.

use std::io::{self, Read};

/// Result of one bounded read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk {
    /// `n > 0` bytes were placed at the front of the buffer.
    Data(usize),
    /// End of segment.  Stays this way for the rest of the reader's life.
    Exhausted,
}

pub struct SegmentReader<R> {
    inner:      R,
    bytes_read: u64,
    exhausted:  bool,
}

impl<R: Read> SegmentReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, bytes_read: 0, exhausted: false }
    }

    /// Read up to `buf.len()` bytes.
    ///
    /// An empty `buf` yields `Data(0)` and does not mark the reader
    /// exhausted, since nothing was asked of the inner stream.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<Chunk> {
        if self.exhausted {
            return Ok(Chunk::Exhausted);
        }
        if buf.is_empty() {
            return Ok(Chunk::Data(0));
        }
        let n = loop {
            match self.inner.read(buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        if n == 0 {
            self.exhausted = true;
            tracing::trace!(bytes_read = self.bytes_read, "segment exhausted");
            return Ok(Chunk::Exhausted);
        }
        self.bytes_read += n as u64;
        Ok(Chunk::Data(n))
    }

    /// Read and discard the rest of the segment.  Returns the bytes skipped.
    ///
    /// Drivers call this for parts nobody wanted so the shared stream lands
    /// on the next boundary.
    pub fn drain(&mut self) -> io::Result<u64> {
        let mut buf = [0u8; 4096];
        let mut skipped = 0u64;
        while let Chunk::Data(n) = self.read_chunk(&mut buf)? {
            skipped += n as u64;
        }
        Ok(skipped)
    }
}

impl<R> SegmentReader<R> {
    pub fn is_exhausted(&self) -> bool { self.exhausted }

    /// Total bytes handed out so far.
    pub fn bytes_read(&self) -> u64 { self.bytes_read }

    pub fn into_inner(self) -> R { self.inner }
}

impl<R: Read> Read for SegmentReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.read_chunk(buf)? {
            Chunk::Data(n)   => Ok(n),
            Chunk::Exhausted => Ok(0),
        }
    }
}
