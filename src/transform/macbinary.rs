//! Streaming MacBinary unwrapper.
//!
//! A MacBinary envelope is a 128-byte header, then the data fork, then the
//! resource fork (each fork padded to a 128-byte multiple).  Only the data
//! fork is the file a user meant to upload, so the decoder forwards exactly
//! `data_fork_length` bytes that follow the header and silently drops
//! everything else.
//!
//! The data fork length is the big-endian `u32` at header offset 83.  The
//! decoder is a pure write-side filter: it never buffers more than the
//! header, and the output is identical however the input is split across
//! `write` calls.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::{self, Write};

/// Size of the fixed MacBinary header.
pub const HEADER_LEN: usize = 128;
/// Offset of the big-endian data fork length inside the header.
pub const DATA_FORK_LEN_OFFSET: usize = 83;

pub struct MacBinaryDecoder<W: Write> {
    inner:         W,
    header:        [u8; HEADER_LEN],
    /// Envelope bytes seen so far, forwarded or not.
    filtered:      u64,
    data_fork_len: Option<u32>,
}

impl<W: Write> MacBinaryDecoder<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            header:        [0u8; HEADER_LEN],
            filtered:      0,
            data_fork_len: None,
        }
    }

    /// Data fork length from the header, once the whole header has arrived.
    pub fn data_fork_len(&self) -> Option<u32> { self.data_fork_len }

    pub fn into_inner(self) -> W { self.inner }
}

impl<W: Write> Write for MacBinaryDecoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut rest = buf;

        if self.filtered < HEADER_LEN as u64 {
            let at   = self.filtered as usize;
            let take = (HEADER_LEN - at).min(rest.len());
            self.header[at..at + take].copy_from_slice(&rest[..take]);
            self.filtered += take as u64;
            rest = &rest[take..];

            if self.filtered == HEADER_LEN as u64 {
                let len = (&self.header[DATA_FORK_LEN_OFFSET..DATA_FORK_LEN_OFFSET + 4])
                    .read_u32::<BigEndian>()?;
                tracing::trace!(data_fork_len = len, "macbinary header parsed");
                self.data_fork_len = Some(len);
            }
        }

        if let Some(len) = self.data_fork_len {
            let fork_end = HEADER_LEN as u64 + len as u64;
            if self.filtered < fork_end {
                let fwd = (fork_end - self.filtered).min(rest.len() as u64) as usize;
                self.inner.write_all(&rest[..fwd])?;
            }
        }
        self.filtered += rest.len() as u64;

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
