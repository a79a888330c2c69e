//! Byte sources the decode walker reads from
//!
//! A source exposes a contiguous window of buffered input and a cursor into
//! it. Pulling more input appends to the window without moving anything, so
//! positions taken while a value is being decoded stay valid until the next
//! top-level value starts.

use std::io::{self, Read};

use tracing::trace;

use crate::error::DecodeError;

/// Minimum bytes requested from a reader per refill
const MIN_READ: usize = 512;

pub(crate) trait Source {
    /// Buffered input
    fn data(&self) -> &[u8];

    fn pos(&self) -> usize;

    fn set_pos(&mut self, pos: usize);

    /// Append more input to `data`. Returns false once the input is exhausted.
    fn fill(&mut self) -> Result<bool, DecodeError>;

    /// Absolute input offset of buffer position `pos`
    fn offset_of(&self, pos: usize) -> usize;
}

impl<S: Source + ?Sized> Source for &mut S {
    fn data(&self) -> &[u8] {
        (**self).data()
    }

    fn pos(&self) -> usize {
        (**self).pos()
    }

    fn set_pos(&mut self, pos: usize) {
        (**self).set_pos(pos)
    }

    fn fill(&mut self) -> Result<bool, DecodeError> {
        (**self).fill()
    }

    fn offset_of(&self, pos: usize) -> usize {
        (**self).offset_of(pos)
    }
}

/// Complete input held in memory
pub(crate) struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl Source for SliceSource<'_> {
    #[inline]
    fn data(&self) -> &[u8] {
        self.data
    }

    #[inline]
    fn pos(&self) -> usize {
        self.pos
    }

    #[inline]
    fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    #[inline]
    fn fill(&mut self) -> Result<bool, DecodeError> {
        Ok(false)
    }

    #[inline]
    fn offset_of(&self, pos: usize) -> usize {
        pos
    }
}

/// Input pulled from an `io::Read` on demand
pub(crate) struct StreamSource<R> {
    reader: R,
    /// Read bytes followed by zeroed spare room for the next read
    buf: Vec<u8>,
    /// Length of the read prefix of `buf`
    filled: usize,
    pos: usize,
    /// Bytes dropped from the front of `buf` so far
    consumed: usize,
    eof: bool,
}

impl<R: Read> StreamSource<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            filled: 0,
            pos: 0,
            consumed: 0,
            eof: false,
        }
    }

    /// Drop the already-decoded prefix. Only valid between top-level values.
    pub(crate) fn compact(&mut self) {
        if self.pos == 0 {
            return;
        }
        self.buf.copy_within(self.pos..self.filled, 0);
        self.filled -= self.pos;
        self.consumed += self.pos;
        self.pos = 0;
    }

    /// Input read from the stream but not yet decoded
    pub(crate) fn buffered(&self) -> &[u8] {
        &self.buf[self.pos..self.filled]
    }
}

impl<R: Read> Source for StreamSource<R> {
    #[inline]
    fn data(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    #[inline]
    fn pos(&self) -> usize {
        self.pos
    }

    #[inline]
    fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn fill(&mut self) -> Result<bool, DecodeError> {
        if self.eof {
            return Ok(false);
        }

        // grow geometrically so long values do not read in small steps;
        // the spare tail is zeroed once and reused by later reads
        let old = self.filled;
        if self.buf.len() - old < MIN_READ {
            let grown = (old + MIN_READ).max(self.buf.len() * 2);
            self.buf.resize(grown, 0);
        }
        loop {
            match self.reader.read(&mut self.buf[old..]) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(false);
                }
                Ok(n) => {
                    self.filled = old + n;
                    trace!(read = n, buffered = self.filled, "stream refill");
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    #[inline]
    fn offset_of(&self, pos: usize) -> usize {
        self.consumed + pos
    }
}
