//! Token-level reading on top of a [`Source`]
//!
//! Every read goes through `byte_at`, which pulls more input when the
//! position runs past the buffered window. That lets a string or number
//! literal straddle any number of refills.

use super::source::Source;
use crate::error::DecodeError;
use crate::optimizations::buffer_pool::{acquire_buffer, PooledBuffer};
use crate::optimizations::char_class::is_whitespace;

/// Nesting limit for objects and arrays that are only checked or skipped
pub(crate) const MAX_DEPTH: usize = 10_000;

/// Nesting limit for values the walker decodes into a target. The walker
/// recurses once per level, so this bound has to fit a default thread stack.
pub(crate) const MAX_DECODE_DEPTH: usize = 256;

/// A decoded string: either raw bytes in the source window or the
/// unescaped copy in the lexer's scratch buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Text {
    Span(usize, usize),
    Scratch,
}

pub(crate) struct Lexer<S> {
    pub(crate) src: S,
    scratch: PooledBuffer,
}

impl<S: Source> Lexer<S> {
    pub(crate) fn new(src: S) -> Self {
        Self {
            src,
            scratch: acquire_buffer(64),
        }
    }

    #[inline]
    pub(crate) fn pos(&self) -> usize {
        self.src.pos()
    }

    #[inline]
    pub(crate) fn offset(&self) -> usize {
        self.src.offset_of(self.src.pos())
    }

    pub(crate) fn end_error(&self, construct: &'static str) -> DecodeError {
        DecodeError::UnexpectedEnd {
            construct,
            offset: self.src.offset_of(self.src.data().len()),
        }
    }

    /// Error for the byte at buffer position `at`
    pub(crate) fn char_error(&self, at: usize, construct: &'static str) -> DecodeError {
        DecodeError::InvalidCharacter {
            character: self.src.data().get(at).copied().unwrap_or(0),
            construct,
            offset: self.src.offset_of(at),
        }
    }

    #[inline]
    fn byte_at(&mut self, i: usize) -> Result<Option<u8>, DecodeError> {
        while i >= self.src.data().len() {
            if !self.src.fill()? {
                return Ok(None);
            }
        }
        Ok(Some(self.src.data()[i]))
    }

    /// Skip whitespace and return the next byte without consuming it
    pub(crate) fn peek(&mut self) -> Result<Option<u8>, DecodeError> {
        loop {
            let data = self.src.data();
            let mut i = self.src.pos();
            while i < data.len() && is_whitespace(data[i]) {
                i += 1;
            }
            let found = data.get(i).copied();
            self.src.set_pos(i);
            if found.is_some() {
                return Ok(found);
            }
            if !self.src.fill()? {
                return Ok(None);
            }
        }
    }

    /// Like `peek`, but running out of input is an error
    pub(crate) fn next_significant(&mut self, construct: &'static str) -> Result<u8, DecodeError> {
        match self.peek()? {
            Some(c) => Ok(c),
            None => Err(self.end_error(construct)),
        }
    }

    #[inline]
    pub(crate) fn bump(&mut self) {
        let pos = self.src.pos();
        self.src.set_pos(pos + 1);
    }

    pub(crate) fn expect(&mut self, byte: u8, construct: &'static str) -> Result<(), DecodeError> {
        if self.next_significant(construct)? != byte {
            return Err(self.char_error(self.pos(), construct));
        }
        self.bump();
        Ok(())
    }

    /// Consume `true`, `false` or `null` exactly
    pub(crate) fn literal(&mut self, word: &[u8], construct: &'static str) -> Result<(), DecodeError> {
        let start = self.pos();
        for (k, &want) in word.iter().enumerate() {
            match self.byte_at(start + k)? {
                None => return Err(self.end_error(construct)),
                Some(b) if b != want => return Err(self.char_error(start + k, construct)),
                Some(_) => {}
            }
        }
        self.src.set_pos(start + word.len());
        Ok(())
    }

    fn digits(&mut self, mut i: usize, construct: &'static str) -> Result<usize, DecodeError> {
        match self.byte_at(i)? {
            Some(b'0'..=b'9') => i += 1,
            Some(_) => return Err(self.char_error(i, construct)),
            None => return Err(self.end_error(construct)),
        }
        while let Some(b'0'..=b'9') = self.byte_at(i)? {
            i += 1;
        }
        Ok(i)
    }

    /// Consume a number literal and return its span in the window
    pub(crate) fn number(&mut self) -> Result<(usize, usize), DecodeError> {
        const CONSTRUCT: &str = "number";
        let start = self.pos();
        let mut i = start;
        if self.byte_at(i)? == Some(b'-') {
            i += 1;
        }
        match self.byte_at(i)? {
            Some(b'0') => i += 1,
            Some(b'1'..=b'9') => i = self.digits(i, CONSTRUCT)?,
            Some(_) => return Err(self.char_error(i, CONSTRUCT)),
            None => return Err(self.end_error(CONSTRUCT)),
        }
        if self.byte_at(i)? == Some(b'.') {
            i = self.digits(i + 1, CONSTRUCT)?;
        }
        if let Some(b'e' | b'E') = self.byte_at(i)? {
            i += 1;
            if let Some(b'+' | b'-') = self.byte_at(i)? {
                i += 1;
            }
            i = self.digits(i, CONSTRUCT)?;
        }
        self.src.set_pos(i);
        Ok((start, i))
    }

    fn check_controls(&self, from: usize, to: usize) -> Result<(), DecodeError> {
        match self.src.data()[from..to].iter().position(|&b| b < 0x20) {
            Some(k) => Err(self.char_error(from + k, "string literal")),
            None => Ok(()),
        }
    }

    /// Consume a string literal; the cursor must sit on its opening quote.
    pub(crate) fn string(&mut self) -> Result<Text, DecodeError> {
        let mut i = self.pos() + 1;
        let mut start = i;
        let mut escaped = false;
        self.scratch.clear();

        loop {
            let found = memchr::memchr2(b'"', b'\\', &self.src.data()[i..]).map(|k| i + k);
            let Some(at) = found else {
                let end = self.src.data().len();
                self.check_controls(i, end)?;
                i = end;
                if !self.src.fill()? {
                    return Err(self.end_error("string literal"));
                }
                continue;
            };

            self.check_controls(i, at)?;
            if self.src.data()[at] == b'"' {
                self.src.set_pos(at + 1);
                if !escaped {
                    return Ok(Text::Span(start, at));
                }
                self.scratch.extend_from_slice(&self.src.data()[start..at]);
                return Ok(Text::Scratch);
            }

            escaped = true;
            self.scratch.extend_from_slice(&self.src.data()[start..at]);
            i = self.escape(at)?;
            start = i;
        }
    }

    /// Decode the escape whose backslash is at `at`; returns the position after it
    fn escape(&mut self, at: usize) -> Result<usize, DecodeError> {
        let Some(c) = self.byte_at(at + 1)? else {
            return Err(self.end_error("string literal"));
        };
        let plain = match c {
            b'"' => b'"',
            b'\\' => b'\\',
            b'/' => b'/',
            b'b' => 0x08,
            b'f' => 0x0c,
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'u' => return self.unicode_escape(at),
            _ => return Err(self.char_error(at + 1, "string escape code")),
        };
        self.scratch.push(plain);
        Ok(at + 2)
    }

    fn hex4(&mut self, at: usize) -> Result<u32, DecodeError> {
        let mut value = 0u32;
        for k in 0..4 {
            let digit = match self.byte_at(at + k)? {
                None => return Err(self.end_error("string literal")),
                Some(b @ b'0'..=b'9') => b - b'0',
                Some(b @ b'a'..=b'f') => b - b'a' + 10,
                Some(b @ b'A'..=b'F') => b - b'A' + 10,
                Some(_) => return Err(self.char_error(at + k, "string escape code")),
            };
            value = value << 4 | digit as u32;
        }
        Ok(value)
    }

    fn unicode_escape(&mut self, at: usize) -> Result<usize, DecodeError> {
        let mut cp = self.hex4(at + 2)?;
        let mut next = at + 6;

        if (0xD800..0xDC00).contains(&cp) {
            let high = cp;
            // a high surrogate only counts when a low one follows
            let paired = self.byte_at(next)? == Some(b'\\') && self.byte_at(next + 1)? == Some(b'u');
            cp = 0xFFFD;
            if paired {
                let low = self.hex4(next + 2)?;
                if (0xDC00..0xE000).contains(&low) {
                    cp = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                    next += 6;
                }
            }
        }

        let ch = char::from_u32(cp).unwrap_or(char::REPLACEMENT_CHARACTER);
        let mut utf8 = [0u8; 4];
        self.scratch
            .extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
        Ok(next)
    }

    pub(crate) fn text(&self, text: Text) -> &[u8] {
        match text {
            Text::Span(start, end) => &self.src.data()[start..end],
            Text::Scratch => &self.scratch,
        }
    }

    pub(crate) fn depth_error(&self, limit: usize) -> DecodeError {
        DecodeError::DepthLimit {
            limit,
            offset: self.offset(),
        }
    }
}
