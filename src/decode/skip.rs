//! Grammar-checking value skipper
//!
//! Used for unknown object keys, surplus array elements and raw values
//! handed to `UnmarshalJson` hooks. Every skipped value is fully validated,
//! so `valid` is just a skip over the whole input.

use smallvec::SmallVec;

use super::lexer::{Lexer, MAX_DEPTH};
use super::source::{SliceSource, Source};
use crate::error::DecodeError;
use crate::optimizations::char_class::{char_type, CharType};

impl<S: Source> Lexer<S> {
    /// Skip one value. `depth` is the nesting the caller has already opened.
    ///
    /// Open containers live on an explicit stack, so the skip runs in
    /// constant call depth however deep the input nests.
    pub(crate) fn skip_value(&mut self, depth: usize) -> Result<(), DecodeError> {
        // closers of the containers still open, innermost last
        let mut open: SmallVec<[u8; 32]> = SmallVec::new();
        loop {
            let c = self.next_significant("value")?;
            match char_type(c) {
                class @ (CharType::ObjectStart | CharType::ArrayStart) => {
                    if depth + open.len() >= MAX_DEPTH {
                        return Err(self.depth_error(MAX_DEPTH));
                    }
                    self.bump();
                    let (close, construct) = match class {
                        CharType::ObjectStart => (b'}', "object key"),
                        _ => (b']', "array"),
                    };
                    if self.next_significant(construct)? != close {
                        open.push(close);
                        if close == b'}' {
                            self.object_key()?;
                        }
                        continue;
                    }
                    self.bump();
                }
                CharType::Quote => {
                    self.string()?;
                }
                CharType::NumberStart => {
                    self.number()?;
                }
                CharType::TrueStart => self.literal(b"true", "literal true")?,
                CharType::FalseStart => self.literal(b"false", "literal false")?,
                CharType::NullStart => self.literal(b"null", "literal null")?,
                _ => return Err(self.char_error(self.pos(), "value")),
            }

            // a value just ended; close containers until one takes another element
            loop {
                let Some(&close) = open.last() else {
                    return Ok(());
                };
                let construct = if close == b'}' { "object" } else { "array" };
                match self.next_significant(construct)? {
                    b',' => {
                        self.bump();
                        if close == b'}' {
                            self.object_key()?;
                        }
                        break;
                    }
                    c if c == close => {
                        self.bump();
                        open.pop();
                    }
                    _ => return Err(self.char_error(self.pos(), construct)),
                }
            }
        }
    }

    /// A quoted key and its colon
    fn object_key(&mut self) -> Result<(), DecodeError> {
        if self.next_significant("object key")? != b'"' {
            return Err(self.char_error(self.pos(), "object key"));
        }
        self.string()?;
        self.expect(b':', "object key")
    }

    /// Nothing but whitespace may follow a top-level value
    pub(crate) fn finish(&mut self) -> Result<(), DecodeError> {
        match self.peek()? {
            None => Ok(()),
            Some(_) => Err(self.char_error(self.pos(), "top-level value")),
        }
    }
}

/// Check that `data` is exactly one JSON value surrounded by whitespace
pub(crate) fn check(data: &[u8]) -> Result<(), DecodeError> {
    let mut lexer = Lexer::new(SliceSource::new(data));
    lexer.skip_value(0)?;
    lexer.finish()
}

pub fn valid(data: &[u8]) -> bool {
    check(data).is_ok()
}

/// Whether `data` is exactly one number literal
pub(crate) fn is_number(data: &[u8]) -> bool {
    let mut lexer = Lexer::new(SliceSource::new(data));
    matches!(lexer.number(), Ok((0, end)) if end == data.len())
}
