//! User callbacks invoked by the encode and decode programs
//!
//! A type opts in by attaching the hook to its descriptor, e.g.
//! `TypeDesc::opaque::<Self>().marshal_json::<Self>()` or the
//! `with [marshal_json]` suffix of `describe_struct!`. Hooks take priority
//! over the type's own kind.

use std::fmt;

use crate::decode::skip;
use crate::reflect::{Reflect, TypeDesc};
use crate::BoxError;

/// Produce the JSON for a value. The bytes are validated and compacted
/// (or re-indented) before they are spliced into the output.
pub trait MarshalJson {
    fn marshal_json(&self) -> Result<Vec<u8>, BoxError>;
}

/// Consume the raw JSON of one value, including a literal `null`.
pub trait UnmarshalJson {
    fn unmarshal_json(&mut self, data: &[u8]) -> Result<(), BoxError>;
}

/// Produce text that is emitted as a JSON string (also used for map keys).
pub trait MarshalText {
    fn marshal_text(&self) -> Result<String, BoxError>;
}

/// Consume the unescaped contents of a JSON string (also used for map keys).
pub trait UnmarshalText {
    fn unmarshal_text(&mut self, text: &str) -> Result<(), BoxError>;
}

/// A JSON number kept as its literal text.
///
/// Dynamic values decode numbers into this instead of `f64` when
/// `use_number` is set, so large integers survive a round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Number(String);

#[derive(Debug, thiserror::Error)]
#[error("invalid number literal {0:?}")]
pub struct InvalidNumber(String);

impl Number {
    pub fn new(literal: impl Into<String>) -> Result<Self, InvalidNumber> {
        let literal = literal.into();
        if skip::is_number(literal.as_bytes()) {
            Ok(Number(literal))
        } else {
            Err(InvalidNumber(literal))
        }
    }

    /// Caller has already checked the literal
    pub(crate) fn from_literal(literal: String) -> Self {
        Number(literal)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_f64(&self) -> Option<f64> {
        fast_float::parse(&self.0).ok()
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl MarshalJson for Number {
    fn marshal_json(&self) -> Result<Vec<u8>, BoxError> {
        // the zero value encodes as 0
        if self.0.is_empty() {
            return Ok(b"0".to_vec());
        }
        if !skip::is_number(self.0.as_bytes()) {
            return Err(Box::new(InvalidNumber(self.0.clone())));
        }
        Ok(self.0.as_bytes().to_vec())
    }
}

impl UnmarshalJson for Number {
    fn unmarshal_json(&mut self, data: &[u8]) -> Result<(), BoxError> {
        if data == b"null" {
            return Ok(());
        }
        if !skip::is_number(data) {
            return Err(Box::new(InvalidNumber(
                String::from_utf8_lossy(data).into_owned(),
            )));
        }
        self.0 = String::from_utf8_lossy(data).into_owned();
        Ok(())
    }
}

unsafe impl Reflect for Number {
    fn descriptor() -> &'static TypeDesc {
        unsafe {
            TypeDesc::intern::<Self>(|| {
                TypeDesc::opaque::<Self>()
                    .marshal_json::<Self>()
                    .unmarshal_json::<Self>()
            })
        }
    }

    fn zero() -> Self {
        Number::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_validation() {
        assert!(Number::new("12.5e-3").is_ok());
        assert!(Number::new("-0").is_ok());
        assert!(Number::new("01").is_err());
        assert!(Number::new("1.").is_err());
        assert!(Number::new("abc").is_err());
    }

    #[test]
    fn test_number_accessors() {
        let n = Number::new("18446744073709551617").unwrap();
        assert_eq!(n.as_str(), "18446744073709551617");
        assert_eq!(n.as_i64(), None);
        assert!(n.as_f64().is_some());
        assert_eq!(Number::new("-42").unwrap().as_i64(), Some(-42));
    }

    #[test]
    fn test_number_hooks() {
        assert_eq!(Number::default().marshal_json().unwrap(), b"0");

        let mut n = Number::default();
        n.unmarshal_json(b"3.25").unwrap();
        assert_eq!(n.as_str(), "3.25");
        n.unmarshal_json(b"null").unwrap();
        assert_eq!(n.as_str(), "3.25");
        assert!(n.unmarshal_json(b"\"3\"").is_err());
    }
}
