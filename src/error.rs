//! Error types for compilation, encoding and decoding
//!
//! Every message carries the `json: ` prefix so errors read the same whether
//! they surface from a compile, an encode or a decode call.

use std::io;

use thiserror::Error;

/// Boxed error returned by user marshal/unmarshal callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure while turning a type descriptor into a program.
///
/// Never cached: a later compile of the same type runs again.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("json: unsupported type: {type_name}")]
    UnsupportedType { type_name: &'static str },

    #[error("json: unsupported map key type: {type_name}")]
    UnsupportedKey { type_name: &'static str },
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// NaN or an infinity reached a float node
    #[error("json: unsupported value: {value}{}", field_suffix(.field))]
    UnsupportedValue {
        value: String,
        field: Option<&'static str>,
    },

    #[error("json: unsupported value: encountered a cycle via {type_name}")]
    Cycle { type_name: &'static str },

    #[error("json: error calling {method} for type {type_name}: {source}")]
    Marshaler {
        method: &'static str,
        type_name: &'static str,
        #[source]
        source: BoxError,
    },

    /// MarshalJSON produced bytes that are not a single JSON value
    #[error("json: error calling MarshalJSON for type {type_name}: {source}")]
    InvalidMarshalerOutput {
        type_name: &'static str,
        #[source]
        source: DecodeError,
    },

    #[error("json: write error: {0}")]
    Io(#[from] io::Error),
}

fn field_suffix(field: &Option<&'static str>) -> String {
    match field {
        Some(name) => format!(" (field {name})"),
        None => String::new(),
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("json: unexpected end of input while decoding {construct} (offset {offset})")]
    UnexpectedEnd {
        construct: &'static str,
        offset: usize,
    },

    #[error("json: invalid character {} while decoding {construct} (offset {offset})", quote_char(.character))]
    InvalidCharacter {
        character: u8,
        construct: &'static str,
        offset: usize,
    },

    /// JSON value is well formed but does not fit the target type
    #[error("json: cannot unmarshal {value} into value of type {type_name} (offset {offset})")]
    UnmarshalType {
        value: String,
        type_name: &'static str,
        offset: usize,
    },

    #[error("json: unknown field {field:?} (offset {offset})")]
    UnknownField { field: String, offset: usize },

    #[error("json: unmarshal target must be a non-null pointer, got {type_name}")]
    NotPointer { type_name: &'static str },

    #[error("json: error calling {method} for type {type_name}: {source}")]
    Unmarshaler {
        method: &'static str,
        type_name: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("json: exceeded max depth of {limit} (offset {offset})")]
    DepthLimit { limit: usize, offset: usize },

    #[error("json: illegal base64 data (offset {offset}): {source}")]
    Base64 {
        offset: usize,
        #[source]
        source: base64::DecodeError,
    },

    /// A `string`-tagged field whose quoted contents do not fit the field
    #[error("json: invalid use of ,string struct tag, trying to unmarshal {value:?} into {type_name} (offset {offset})")]
    InvalidStringTag {
        value: String,
        type_name: &'static str,
        offset: usize,
    },

    /// The stream holds no further value
    #[error("json: end of input")]
    Eof,

    #[error("json: read error: {0}")]
    Io(#[from] io::Error),
}

impl DecodeError {
    /// Absolute byte offset the error refers to, when it has one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            DecodeError::UnexpectedEnd { offset, .. }
            | DecodeError::InvalidCharacter { offset, .. }
            | DecodeError::UnmarshalType { offset, .. }
            | DecodeError::UnknownField { offset, .. }
            | DecodeError::DepthLimit { offset, .. }
            | DecodeError::Base64 { offset, .. }
            | DecodeError::InvalidStringTag { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    /// Shift a relative offset by `base`; used when a value was decoded out of
    /// an inner buffer such as the contents of a `string`-tagged field.
    pub(crate) fn rebase(mut self, base: usize) -> Self {
        match &mut self {
            DecodeError::UnexpectedEnd { offset, .. }
            | DecodeError::InvalidCharacter { offset, .. }
            | DecodeError::UnmarshalType { offset, .. }
            | DecodeError::UnknownField { offset, .. }
            | DecodeError::DepthLimit { offset, .. }
            | DecodeError::Base64 { offset, .. }
            | DecodeError::InvalidStringTag { offset, .. } => *offset += base,
            _ => {}
        }
        self
    }
}

fn quote_char(c: &u8) -> String {
    let c = *c;
    match c {
        b'\'' => "'\\''".to_string(),
        b'"' => "'\"'".to_string(),
        0x20..=0x7e => format!("'{}'", c as char),
        _ => format!("'\\x{c:02x}'"),
    }
}
