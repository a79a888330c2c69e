//! Performance building blocks shared by the encode and decode programs
//!
//! Byte-level escaping, number formatting and parsing, character
//! classification, buffer reuse and the compiled-program cache.

pub mod buffer_pool;
pub mod char_class;
pub mod escape_lut;
pub mod float_format;
pub mod int_format;
pub mod int_parse;
pub mod swar_escape;
pub mod type_cache;
