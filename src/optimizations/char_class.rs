//! Character classification lookup table for the decode side
//!
//! One table lookup tells the walker and the skip scanner what a byte can
//! start, instead of a chain of comparisons.

/// Character types for JSON parsing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CharType {
    /// Byte that cannot appear outside a string
    Invalid = 0,
    /// Whitespace: space, tab, newline, carriage return
    Whitespace = 1,
    /// Start of string: "
    Quote = 2,
    /// Start of number: 0-9, -
    NumberStart = 3,
    /// Start of true: t
    TrueStart = 4,
    /// Start of false: f
    FalseStart = 5,
    /// Start of null: n
    NullStart = 6,
    /// Start of array: [
    ArrayStart = 7,
    /// End of array: ]
    ArrayEnd = 8,
    /// Start of object: {
    ObjectStart = 9,
    /// End of object: }
    ObjectEnd = 10,
    /// Colon: :
    Colon = 11,
    /// Comma: ,
    Comma = 12,
}

/// Lookup table for character classification
pub static CHAR_TYPE: [CharType; 256] = {
    let mut table = [CharType::Invalid; 256];

    table[b' ' as usize] = CharType::Whitespace;
    table[b'\t' as usize] = CharType::Whitespace;
    table[b'\n' as usize] = CharType::Whitespace;
    table[b'\r' as usize] = CharType::Whitespace;

    table[b'"' as usize] = CharType::Quote;
    table[b'[' as usize] = CharType::ArrayStart;
    table[b']' as usize] = CharType::ArrayEnd;
    table[b'{' as usize] = CharType::ObjectStart;
    table[b'}' as usize] = CharType::ObjectEnd;
    table[b':' as usize] = CharType::Colon;
    table[b',' as usize] = CharType::Comma;

    table[b'-' as usize] = CharType::NumberStart;
    let mut d = b'0';
    while d <= b'9' {
        table[d as usize] = CharType::NumberStart;
        d += 1;
    }

    table[b't' as usize] = CharType::TrueStart;
    table[b'f' as usize] = CharType::FalseStart;
    table[b'n' as usize] = CharType::NullStart;

    table
};

#[inline(always)]
pub fn char_type(b: u8) -> CharType {
    CHAR_TYPE[b as usize]
}

#[inline(always)]
pub fn is_whitespace(b: u8) -> bool {
    CHAR_TYPE[b as usize] == CharType::Whitespace
}
