//! Escape Lookup Table (LUT) for JSON string escaping
//!
//! One 256-entry table classifies every byte value. The SWAR scanner only
//! finds *candidate* positions; the table decides what to write for them.

/// Escape action for each byte value
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EscapeAction {
    /// No escape needed, copy byte directly
    None = 0,
    /// Escape as \"
    Quote = 1,
    /// Escape as \\
    Backslash = 2,
    /// Escape as \n
    Newline = 3,
    /// Escape as \r
    CarriageReturn = 4,
    /// Escape as \t
    Tab = 5,
    /// Escape as \u00XX (remaining control characters, including \b and \f)
    Unicode = 6,
    /// `<`, `>`, `&`: \u00XX in HTML-safe mode, literal otherwise
    Html = 7,
    /// 0xE2 may start U+2028 / U+2029, which are always escaped
    LineSeparator = 8,
}

/// Lookup table for escape actions (256 entries for all byte values)
pub static ESCAPE_LUT: [EscapeAction; 256] = {
    let mut table = [EscapeAction::None; 256];

    let mut i = 0usize;
    while i < 0x20 {
        table[i] = EscapeAction::Unicode;
        i += 1;
    }
    table[b'\n' as usize] = EscapeAction::Newline;
    table[b'\r' as usize] = EscapeAction::CarriageReturn;
    table[b'\t' as usize] = EscapeAction::Tab;

    table[b'"' as usize] = EscapeAction::Quote;
    table[b'\\' as usize] = EscapeAction::Backslash;

    table[b'<' as usize] = EscapeAction::Html;
    table[b'>' as usize] = EscapeAction::Html;
    table[b'&' as usize] = EscapeAction::Html;

    table[0xE2] = EscapeAction::LineSeparator;

    table
};

pub(crate) const HEX: &[u8; 16] = b"0123456789abcdef";

/// Does `b` start an escape in the given mode? `LineSeparator` still needs
/// the following two bytes checked.
#[inline(always)]
pub fn is_candidate(b: u8, html: bool) -> bool {
    match ESCAPE_LUT[b as usize] {
        EscapeAction::None => false,
        EscapeAction::Html => html,
        _ => true,
    }
}

/// Write the `\u00XX` form of a single byte
#[inline]
pub fn write_unicode_escape(buf: &mut Vec<u8>, b: u8) {
    buf.extend_from_slice(b"\\u00");
    buf.push(HEX[(b >> 4) as usize]);
    buf.push(HEX[(b & 0x0F) as usize]);
}

/// Write the escape sequence for a single-byte action. Returns `false` for
/// actions that do not apply to `b` on their own (plain bytes and the
/// line-separator lead byte), leaving `buf` untouched.
#[inline]
pub fn write_escape(buf: &mut Vec<u8>, b: u8, html: bool) -> bool {
    match ESCAPE_LUT[b as usize] {
        EscapeAction::None | EscapeAction::LineSeparator => return false,
        EscapeAction::Html if !html => return false,
        EscapeAction::Quote => buf.extend_from_slice(b"\\\""),
        EscapeAction::Backslash => buf.extend_from_slice(b"\\\\"),
        EscapeAction::Newline => buf.extend_from_slice(b"\\n"),
        EscapeAction::CarriageReturn => buf.extend_from_slice(b"\\r"),
        EscapeAction::Tab => buf.extend_from_slice(b"\\t"),
        EscapeAction::Unicode | EscapeAction::Html => write_unicode_escape(buf, b),
    }
    true
}
