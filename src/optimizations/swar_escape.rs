//! Word-at-a-time JSON string escaping
//!
//! Scans 8 bytes per step with the classic "has zero byte" / "has byte less
//! than" tricks to find the next byte that may need escaping, then lets the
//! escape LUT decide what to write for it. Only the lowest flagged byte of a
//! word is exact (borrows can only flag bytes above a true hit), which is all
//! the scanner uses.
//!
//! Inputs are valid UTF-8, so the only multi-byte sequences that matter are
//! U+2028 and U+2029 (`E2 80 A8` / `E2 80 A9`); the scanner flags every 0xE2
//! lead byte and the writer checks the two continuation bytes.

use super::escape_lut::{self, ESCAPE_LUT, EscapeAction};

const LSB: u64 = 0x0101_0101_0101_0101;
const MSB: u64 = 0x8080_8080_8080_8080;

#[inline(always)]
const fn splat(b: u8) -> u64 {
    LSB * b as u64
}

/// High bit set in every byte of `x` that is zero (exact for the lowest one)
#[inline(always)]
fn zero_bytes(x: u64) -> u64 {
    x.wrapping_sub(LSB) & !x & MSB
}

/// High bit set in every ASCII byte of `n` below `b`
#[inline(always)]
fn below(n: u64, b: u8) -> u64 {
    n.wrapping_sub(splat(b)) & !n & MSB
}

#[inline(always)]
fn contains(n: u64, b: u8) -> u64 {
    zero_bytes(n ^ splat(b))
}

#[inline(always)]
fn escape_mask<const HTML: bool>(n: u64) -> u64 {
    let mut mask = below(n, 0x20) | contains(n, b'"') | contains(n, b'\\') | contains(n, 0xE2);
    if HTML {
        mask |= contains(n, b'<') | contains(n, b'>') | contains(n, b'&');
    }
    mask
}

/// Index of the first byte at or after `from` that may need escaping
#[inline]
pub fn find_escape<const HTML: bool>(bytes: &[u8], from: usize) -> Option<usize> {
    let len = bytes.len();
    let mut i = from;

    while i + 8 <= len {
        // SAFETY: i + 8 <= len, read_unaligned has no alignment requirement
        let n = u64::from_le(unsafe { (bytes.as_ptr().add(i) as *const u64).read_unaligned() });
        let mask = escape_mask::<HTML>(n);
        if mask != 0 {
            return Some(i + (mask.trailing_zeros() / 8) as usize);
        }
        i += 8;
    }

    while i < len {
        if escape_lut::is_candidate(bytes[i], HTML) {
            return Some(i);
        }
        i += 1;
    }

    None
}

/// Write `s` as a quoted JSON string
#[inline]
pub fn write_string<const HTML: bool>(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.reserve(bytes.len() + 2);
    buf.push(b'"');

    let mut start = 0;
    let mut i = 0;
    while let Some(pos) = find_escape::<HTML>(bytes, i) {
        let b = bytes[pos];
        if ESCAPE_LUT[b as usize] == EscapeAction::LineSeparator {
            match (bytes.get(pos + 1), bytes.get(pos + 2)) {
                (Some(0x80), Some(&last @ (0xA8 | 0xA9))) => {
                    buf.extend_from_slice(&bytes[start..pos]);
                    buf.extend_from_slice(if last == 0xA8 { b"\\u2028" } else { b"\\u2029" });
                    start = pos + 3;
                    i = pos + 3;
                }
                _ => i = pos + 1,
            }
            continue;
        }

        buf.extend_from_slice(&bytes[start..pos]);
        if !escape_lut::write_escape(buf, b, HTML) {
            buf.push(b);
        }
        start = pos + 1;
        i = pos + 1;
    }

    buf.extend_from_slice(&bytes[start..]);
    buf.push(b'"');
}

/// Runtime-mode wrapper for callers outside the monomorphized VM
#[inline]
pub fn write_string_mode(buf: &mut Vec<u8>, s: &str, html: bool) {
    if html {
        write_string::<true>(buf, s)
    } else {
        write_string::<false>(buf, s)
    }
}

/// Write arbitrary bytes as a JSON string; invalid UTF-8 becomes U+FFFD
pub fn write_bytes_as_string<const HTML: bool>(buf: &mut Vec<u8>, bytes: &[u8]) {
    match std::str::from_utf8(bytes) {
        Ok(s) => write_string::<HTML>(buf, s),
        Err(_) => write_string::<HTML>(buf, &String::from_utf8_lossy(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn escaped<const HTML: bool>(s: &str) -> String {
        let mut buf = Vec::new();
        write_string::<HTML>(&mut buf, s);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_find_escape_word_and_tail() {
        assert_eq!(find_escape::<false>(b"abcdefghijkl", 0), None);
        assert_eq!(find_escape::<false>(b"abcdefgh\"jkl", 0), Some(8));
        assert_eq!(find_escape::<false>(b"abc\\", 0), Some(3));
        assert_eq!(find_escape::<false>(b"a<b", 0), None);
        assert_eq!(find_escape::<true>(b"a<b", 0), Some(1));
        assert_eq!(find_escape::<false>(b"\x01bcdefgh", 0), Some(0));
        // high bytes other than 0xE2 never flag
        assert_eq!(find_escape::<true>("héllo wörld".as_bytes(), 0), None);
    }

    #[test]
    fn test_lowest_hit_is_exact() {
        // a control byte followed by a quote in the same word
        assert_eq!(find_escape::<false>(b"ab\x00\"efgh", 0), Some(2));
        assert_eq!(find_escape::<false>(b"abcdefgh\"", 1), Some(8));
    }

    #[test]
    fn test_write_string_short_forms() {
        assert_eq!(escaped::<false>("a\nb\rc\td"), r#""a\nb\rc\td""#);
        assert_eq!(escaped::<false>("\u{8}\u{c}"), r#""\u0008\u000c""#);
        assert_eq!(escaped::<false>("say \"hi\" \\o/"), r#""say \"hi\" \\o/""#);
    }

    #[test]
    fn test_html_toggle() {
        assert_eq!(escaped::<true>("<script>&"), r#""\u003cscript\u003e\u0026""#);
        assert_eq!(escaped::<false>("<script>&"), r#""<script>&""#);
    }

    #[test]
    fn test_line_separators_always_escaped() {
        let s = "a\u{2028}b\u{2029}c";
        assert_eq!(escaped::<false>(s), r#""a\u2028b\u2029c""#);
        assert_eq!(escaped::<true>(s), r#""a\u2028b\u2029c""#);
        // other E2-led characters pass through
        assert_eq!(escaped::<false>("€"), "\"€\"");
    }

    #[test]
    fn test_long_strings_cross_words() {
        let s = "0123456789abcdef<>0123456789\"";
        let out = escaped::<true>(s);
        assert_eq!(out, "\"0123456789abcdef\\u003c\\u003e0123456789\\\"\"");
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let mut buf = Vec::new();
        write_bytes_as_string::<false>(&mut buf, b"a\xffb");
        assert_eq!(String::from_utf8(buf).unwrap(), "\"a\u{fffd}b\"");
    }
}
