//! Whitespace removal and re-indentation of already-encoded JSON
//!
//! Both passes run over input that has been validated first, so the scanner
//! only has to track whether it is inside a string.

use crate::decode::skip;
use crate::error::DecodeError;
use crate::optimizations::char_class::is_whitespace;
use crate::optimizations::escape_lut::write_unicode_escape;

/// Append `src` to `dst` without insignificant whitespace.
///
/// With `html` set, `<`, `>`, `&` and the line separators U+2028/U+2029
/// inside strings are escaped. On error `dst` is left as it was.
pub(crate) fn compact_into(dst: &mut Vec<u8>, src: &[u8], html: bool) -> Result<(), DecodeError> {
    skip::check(src)?;
    dst.reserve(src.len());

    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;
    while i < src.len() {
        let c = src[i];
        i += 1;
        if !in_string {
            if !is_whitespace(c) {
                dst.push(c);
                in_string = c == b'"';
            }
            continue;
        }

        if escaped {
            escaped = false;
            dst.push(c);
            continue;
        }
        match c {
            b'\\' => {
                escaped = true;
                dst.push(c);
            }
            b'"' => {
                in_string = false;
                dst.push(c);
            }
            b'<' | b'>' | b'&' if html => write_unicode_escape(dst, c),
            0xE2 if html && src.get(i) == Some(&0x80) && matches!(src.get(i + 1), Some(0xA8 | 0xA9)) => {
                dst.extend_from_slice(if src[i + 1] == 0xA8 { b"\\u2028" } else { b"\\u2029" });
                i += 2;
            }
            _ => dst.push(c),
        }
    }
    Ok(())
}

fn newline(dst: &mut Vec<u8>, prefix: &[u8], indent: &[u8], depth: usize) {
    dst.push(b'\n');
    dst.extend_from_slice(prefix);
    for _ in 0..depth {
        dst.extend_from_slice(indent);
    }
}

/// Indent compact, valid JSON. Nested lines sit `base_depth` levels deep;
/// the first line gets no prefix.
pub(crate) fn indent_compact(
    dst: &mut Vec<u8>,
    src: &[u8],
    prefix: &[u8],
    indent: &[u8],
    base_depth: usize,
) {
    let mut depth = base_depth;
    let mut need_indent = false;
    let mut in_string = false;
    let mut escaped = false;

    for &c in src {
        if in_string {
            dst.push(c);
            if escaped {
                escaped = false;
            } else if c == b'\\' {
                escaped = true;
            } else if c == b'"' {
                in_string = false;
            }
            continue;
        }

        // an open bracket defers its newline so empty containers stay `{}`
        if need_indent && c != b'}' && c != b']' {
            need_indent = false;
            depth += 1;
            newline(dst, prefix, indent, depth);
        }
        match c {
            b'{' | b'[' => {
                need_indent = true;
                dst.push(c);
            }
            b',' => {
                dst.push(c);
                newline(dst, prefix, indent, depth);
            }
            b':' => dst.extend_from_slice(b": "),
            b'}' | b']' => {
                if need_indent {
                    need_indent = false;
                } else {
                    depth -= 1;
                    newline(dst, prefix, indent, depth);
                }
                dst.push(c);
            }
            b'"' => {
                in_string = true;
                dst.push(c);
            }
            _ => dst.push(c),
        }
    }
}

/// Remove insignificant whitespace from one JSON value
pub fn compact(src: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut dst = Vec::with_capacity(src.len());
    compact_into(&mut dst, src, false)?;
    Ok(dst)
}

/// Re-indent one JSON value: each nested line starts with `prefix` followed
/// by one `indent` per level
pub fn indent(src: &[u8], prefix: &str, indent: &str) -> Result<Vec<u8>, DecodeError> {
    let mut compacted = Vec::with_capacity(src.len());
    compact_into(&mut compacted, src, false)?;
    let mut dst = Vec::with_capacity(compacted.len() * 2);
    indent_compact(&mut dst, &compacted, prefix.as_bytes(), indent.as_bytes(), 0);
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_strips_whitespace_outside_strings() {
        let out = compact(b" { \"a b\" : [ 1 , 2 ] ,\n\t\"c\" : { } } ").unwrap();
        assert_eq!(out, br#"{"a b":[1,2],"c":{}}"#);
    }

    #[test]
    fn test_compact_keeps_escapes() {
        let out = compact(br#"[ "x\" y" , "\\" ]"#).unwrap();
        assert_eq!(out, br#"["x\" y","\\"]"#);
    }

    #[test]
    fn test_compact_html_mode() {
        let mut dst = Vec::new();
        compact_into(&mut dst, "[\"<a>&\u{2028}\"]".as_bytes(), true).unwrap();
        assert_eq!(dst, br#"["\u003ca\u003e\u0026\u2028"]"#);

        let mut dst = Vec::new();
        compact_into(&mut dst, br#"["<a>"]"#, false).unwrap();
        assert_eq!(dst, br#"["<a>"]"#);
    }

    #[test]
    fn test_compact_rejects_invalid() {
        assert!(compact(b"{\"a\":}").is_err());
        assert!(compact(b"").is_err());
        assert!(compact(b"1 2").is_err());
        let mut dst = b"keep".to_vec();
        assert!(compact_into(&mut dst, b"[", false).is_err());
        assert_eq!(dst, b"keep");
    }

    #[test]
    fn test_indent() {
        let out = indent(br#"{"a":[1,2],"b":{},"c":[]}"#, "", "  ").unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "{\n  \"a\": [\n    1,\n    2\n  ],\n  \"b\": {},\n  \"c\": []\n}"
        );
    }

    #[test]
    fn test_indent_prefix_and_base_depth() {
        let mut dst = Vec::new();
        indent_compact(&mut dst, br#"{"k":"a,b"}"#, b">", b"\t", 1);
        assert_eq!(String::from_utf8(dst).unwrap(), "{\n>\t\t\"k\": \"a,b\"\n>\t}");
    }

    #[test]
    fn test_indent_scalar_untouched() {
        assert_eq!(indent(b" 42 ", "-", "  ").unwrap(), b"42");
    }
}
