//! Allocation-free integer parsing for decode
//!
//! Digits are accumulated against a power-of-ten table; up to 19 digits
//! cannot overflow a u64, so only 20-digit inputs take the checked path.

static POW10: [u64; 20] = {
    let mut table = [1u64; 20];
    let mut i = 1;
    while i < 20 {
        table[i] = table[i - 1] * 10;
        i += 1;
    }
    table
};

/// Parse ASCII digits (no sign) into a u64; `None` on empty input or overflow.
/// The caller has already checked that every byte is a digit.
#[inline]
pub fn parse_u64(digits: &[u8]) -> Option<u64> {
    let len = digits.len();
    match len {
        0 => None,
        1..=19 => {
            let mut value = 0u64;
            for (i, &b) in digits.iter().enumerate() {
                value += (b - b'0') as u64 * POW10[len - 1 - i];
            }
            Some(value)
        }
        20 => {
            let head = parse_u64(&digits[..19])?;
            head.checked_mul(10)?
                .checked_add((digits[19] - b'0') as u64)
        }
        _ => None,
    }
}

/// Parse a magnitude with sign into an i64; `None` on overflow.
#[inline]
pub fn parse_i64(negative: bool, digits: &[u8]) -> Option<i64> {
    let magnitude = parse_u64(digits)?;
    if negative {
        if magnitude <= i64::MAX as u64 + 1 {
            Some((magnitude as i64).wrapping_neg())
        } else {
            None
        }
    } else {
        i64::try_from(magnitude).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u64() {
        assert_eq!(parse_u64(b"0"), Some(0));
        assert_eq!(parse_u64(b"42"), Some(42));
        assert_eq!(parse_u64(b"9999999999999999999"), Some(9_999_999_999_999_999_999));
        assert_eq!(parse_u64(b"18446744073709551615"), Some(u64::MAX));
        assert_eq!(parse_u64(b"18446744073709551616"), None);
        assert_eq!(parse_u64(b"123456789012345678901"), None);
        assert_eq!(parse_u64(b""), None);
    }

    #[test]
    fn test_parse_i64_bounds() {
        assert_eq!(parse_i64(true, b"9223372036854775808"), Some(i64::MIN));
        assert_eq!(parse_i64(false, b"9223372036854775807"), Some(i64::MAX));
        assert_eq!(parse_i64(false, b"9223372036854775808"), None);
        assert_eq!(parse_i64(true, b"9223372036854775809"), None);
        assert_eq!(parse_i64(true, b"17"), Some(-17));
    }
}
