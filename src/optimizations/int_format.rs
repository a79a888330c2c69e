//! Integer formatting straight into the output buffer
//!
//! Values below 10^8 go through a two-digits-per-step table; anything larger
//! is handed to itoa, which is already optimal there.

static DIGIT_PAIRS: [[u8; 2]; 100] = {
    let mut table = [[0u8; 2]; 100];
    let mut i = 0;
    while i < 100 {
        table[i] = [b'0' + (i / 10) as u8, b'0' + (i % 10) as u8];
        i += 1;
    }
    table
};

const SMALL_LIMIT: u64 = 100_000_000;

#[inline]
fn write_small(buf: &mut Vec<u8>, mut v: u32) {
    let mut tmp = [0u8; 8];
    let mut pos = tmp.len();

    while v >= 100 {
        let pair = DIGIT_PAIRS[(v % 100) as usize];
        v /= 100;
        pos -= 2;
        tmp[pos..pos + 2].copy_from_slice(&pair);
    }
    if v >= 10 {
        pos -= 2;
        tmp[pos..pos + 2].copy_from_slice(&DIGIT_PAIRS[v as usize]);
    } else {
        pos -= 1;
        tmp[pos] = b'0' + v as u8;
    }

    buf.extend_from_slice(&tmp[pos..]);
}

#[inline]
pub fn write_u64(buf: &mut Vec<u8>, v: u64) {
    if v < SMALL_LIMIT {
        write_small(buf, v as u32);
    } else {
        let mut itoa_buf = itoa::Buffer::new();
        buf.extend_from_slice(itoa_buf.format(v).as_bytes());
    }
}

#[inline]
pub fn write_i64(buf: &mut Vec<u8>, v: i64) {
    if v < 0 {
        buf.push(b'-');
    }
    write_u64(buf, v.unsigned_abs());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt_i(v: i64) -> String {
        let mut buf = Vec::new();
        write_i64(&mut buf, v);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_small_values() {
        assert_eq!(fmt_i(0), "0");
        assert_eq!(fmt_i(7), "7");
        assert_eq!(fmt_i(42), "42");
        assert_eq!(fmt_i(100), "100");
        assert_eq!(fmt_i(-305), "-305");
        assert_eq!(fmt_i(99_999_999), "99999999");
    }

    #[test]
    fn test_large_values_and_extremes() {
        assert_eq!(fmt_i(100_000_000), "100000000");
        assert_eq!(fmt_i(i64::MIN), "-9223372036854775808");
        assert_eq!(fmt_i(i64::MAX), "9223372036854775807");

        let mut buf = Vec::new();
        write_u64(&mut buf, u64::MAX);
        assert_eq!(buf, b"18446744073709551615");
    }

    #[test]
    fn test_matches_std_formatting() {
        for v in [1i64, 9, 10, 11, 99, 101, 1_000, 65_535, 1_234_567, 87_654_321] {
            assert_eq!(fmt_i(v), v.to_string());
            assert_eq!(fmt_i(-v), (-v).to_string());
        }
    }
}
