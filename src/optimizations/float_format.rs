//! Float formatting with the host codec's layout rules
//!
//! Shortest round-trip digits come from ryu; this module only re-lays them
//! out. Plain decimal notation is used unless the magnitude is below 1e-6 or
//! at least 1e21, in which case exponent form is used with a signed, minimal
//! exponent (`1e+21`, `1.5e-7`). Callers must reject NaN and infinities.

/// Shortest digits `d1 d2 ...` and decimal point position `point` such that
/// the value is `0.d1d2... * 10^point`.
struct Decimal {
    digits: [u8; 24],
    len: usize,
    point: i32,
}

impl Decimal {
    fn parse(ryu_out: &str) -> Self {
        let (mantissa, exp) = match ryu_out.split_once('e') {
            Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
            None => (ryu_out, 0),
        };

        let mut digits = [0u8; 24];
        let mut len = 0;
        let mut point = mantissa.len() as i32;
        for (i, b) in mantissa.bytes().enumerate() {
            if b == b'.' {
                point = i as i32;
                continue;
            }
            if len < digits.len() {
                digits[len] = b;
                len += 1;
            }
        }

        // leading zeros shift the point left
        let mut lead = 0;
        while lead < len && digits[lead] == b'0' {
            lead += 1;
        }
        if lead == len {
            return Self {
                digits,
                len: 0,
                point: 0,
            };
        }
        digits.copy_within(lead..len, 0);
        len -= lead;
        point -= lead as i32;

        while len > 0 && digits[len - 1] == b'0' {
            len -= 1;
        }

        Self {
            digits,
            len,
            point: point + exp,
        }
    }

    fn digits(&self) -> &[u8] {
        &self.digits[..self.len]
    }

    fn write_fixed(&self, buf: &mut Vec<u8>) {
        let d = self.digits();
        if d.is_empty() {
            buf.push(b'0');
            return;
        }
        if self.point <= 0 {
            buf.extend_from_slice(b"0.");
            buf.resize(buf.len() + (-self.point) as usize, b'0');
            buf.extend_from_slice(d);
        } else if self.point as usize >= d.len() {
            buf.extend_from_slice(d);
            buf.resize(buf.len() + self.point as usize - d.len(), b'0');
        } else {
            let (int, frac) = d.split_at(self.point as usize);
            buf.extend_from_slice(int);
            buf.push(b'.');
            buf.extend_from_slice(frac);
        }
    }

    fn write_exponent(&self, buf: &mut Vec<u8>) {
        let d = self.digits();
        buf.push(d[0]);
        if d.len() > 1 {
            buf.push(b'.');
            buf.extend_from_slice(&d[1..]);
        }
        let exp = self.point - 1;
        buf.push(b'e');
        buf.push(if exp < 0 { b'-' } else { b'+' });
        super::int_format::write_u64(buf, exp.unsigned_abs() as u64);
    }
}

fn write_decimal(buf: &mut Vec<u8>, negative: bool, exponent_form: bool, ryu_out: &str) {
    if negative {
        buf.push(b'-');
    }
    let dec = Decimal::parse(ryu_out);
    if exponent_form && dec.len > 0 {
        dec.write_exponent(buf);
    } else {
        dec.write_fixed(buf);
    }
}

pub fn write_f64(buf: &mut Vec<u8>, f: f64) {
    let abs = f.abs();
    let exponent_form = abs != 0.0 && (abs < 1e-6 || abs >= 1e21);
    let mut ryu_buf = ryu::Buffer::new();
    write_decimal(buf, f.is_sign_negative(), exponent_form, ryu_buf.format_finite(abs));
}

pub fn write_f32(buf: &mut Vec<u8>, f: f32) {
    let abs = f.abs();
    let exponent_form = abs != 0.0 && (abs < 1e-6 || abs >= 1e21);
    let mut ryu_buf = ryu::Buffer::new();
    write_decimal(buf, f.is_sign_negative(), exponent_form, ryu_buf.format_finite(abs));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f64s(f: f64) -> String {
        let mut buf = Vec::new();
        write_f64(&mut buf, f);
        String::from_utf8(buf).unwrap()
    }

    fn f32s(f: f32) -> String {
        let mut buf = Vec::new();
        write_f32(&mut buf, f);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_fixed_notation() {
        assert_eq!(f64s(0.0), "0");
        assert_eq!(f64s(1.0), "1");
        assert_eq!(f64s(1.5), "1.5");
        assert_eq!(f64s(-2.25), "-2.25");
        assert_eq!(f64s(100.0), "100");
        assert_eq!(f64s(0.001), "0.001");
        assert_eq!(f64s(0.000001), "0.000001");
        assert_eq!(f64s(1e20), "100000000000000000000");
        assert_eq!(f64s(123456789.125), "123456789.125");
    }

    #[test]
    fn test_exponent_notation() {
        assert_eq!(f64s(1e21), "1e+21");
        assert_eq!(f64s(1.5e-7), "1.5e-7");
        assert_eq!(f64s(1e-10), "1e-10");
        assert_eq!(f64s(-2.5e300), "-2.5e+300");
        assert_eq!(f64s(5e-324), "5e-324");
    }

    #[test]
    fn test_negative_zero() {
        assert_eq!(f64s(-0.0), "-0");
    }

    #[test]
    fn test_f32_shortest_digits() {
        assert_eq!(f32s(0.1), "0.1");
        assert_eq!(f32s(3.4028235e38), "3.4028235e+38");
        assert_eq!(f32s(16777216.0), "16777216");
    }

    #[test]
    fn test_output_round_trips() {
        for f in [0.1, 1.0 / 3.0, 2.0f64.powi(60), 1e-300, 123.456e-9] {
            assert_eq!(f64s(f).parse::<f64>().unwrap(), f);
        }
    }
}
