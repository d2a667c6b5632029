//! Strict decimal parsing and canonical formatting for stored values.
//!
//! Parsing is stricter than `str::parse`: a value round-trips through
//! these functions unchanged, so "012" or " 1" never silently become
//! integers. That matters because integer-encoded storage reifies values
//! back to their decimal text on read.

/// Parses a byte string as a signed 64-bit decimal integer.
///
/// Rejects empty input, leading zeros, whitespace, and a lone "-".
/// Only canonical decimal representations are accepted.
pub fn parse_i64(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() {
        return None;
    }
    let (neg, digits) = match bytes[0] {
        b'-' => (true, &bytes[1..]),
        _ => (false, bytes),
    };
    if digits.is_empty() {
        return None;
    }
    // "0" is fine, "01" is not
    if digits[0] == b'0' && digits.len() > 1 {
        return None;
    }
    let mut v: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        v = v.checked_mul(10)?;
        if neg {
            v = v.checked_sub((b - b'0') as i64)?;
        } else {
            v = v.checked_add((b - b'0') as i64)?;
        }
    }
    // "-0" denormalizes to "0" on reformat; reject it so storage stays canonical
    if neg && v == 0 {
        return None;
    }
    Some(v)
}

/// Parses a byte string as a finite double. Rejects NaN and anything
/// `str::parse::<f64>` rejects (trailing garbage, embedded whitespace).
pub fn parse_f64(bytes: &[u8]) -> Option<f64> {
    let s = std::str::from_utf8(bytes).ok()?;
    let v: f64 = s.parse().ok()?;
    if v.is_nan() {
        return None;
    }
    Some(v)
}

/// Formats a double in the canonical human-friendly form: fixed notation
/// with 17 decimal places, trailing zeros (and a bare trailing dot)
/// stripped. All writers of float-valued fields go through this, so a
/// replica applying the formatted value converges byte-for-byte.
pub fn format_f64(v: f64) -> String {
    let mut s = format!("{v:.17}");
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}

/// Number of characters in the decimal representation of `v`.
pub fn digits_i64(v: i64) -> usize {
    // itoa-free: the formatting cost only shows up on HSTRLEN of
    // integer-encoded fields, which is not a hot path
    let mut n = if v < 0 { 1 } else { 0 };
    let mut v = v.unsigned_abs();
    loop {
        n += 1;
        v /= 10;
        if v == 0 {
            return n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_i64_accepts_canonical() {
        assert_eq!(parse_i64(b"0"), Some(0));
        assert_eq!(parse_i64(b"42"), Some(42));
        assert_eq!(parse_i64(b"-7"), Some(-7));
        assert_eq!(parse_i64(b"9223372036854775807"), Some(i64::MAX));
        assert_eq!(parse_i64(b"-9223372036854775808"), Some(i64::MIN));
    }

    #[test]
    fn parse_i64_rejects_non_canonical() {
        assert_eq!(parse_i64(b""), None);
        assert_eq!(parse_i64(b"-"), None);
        assert_eq!(parse_i64(b"01"), None);
        assert_eq!(parse_i64(b"-0"), None);
        assert_eq!(parse_i64(b" 1"), None);
        assert_eq!(parse_i64(b"1 "), None);
        assert_eq!(parse_i64(b"1.5"), None);
        assert_eq!(parse_i64(b"9223372036854775808"), None);
    }

    #[test]
    fn format_f64_trims_zeros() {
        assert_eq!(format_f64(3.0), "3");
        assert_eq!(format_f64(3.5), "3.5");
        assert_eq!(format_f64(-0.25), "-0.25");
    }

    #[test]
    fn format_then_parse_round_trips() {
        for v in [0.0, 1.0, -2.5, 10.1, 1e15] {
            assert_eq!(parse_f64(format_f64(v).as_bytes()), Some(v));
        }
    }

    #[test]
    fn digit_counts() {
        assert_eq!(digits_i64(0), 1);
        assert_eq!(digits_i64(7), 1);
        assert_eq!(digits_i64(-7), 2);
        assert_eq!(digits_i64(1234), 4);
        assert_eq!(digits_i64(i64::MIN), 20);
    }
}
