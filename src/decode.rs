//! Branchless fixed-point decoding of `-?d{1,2}.d` followed by `'\n'`.
//!
//! Sign, dot and newline are the only bytes of a well-formed field below
//! `'0'`. The "below `'0'`" bits of the first four lanes identify one of four
//! shapes; each shape carries per-lane weights with the sign already folded
//! in, so the value is a single multiply and horizontal sum.

use std::simd::prelude::*;

/// Width of the numeric window. Any field plus its terminator fits in 6 bytes.
pub const DECODE_LANES: usize = 16;

type DigitWindow = Simd<u8, DECODE_LANES>;
type Weights = Simd<i16, DECODE_LANES>;

const ASCII_ZEROES: DigitWindow = Simd::from_array([b'0'; DECODE_LANES]);
const ASCII_NINES: DigitWindow = Simd::from_array([b'9'; DECODE_LANES]);
const ASCII_ZERO_WORDS: Weights = Simd::from_array([b'0' as i16; DECODE_LANES]);

/// A decoded measurement in tenths and the field length including its `'\n'`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Measurement {
    pub value: i32,
    pub len: usize,
}

#[derive(Clone, Copy)]
struct Shape {
    /// 0 for the unsupported lookup indices
    len: u8,
    index: usize,
    weights: Weights,
    /// expected `-`, `.` and `\n` bytes, 0 elsewhere
    punct: DigitWindow,
    punct_mask: u64,
    digit_mask: u64,
}

impl Shape {
    const UNSUPPORTED: Shape = Shape {
        len: 0,
        index: 0,
        weights: Simd::from_array([0; DECODE_LANES]),
        punct: Simd::from_array([0; DECODE_LANES]),
        punct_mask: 0,
        digit_mask: 0,
    };

    /// Builds a shape from a pattern where `D` stands for any digit.
    const fn from_pattern(pattern: &[u8]) -> Shape {
        let negative = pattern[0] == b'-';
        let mut weights = [0i16; DECODE_LANES];
        let mut punct = [0u8; DECODE_LANES];
        let mut punct_mask = 0u64;
        let mut digit_mask = 0u64;
        let mut index = 0usize;
        let mut place = 1i16;

        let mut i = pattern.len();
        while i > 0 {
            i -= 1;
            if pattern[i] == b'D' {
                weights[i] = if negative { -place } else { place };
                place *= 10;
                digit_mask |= 1 << i;
            } else {
                punct[i] = pattern[i];
                punct_mask |= 1 << i;
                if i < 4 {
                    index |= 1 << i;
                }
            }
        }

        Shape {
            len: pattern.len() as u8,
            index,
            weights: Simd::from_array(weights),
            punct: Simd::from_array(punct),
            punct_mask,
            digit_mask,
        }
    }
}

const SHAPES: [Shape; 16] = {
    let mut shapes = [Shape::UNSUPPORTED; 16];
    let patterns: [&[u8]; 4] = [b"D.D\n", b"DD.D\n", b"-D.D\n", b"-DD.D\n"];
    let mut i = 0;
    while i < patterns.len() {
        let shape = Shape::from_pattern(patterns[i]);
        shapes[shape.index] = shape;
        i += 1;
    }
    shapes
};

/// Decodes the measurement at the start of `bytes`, which must hold at least
/// [DECODE_LANES] bytes.
///
/// Returns `None` unless the field is exactly `-?d{1,2}.d` terminated by
/// `'\n'`; the scalar parser takes over for those records.
#[inline(always)]
pub fn decode_measurement(bytes: &[u8]) -> Option<Measurement> {
    let window = DigitWindow::from_slice(&bytes[..DECODE_LANES]);
    let below_zero = window.simd_lt(ASCII_ZEROES).to_bitmask();
    let shape = &SHAPES[(below_zero & 0xF) as usize];

    let punct = window.simd_eq(shape.punct).to_bitmask() & shape.punct_mask;
    let digits =
        (window.simd_ge(ASCII_ZEROES) & window.simd_le(ASCII_NINES)).to_bitmask() & shape.digit_mask;
    if shape.len == 0 || punct != shape.punct_mask || digits != shape.digit_mask {
        return None;
    }

    let value = ((window.cast::<i16>() - ASCII_ZERO_WORDS) * shape.weights).reduce_sum();
    Some(Measurement {
        value: i32::from(value),
        len: usize::from(shape.len),
    })
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::{decode_measurement, Measurement, DECODE_LANES};
    use crate::stats::Tenths;

    fn decode(field: &[u8]) -> Option<Measurement> {
        let mut bytes = field.to_vec();
        bytes.resize(DECODE_LANES, b'7');
        decode_measurement(&bytes)
    }

    #[test]
    fn decodes_all_four_shapes() {
        for (field, value, len) in [
            (&b"1.2\n"[..], 12, 4),
            (b"12.3\n", 123, 5),
            (b"-5.9\n", -59, 5),
            (b"-12.3\n", -123, 6),
            (b"99.9\n", 999, 5),
            (b"-99.9\n", -999, 6),
            (b"0.0\n", 0, 4),
            (b"-0.0\n", 0, 5),
        ] {
            assert_eq!(
                decode(field),
                Some(Measurement { value, len }),
                "field: {:?}",
                String::from_utf8_lossy(field)
            );
        }
    }

    #[test]
    fn rejects_fields_outside_the_grammar() {
        for field in [
            &b"100.0\n"[..],
            b"1.23\n",
            b"+1.2\n",
            b"1,2\n",
            b"1a.2\n",
            b"-.2\n",
            b"12.3\r\n",
            b"12.3;",
            b"1.2 ",
            b".5\n",
            b"--1.2\n",
        ] {
            assert_eq!(
                decode(field),
                None,
                "field: {:?}",
                String::from_utf8_lossy(field)
            );
        }
    }

    proptest! {
        #[test]
        fn decode_matches_scaled_float(tenths in -999i32..=999) {
            let field = format!("{}\n", Tenths(i64::from(tenths)));
            let expected = (field.trim_end().parse::<f64>().unwrap() * 10.0).round() as i32;
            let decoded = decode(field.as_bytes());
            prop_assert_eq!(decoded, Some(Measurement { value: expected, len: field.len() }));
        }
    }
}
