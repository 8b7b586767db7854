//! Byte-wise record parser. Handles slice tails too short for a vector read,
//! records the vector path declines, and serves as the oracle the vector path
//! is tested against.

use memchr::memchr;

use crate::error::RecordError;

/// Result of parsing a well-formed record
#[derive(Debug, Eq, PartialEq)]
pub struct ParsedRow<'a> {
    pub key: &'a [u8],
    /// measurement in tenths
    pub value: i32,
    /// bytes consumed, including the `'\n'` if present
    pub consumed: usize,
}

/// Parses the first record of a non-empty `chunk`. The record ends at the
/// first `'\n'` or at the end of `chunk`.
pub fn parse_record(chunk: &[u8]) -> Result<ParsedRow<'_>, RecordError> {
    let (line, consumed) = match memchr(b'\n', chunk) {
        Some(pos) => (&chunk[..pos], pos + 1),
        None => (chunk, chunk.len()),
    };
    let Some(semi_pos) = memchr(b';', line) else {
        return Err(RecordError::MissingDelimiter);
    };
    let (key, rest) = line.split_at(semi_pos);
    let value = parse_measurement(&rest[1..])?;

    Ok(ParsedRow {
        key,
        value,
        consumed,
    })
}

/// Parses `-?d{1,2}.d` into tenths.
pub fn parse_measurement(mut text: &[u8]) -> Result<i32, RecordError> {
    let mut sign = 1;
    if let [b'-', rest @ ..] = text {
        text = rest;
        sign = -1;
    }

    let m_len = text.len();
    if !(3..=4).contains(&m_len) {
        return Err(RecordError::InvalidMeasurement);
    }

    let ones = i32::from(text[m_len - 1].wrapping_sub(b'0'));
    let tens = i32::from(text[m_len - 3].wrapping_sub(b'0'));
    // for `a.b` this reads `a` a second time; the length check zeroes it out
    let hundreds = (m_len == 4) as i32 * i32::from(text[0].wrapping_sub(b'0'));

    if ones.max(tens).max(hundreds) >= 10 || text[m_len - 2] != b'.' {
        return Err(RecordError::InvalidMeasurement);
    }
    Ok(sign * (ones + tens * 10 + hundreds * 100))
}
