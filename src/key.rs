//! Fixed-width key canonicalization and hashing.
//!
//! A key is read as one 32-lane byte vector. Every lane at or after the `;`
//! is zeroed, so equal keys compare equal as whole vectors no matter what
//! follows them in the input.

use std::simd::prelude::*;

/// Lane width W: the widest key the vectorized path can hold.
pub const LANES: usize = 32;

pub type KeyVector = Simd<u8, LANES>;

const DELIMITERS: KeyVector = Simd::from_array([b';'; LANES]);
const NEWLINES: KeyVector = Simd::from_array([b'\n'; LANES]);
const ZEROES: KeyVector = Simd::from_array([0; LANES]);
const LANE_INDEX: KeyVector = Simd::from_array(lane_indices());

const fn lane_indices() -> [u8; LANES] {
    let mut lanes = [0u8; LANES];
    let mut i = 0;
    while i < LANES {
        lanes[i] = i as u8;
        i += 1;
    }
    lanes
}

/// A canonical, zero-padded key plus its horizontal-sum hash.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EncodedKey {
    pub key: KeyVector,
    pub len: usize,
    pub hash: u32,
}

impl EncodedKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.key.as_array()[..self.len]
    }
}

/// Encodes the key at the start of `bytes`, which must hold more than
/// [LANES] bytes.
///
/// Returns `None` when the record can't be handled from a single window:
/// the key is longer than [LANES] bytes, or a `'\n'` precedes the `;`.
/// A key of exactly [LANES] bytes is accepted when the byte right after the
/// window is the delimiter.
#[inline(always)]
pub fn encode_key(bytes: &[u8]) -> Option<EncodedKey> {
    let window = KeyVector::from_slice(&bytes[..LANES]);
    let len = match window.simd_eq(DELIMITERS).first_set() {
        Some(delimiter) => delimiter,
        None if bytes.get(LANES) == Some(&b';') => LANES,
        None => return None,
    };

    let key_lanes = LANE_INDEX.simd_lt(Simd::splat(len as u8));
    if (window.simd_eq(NEWLINES) & key_lanes).any() {
        return None;
    }

    let key = key_lanes.select(window, ZEROES);
    Some(EncodedKey {
        key,
        len,
        hash: hash_key(key),
    })
}

/// Wrapping sum of the key reinterpreted as eight 32-bit lanes.
#[inline(always)]
pub fn hash_key(key: KeyVector) -> u32 {
    // SAFETY: both types are 256-bit vectors of plain integers, every bit pattern is valid
    let words: Simd<u32, 8> = unsafe { std::mem::transmute(key) };
    words.reduce_sum()
}

/// Zero-pads a short byte string into canonical key form.
pub fn key_vector(bytes: &[u8]) -> KeyVector {
    let mut lanes = [0u8; LANES];
    lanes[..bytes.len()].copy_from_slice(bytes);
    Simd::from_array(lanes)
}
