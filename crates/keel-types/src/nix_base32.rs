//! The base-32 flavour used in store paths and NAR hashes.
//!
//! Nix uses its own alphabet (no `e`, `o`, `u`, `t`) and emits digits from
//! the most significant 5-bit group down, so encodings are not compatible
//! with RFC 4648 base32.

use crate::error::{TypeError, TypeResult};

/// The 32 digits, in value order.
pub const ALPHABET: &[u8; 32] = b"0123456789abcdfghijklmnpqrsvwxyz";

/// Length of the encoding of `len` bytes.
pub const fn encoded_len(len: usize) -> usize {
    if len == 0 {
        0
    } else {
        (len * 8 - 1) / 5 + 1
    }
}

/// Returns `true` if `c` is a digit of the alphabet.
pub fn is_digit(c: u8) -> bool {
    ALPHABET.contains(&c)
}

/// Encode bytes as a nix-base32 string.
pub fn encode(bytes: &[u8]) -> String {
    let len = encoded_len(bytes.len());
    let mut out = String::with_capacity(len);

    for n in (0..len).rev() {
        let bit = n * 5;
        let i = bit / 8;
        let j = bit % 8;
        let low = u16::from(bytes[i]) >> j;
        let high = bytes.get(i + 1).map_or(0, |&b| u16::from(b) << (8 - j));
        let digit = ((low | high) & 0x1f) as usize;
        out.push(char::from(ALPHABET[digit]));
    }

    out
}

/// Decode a nix-base32 string.
///
/// Fails on characters outside the alphabet and on encodings whose leading
/// digit carries bits beyond the decoded length.
pub fn decode(s: &str) -> TypeResult<Vec<u8>> {
    let input = s.as_bytes();
    let size = input.len() * 5 / 8;
    let mut out = vec![0u8; size];
    let invalid = || TypeError::InvalidBase32(s.to_string());

    for (n, &c) in input.iter().rev().enumerate() {
        let digit = ALPHABET
            .iter()
            .position(|&d| d == c)
            .ok_or_else(invalid)? as u16;

        let bit = n * 5;
        let i = bit / 8;
        let j = bit % 8;
        let shifted = digit << j;
        let low = (shifted & 0xff) as u8;
        let high = (shifted >> 8) as u8;

        match out.get_mut(i) {
            Some(byte) => *byte |= low,
            None if low != 0 => return Err(invalid()),
            None => {}
        }
        if high != 0 {
            match out.get_mut(i + 1) {
                Some(byte) => *byte |= high,
                None => return Err(invalid()),
            }
        }
    }

    Ok(out)
}
