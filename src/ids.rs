//! Reversible mapping between numeric ids and the opaque strings used in URLs.
//!
//! The 64-bit pattern of the id is XORed with a fixed mask and written as
//! eleven base-58 symbols, most significant first, with the alphabet rotated
//! by a fixed stride per position. Every `i64` (negative values included)
//! maps to exactly one string, and strings that would overflow 64 bits are
//! rejected on decode.

use crate::error::{AppError, Result};

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const BASE: u64 = 58;
const WIDTH: usize = 11;
const MASK: u64 = 0x5A3C_96E1_0F7B_24D8;
const STRIDE: usize = 13;

fn rotation(position: usize) -> usize {
    (position * STRIDE) % ALPHABET.len()
}

pub fn encode_id(id: i64) -> String {
    let mut n = (id as u64) ^ MASK;
    let mut out = [0u8; WIDTH];
    for position in 0..WIDTH {
        let digit = (n % BASE) as usize;
        n /= BASE;
        out[WIDTH - 1 - position] = ALPHABET[(digit + rotation(position)) % ALPHABET.len()];
    }
    // ALPHABET is ASCII
    out.iter().map(|&b| b as char).collect()
}

pub fn decode_id(encoded: &str) -> Result<i64> {
    let bytes = encoded.as_bytes();
    if bytes.len() != WIDTH {
        return Err(AppError::BadRequest(format!(
            "Invalid id {:?}: expected {} symbols",
            encoded, WIDTH
        )));
    }

    let mut n: u64 = 0;
    for (index, byte) in bytes.iter().enumerate() {
        let position = WIDTH - 1 - index;
        let symbol = ALPHABET
            .iter()
            .position(|a| a == byte)
            .ok_or_else(|| AppError::BadRequest(format!("Invalid id {:?}", encoded)))?;
        let digit = (symbol + ALPHABET.len() - rotation(position)) % ALPHABET.len();
        n = n
            .checked_mul(BASE)
            .and_then(|n| n.checked_add(digit as u64))
            .ok_or_else(|| AppError::BadRequest(format!("Id {:?} out of range", encoded)))?;
    }

    Ok((n ^ MASK) as i64)
}
