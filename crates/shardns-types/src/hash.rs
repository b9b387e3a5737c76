//! Container name hashing.
//!
//! Every process in a group must derive the same container identifier from
//! the same human-readable name without talking to the others, so the hash
//! here is fixed bit-for-bit: 8-byte chunks loaded little-endian regardless
//! of the host, FNV-128 constants, and a 128-bit product truncated to its low
//! 128 bits.

use std::fmt;

use serde::{Deserialize, Serialize};

/// FNV-128 offset basis, low word.
const OFFSET_LO: u64 = 0x62b8_2175_6295_c58d;
/// FNV-128 offset basis, high word.
const OFFSET_HI: u64 = 0x6c62_272e_07bb_0142;
/// FNV-128 prime (2^88 + 0x13b), low word.
const PRIME_LO: u64 = 0x0000_0000_0000_013b;
/// FNV-128 prime, high word.
const PRIME_HI: u64 = 0x0000_0000_0100_0000;

/// Hash a container name to a `(lo, hi)` pair.
pub fn hash128(name: &str) -> (u64, u64) {
    hash_chunks(name.as_bytes(), u64::from_le_bytes)
}

fn hash_chunks(bytes: &[u8], load: fn([u8; 8]) -> u64) -> (u64, u64) {
    let mut lo = OFFSET_LO;
    let mut hi = OFFSET_HI;
    for chunk in bytes.chunks(8) {
        let mut word = [0u8; 8];
        word[..chunk.len()].copy_from_slice(chunk);
        lo ^= load(word);
        (lo, hi) = mul128(lo, hi, PRIME_LO, PRIME_HI);
    }
    (lo, hi)
}

/// `a * b mod 2^128` from 64-bit halves. The `a_hi * b_hi` term only
/// contributes at bit 128 and above, so it is dropped.
fn mul128(a_lo: u64, a_hi: u64, b_lo: u64, b_hi: u64) -> (u64, u64) {
    let low = u128::from(a_lo) * u128::from(b_lo);
    let carry = (low >> 64) as u64;
    let hi = carry
        .wrapping_add(a_lo.wrapping_mul(b_hi))
        .wrapping_add(a_hi.wrapping_mul(b_lo));
    (low as u64, hi)
}

/// 16-byte identifier of a container, derived from its name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerUuid([u8; 16]);

impl ContainerUuid {
    /// Derive the identifier for a container name.
    pub fn from_name(name: &str) -> Self {
        let (lo, hi) = hash128(name);
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&lo.to_le_bytes());
        bytes[8..].copy_from_slice(&hi.to_le_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContainerUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContainerUuid({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for ContainerUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
