//! Deterministic key hashing using blake3.
//!
//! Slot hashes are persisted next to the keys, so the hash of a key must be
//! the same in every process that ever opens the table. `std`'s `RandomState`
//! is seeded per process and cannot be used here.
//!
//! # Extension point
//!
//! [`MapKey::key_hash`] hashes the encoded key bytes with blake3 by default.
//! Integer keys override it with a cheap finaliser; a caller-defined key type
//! can supply its own mix the same way.

use crate::codec::FixedCodec;

/// Hashes a byte string. Stable across processes and platforms.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let digest = blake3::hash(bytes);
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(raw)
}

/// 64-bit finaliser (murmur3 `fmix64`). Spreads low-entropy integer keys over
/// the whole word so that masking with the capacity keeps them apart.
pub fn mix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

/// A key that can live in a slot table.
pub trait MapKey: FixedCodec + Eq {
    fn key_hash(&self) -> u64 {
        hash_bytes(&self.to_bytes())
    }
}

macro_rules! int_key {
    ($($ty:ty),*) => {
        $(
            impl MapKey for $ty {
                fn key_hash(&self) -> u64 {
                    mix64(*self as u64)
                }
            }
        )*
    };
}

int_key!(u8, u16, u32, u64, i8, i16, i32, i64);

impl MapKey for bool {}

impl<const N: usize> MapKey for [u8; N] {}

impl<A: MapKey, B: MapKey> MapKey for (A, B) {
    fn key_hash(&self) -> u64 {
        mix64(self.0.key_hash() ^ self.1.key_hash().rotate_left(29))
    }
}

impl<A: MapKey, B: MapKey, C: MapKey> MapKey for (A, B, C) {
    fn key_hash(&self) -> u64 {
        mix64(
            self.0.key_hash()
                ^ self.1.key_hash().rotate_left(21)
                ^ self.2.key_hash().rotate_left(42),
        )
    }
}

impl MapKey for crate::types::TextRef {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_bytes_is_deterministic() {
        assert_eq!(hash_bytes(b"1234foo"), hash_bytes(b"1234foo"));
        assert_ne!(hash_bytes(b"1234foo"), hash_bytes(b"1235foo"));
    }

    #[test]
    fn hash_bytes_matches_blake3_prefix() {
        let digest = blake3::hash(b"netlist");
        let expected = u64::from_le_bytes(digest.as_bytes()[..8].try_into().unwrap());
        assert_eq!(hash_bytes(b"netlist"), expected);
    }

    #[test]
    fn sequential_integers_spread_over_low_bits() {
        // 64 consecutive keys masked to 64 buckets should not pile into a few.
        let mut buckets = [0u32; 64];
        for k in 0u32..64 {
            buckets[(k.key_hash() & 63) as usize] += 1;
        }
        let worst = buckets.iter().copied().max().unwrap();
        assert!(worst <= 8, "worst bucket holds {worst} keys");
    }

    #[test]
    fn tuple_order_matters() {
        assert_ne!((1u32, 2u32).key_hash(), (2u32, 1u32).key_hash());
    }
}
