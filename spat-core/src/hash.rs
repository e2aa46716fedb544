// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! 32-bit hashing of key bytes.
//!
//! The directory picks buckets from the top bits of the hash, so the function
//! must mix well into the high bits. The default is CRC32 followed by the
//! MurmurHash3 finalizer; the `murmur3` feature switches to MurmurHash3
//! x86_32 proper. Every process attached to one database must be built with
//! the same choice.

/// Seed used by the MurmurHash3 variant.
#[cfg(feature = "murmur3")]
pub const MURMUR_SEED: u32 = 0xDEAD_BEEF;

/// Hash a byte string.
#[cfg(not(feature = "murmur3"))]
pub fn hash_bytes(data: &[u8]) -> u32 {
    fmix32(crc32fast::hash(data))
}

/// Hash a byte string.
#[cfg(feature = "murmur3")]
pub fn hash_bytes(data: &[u8]) -> u32 {
    murmur3_32(data, MURMUR_SEED)
}

/// MurmurHash3 avalanche step.
#[inline]
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

#[cfg(feature = "murmur3")]
fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h = seed;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k = 0u32;
        for (i, byte) in tail.iter().enumerate() {
            k |= (*byte as u32) << (8 * i);
        }
        h ^= k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
    }

    fmix32(h ^ data.len() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        assert_eq!(hash_bytes(b"alpha"), hash_bytes(b"alpha"));
        assert_ne!(hash_bytes(b"alpha"), hash_bytes(b"alphb"));
    }

    #[test]
    fn test_high_bits_spread() {
        // Sequential keys should land in many distinct top-7-bit partitions.
        let mut seen = std::collections::HashSet::new();
        for i in 0..1000 {
            seen.insert(hash_bytes(format!("key:{}", i).as_bytes()) >> 25);
        }
        assert!(seen.len() > 100, "only {} partitions used", seen.len());
    }

    #[test]
    fn test_fmix_zero() {
        assert_eq!(fmix32(0), 0);
    }

    #[cfg(feature = "murmur3")]
    #[test]
    fn test_murmur3_reference_values() {
        assert_eq!(murmur3_32(b"", 0), 0);
        assert_eq!(murmur3_32(b"", 1), 0x514E_28B7);
        assert_eq!(murmur3_32(b"test", 0), 0xBA6B_D213);
        assert_eq!(murmur3_32(b"Hello, world!", 0), 0xC036_3E43);
    }
}
