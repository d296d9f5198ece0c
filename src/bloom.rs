// Copyright 2024 PaxLight Project Authors. Licensed under Apache-2.0.

//! Per-column bloom filters.
//!
//! A filter is a fixed-size bit array with `k` rounds of double hashing.
//! The hash family is pluggable and persisted by ordinal ID, so a reader
//! always probes with the same family the writer inserted with.

use bitvec::prelude::{bitvec, BitVec, Lsb0};
use bytes::{Buf, BufMut};

use crate::error::{FormatError, FormatResult};

const SEED_ONE: u32 = 0x9747_b28c;
const SEED_TWO: u32 = 0x8f1b_bcdc;

/// Hash family, persisted as an ordinal in the filter's serialized form.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BloomHash {
    #[default]
    Murmur = 0,
    Crc32 = 1,
    Xx = 2,
}

impl TryFrom<u32> for BloomHash {
    type Error = FormatError;

    fn try_from(id: u32) -> FormatResult<Self> {
        match id {
            0 => Ok(Self::Murmur),
            1 => Ok(Self::Crc32),
            2 => Ok(Self::Xx),
            _ => Err(FormatError::corrupt(format!("unknown hash family id {id}"))),
        }
    }
}

impl BloomHash {
    fn hash(self, seed: u32, data: &[u8]) -> i64 {
        match self {
            BloomHash::Murmur => murmur3_32(data, seed) as i64,
            BloomHash::Crc32 => {
                let mut hasher = crc32fast::Hasher::new_with_initial(seed);
                hasher.update(data);
                hasher.finalize() as i64
            }
            BloomHash::Xx => twox_hash::xxh3::hash64_with_seed(data, seed as u64) as i64,
        }
    }
}

/// Murmur3 x86 32-bit. Hand-rolled so the default family has no crate
/// dependency and a stable definition across builds.
pub(crate) fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h = seed;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h = (h ^ k).rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k = 0u32;
        for (i, byte) in tail.iter().enumerate() {
            k |= (*byte as u32) << (8 * i);
        }
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
    }

    h ^= data.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Bloom filter over serialized key bytes.
///
/// `bits` always holds a multiple of 8 bits so the serialized bitset is a
/// whole number of bytes.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: BitVec<u8, Lsb0>,
    hashes: u32,
    family: BloomHash,
}

impl BloomFilter {
    /// Size the filter for `expected` distinct values at the given false
    /// positive rate: `m = -n ln p / ln^2 2` rounded up to a byte boundary,
    /// `k = max(1, round(ln 2 * m / n))`.
    pub fn with_rate(rate: f64, expected: usize, family: BloomHash) -> FormatResult<Self> {
        if !(rate > 0.0 && rate < 1.0) {
            return Err(FormatError::config(format!(
                "bloom false positive rate must be in (0, 1), got {rate}"
            )));
        }
        if expected == 0 {
            return Err(FormatError::config("bloom expected cardinality must be > 0"));
        }
        let n = expected as f64;
        let ln2 = std::f64::consts::LN_2;
        let m = (-(n * rate.ln()) / (ln2 * ln2)).ceil() as usize;
        let m = m.div_ceil(8) * 8;
        let k = ((ln2 * m as f64 / n).round() as u32).max(1);
        Ok(Self {
            bits: bitvec![u8, Lsb0; 0; m],
            hashes: k,
            family,
        })
    }

    pub fn bit_count(&self) -> usize {
        self.bits.len()
    }

    pub fn hash_count(&self) -> u32 {
        self.hashes
    }

    pub fn family(&self) -> BloomHash {
        self.family
    }

    fn index(&self, h1: i64, h2: i64, round: i64) -> usize {
        let mixed = h1
            .wrapping_add(round.wrapping_mul(h2))
            .wrapping_add(round * round * round);
        (mixed.unsigned_abs() % self.bits.len() as u64) as usize
    }

    pub fn add(&mut self, key: &[u8]) {
        let h1 = self.family.hash(SEED_ONE, key);
        let h2 = self.family.hash(SEED_TWO, key);
        for i in 1..=self.hashes as i64 {
            let idx = self.index(h1, h2, i);
            self.bits.set(idx, true);
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let h1 = self.family.hash(SEED_ONE, key);
        let h2 = self.family.hash(SEED_TWO, key);
        (1..=self.hashes as i64).all(|i| self.bits[self.index(h1, h2, i)])
    }

    /// Zero the bitset in place for row-group reuse.
    pub fn reset(&mut self) {
        self.bits.fill(false);
    }

    /// Serialized size in bytes: `m | k | family` plus the bitset.
    pub fn encoded_size(&self) -> usize {
        12 + self.bits.len() / 8
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i32(self.bits.len() as i32);
        buf.put_i32(self.hashes as i32);
        buf.put_i32(self.family as i32);
        buf.put_slice(self.bits.as_raw_slice());
    }

    pub fn decode(buf: &mut impl Buf) -> FormatResult<Self> {
        if buf.remaining() < 12 {
            return Err(FormatError::corrupt("bloom filter header truncated"));
        }
        let m = buf.get_i32();
        let k = buf.get_i32();
        let family = BloomHash::try_from(buf.get_i32() as u32)?;
        if m <= 0 || m % 8 != 0 || k <= 0 {
            return Err(FormatError::corrupt(format!(
                "malformed bloom filter dimensions m={m} k={k}"
            )));
        }
        let bytes = m as usize / 8;
        if buf.remaining() < bytes {
            return Err(FormatError::corrupt("bloom filter bitset truncated"));
        }
        let mut raw = vec![0u8; bytes];
        buf.copy_to_slice(&mut raw);
        Ok(Self {
            bits: BitVec::from_vec(raw),
            hashes: k as u32,
            family,
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn test_sizing() {
        let bloom = BloomFilter::with_rate(0.01, 1000, BloomHash::Murmur).unwrap();
        assert_eq!(bloom.bit_count() % 8, 0);
        // ~9.59 bits per value for a 1% target
        assert!(bloom.bit_count() >= 9 * 1000);
        assert!(bloom.bit_count() <= 10 * 1000);
        assert!(bloom.hash_count() >= 6 && bloom.hash_count() <= 8);

        assert!(BloomFilter::with_rate(0.0, 10, BloomHash::Murmur).is_err());
        assert!(BloomFilter::with_rate(0.5, 0, BloomHash::Murmur).is_err());
    }

    #[test]
    fn test_no_false_negatives() {
        for family in [BloomHash::Murmur, BloomHash::Crc32, BloomHash::Xx] {
            let mut bloom = BloomFilter::with_rate(0.01, 2000, family).unwrap();
            for i in 0..2000i64 {
                bloom.add(&i.to_be_bytes());
            }
            for i in 0..2000i64 {
                assert!(bloom.contains(&i.to_be_bytes()), "{family:?} lost {i}");
            }
        }
    }

    #[test]
    fn test_false_positive_rate() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut bloom = BloomFilter::with_rate(0.01, 10_000, BloomHash::Murmur).unwrap();
        for _ in 0..10_000 {
            bloom.add(&rng.gen_range(0..1_000_000i64).to_be_bytes());
        }
        let positives = (1_000_000..1_100_000i64)
            .filter(|i| bloom.contains(&i.to_be_bytes()))
            .count();
        // allow a small multiple of the 1% target
        assert!(positives < 3_000, "false positive rate too high: {positives}/100000");
    }

    #[test]
    fn test_roundtrip_and_reset() {
        let mut bloom = BloomFilter::with_rate(0.05, 100, BloomHash::Xx).unwrap();
        bloom.add(b"alpha");
        bloom.add(b"beta");

        let mut buf = vec![];
        bloom.encode(&mut buf);
        assert_eq!(buf.len(), bloom.encoded_size());

        let decoded = BloomFilter::decode(&mut &buf[..]).unwrap();
        assert_eq!(decoded.family(), BloomHash::Xx);
        assert!(decoded.contains(b"alpha"));
        assert!(decoded.contains(b"beta"));

        bloom.reset();
        assert!(!bloom.contains(b"alpha"));
        assert_eq!(bloom.encoded_size(), 12 + bloom.bit_count() / 8);
    }
}
