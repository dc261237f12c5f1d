//! Hash functions for key distribution and local storage.
//!
//! Two independent hashes drive the distributed maps:
//! - the *prefix* hash assigns owners: it extracts the top
//!   `ceil(log2 P)` bits of the avalanche output, then reduces modulo P,
//!   so ownership stays well-distributed even for dense integer keys;
//! - the *suffix* hash feeds the local hash table, which consumes the
//!   low bits.
//!
//! Using distinct bit ranges keeps the two layers decorrelated: keys
//! that collide on an owner do not automatically collide in that
//! owner's buckets.

use std::hash::{BuildHasher, Hasher};

/// The built-in 64-bit avalanche functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashKind {
    /// No mixing; the raw key word. Useful for tests that need to place
    /// keys on chosen ranks.
    Identity,
    /// Fibonacci multiplicative mix, in the spirit of the std-lib
    /// SipHash replacement hashers used for integer keys.
    #[default]
    Std,
    /// Farm-style shift-mix finalizer (the HashLen16 tail).
    Farm,
    /// MurmurHash3 64-bit finalizer.
    Murmur,
}

const FIB_MUL: u64 = 0x9E37_79B9_7F4A_7C15;
const FARM_MUL: u64 = 0x9DDF_EA08_EB38_2D69;
const FARM_SEED: u64 = 0x1F0D_3804_03F8_A5C3;

impl HashKind {
    /// Mix a 64-bit word. All kinds except `Identity` avalanche the
    /// full word so both the high and the low bits are usable.
    #[inline]
    pub fn mix(self, x: u64) -> u64 {
        match self {
            HashKind::Identity => x,
            HashKind::Std => x.wrapping_mul(FIB_MUL),
            HashKind::Farm => {
                let mut a = (x ^ FARM_SEED).wrapping_mul(FARM_MUL);
                a ^= a >> 47;
                let mut b = (FARM_SEED ^ a).wrapping_mul(FARM_MUL);
                b ^= b >> 47;
                b.wrapping_mul(FARM_MUL)
            }
            HashKind::Murmur => {
                let mut h = x;
                h ^= h >> 33;
                h = h.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
                h ^= h >> 33;
                h = h.wrapping_mul(0xC4CE_B9FE_1A85_EC53);
                h ^= h >> 33;
                h
            }
        }
    }
}

/// Owner assignment from the high bits of the avalanche output.
#[derive(Debug, Clone, Copy)]
pub struct PrefixHash {
    kind: HashKind,
    bits: u32,
    ranks: usize,
}

impl PrefixHash {
    /// Build the rank function for a communicator of `ranks` processes.
    pub fn new(kind: HashKind, ranks: usize) -> Self {
        let bits = ceil_log2(ranks).max(1);
        PrefixHash { kind, bits, ranks }
    }

    /// The owning rank for a (pre-transformed) key word.
    #[inline]
    pub fn rank(&self, key: u64) -> usize {
        let h = self.kind.mix(key);
        let top = (h >> (64 - self.bits)) as usize;
        top % self.ranks
    }
}

/// Smallest b with 2^b >= n (0 for n <= 1).
#[inline]
pub(crate) fn ceil_log2(n: usize) -> u32 {
    if n <= 1 {
        0
    } else {
        usize::BITS - (n - 1).leading_zeros()
    }
}

// ============================================================================
// Local-storage hasher
// ============================================================================

/// `BuildHasher` for the local hash tables: low bits of the configured
/// avalanche function.
///
/// Keys reaching a local table have already been canonicalized, so
/// equal-after-transform keys are bitwise equal here and no further
/// transform is applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuffixBuild {
    kind: HashKind,
}

impl SuffixBuild {
    pub fn new(kind: HashKind) -> Self {
        SuffixBuild { kind }
    }
}

impl BuildHasher for SuffixBuild {
    type Hasher = SuffixHasher;

    #[inline]
    fn build_hasher(&self) -> SuffixHasher {
        SuffixHasher {
            kind: self.kind,
            state: 0,
        }
    }
}

/// Hasher over single 64-bit words; the only write path the packed
/// k-mer key exercises.
pub struct SuffixHasher {
    kind: HashKind,
    state: u64,
}

impl Hasher for SuffixHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.state
    }

    #[inline]
    fn write_u64(&mut self, x: u64) {
        self.state = self.kind.mix(x);
    }

    fn write(&mut self, bytes: &[u8]) {
        // Fallback for non-u64 writes; folds 8-byte chunks.
        let mut acc = self.state;
        for chunk in bytes.chunks(8) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            acc = self.kind.mix(acc ^ u64::from_le_bytes(word));
        }
        self.state = acc;
    }
}
