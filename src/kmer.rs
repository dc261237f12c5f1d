//! Packed k-mer representation, canonical transforms, and generation.
//!
//! This module provides:
//! - `Kmer`, a k-mer packed into a single 64-bit word
//! - `KmerSpec`, the (k, alphabet) pair with the packing arithmetic
//! - `KeyTransform`, the canonicalization applied before hashing/equality
//! - `KmerScan`, the rolling generator over a read's bases
//!
//! A read of length L yields L − k + 1 k-mers; symbols the alphabet
//! rejects reset the scan, so no k-mer spans an invalid byte.

use crate::alphabet::{Alphabet, INVALID_CODE};
use crate::error::{LomviError, Result};

/// A k-mer packed into a 64-bit word.
///
/// The most recently appended symbol occupies the low bits. The word is
/// opaque outside this module: equality and hashing go through the owning
/// map's `KeyTransform`, never through the raw word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Kmer(pub u64);

/// The (k, alphabet) pair plus the packing arithmetic derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KmerSpec {
    k: usize,
    alphabet: Alphabet,
    mask: u64,
}

impl KmerSpec {
    /// Create a spec, validating that k symbols fit the packed word.
    pub fn new(k: usize, alphabet: Alphabet) -> Result<Self> {
        if k == 0 {
            return Err(LomviError::validation("k must be positive"));
        }
        if k > alphabet.max_k() {
            return Err(LomviError::validation(format!(
                "k = {} exceeds the packed-word limit of {} for {:?}",
                k,
                alphabet.max_k(),
                alphabet
            )));
        }
        let bits = k * alphabet.bits_per_symbol();
        let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
        Ok(KmerSpec { k, alphabet, mask })
    }

    /// K-mer length in symbols.
    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    /// The packing alphabet.
    #[inline]
    pub fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    /// Shift one packed symbol code into the low end of a rolling word.
    #[inline]
    pub fn roll(&self, word: u64, code: u8) -> u64 {
        ((word << self.alphabet.bits_per_symbol()) | code as u64) & self.mask
    }

    /// Reverse complement of a packed k-mer.
    ///
    /// Symbols are complemented individually and their order reversed.
    pub fn reverse_complement(&self, kmer: Kmer) -> Kmer {
        let bits = self.alphabet.bits_per_symbol();
        let sym_mask = (1u64 << bits) - 1;
        let mut src = kmer.0;
        let mut out = 0u64;
        for _ in 0..self.k {
            let code = (src & sym_mask) as u8;
            out = (out << bits) | self.alphabet.complement(code) as u64;
            src >>= bits;
        }
        Kmer(out)
    }

    /// Pack a full slice of exactly k bases, or None if any byte is
    /// invalid for the alphabet. Mostly used by tests and small queries.
    pub fn pack(&self, bases: &[u8]) -> Option<Kmer> {
        if bases.len() != self.k {
            return None;
        }
        let mut word = 0u64;
        for &b in bases {
            let code = self.alphabet.encode(b);
            if code == INVALID_CODE {
                return None;
            }
            word = self.roll(word, code);
        }
        Some(Kmer(word))
    }
}

/// Canonicalization applied to every key before hashing and equality.
///
/// The contract: if `apply(a) == apply(b)` then both the distribution
/// hash and the local-storage hash of `a` and `b` agree, because both
/// hashes are computed on the transformed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyTransform {
    /// Keys are used as-is; strands stay distinct.
    #[default]
    Identity,
    /// XOR of the k-mer with its reverse complement. Symmetric in the
    /// two strands and cheap, but not injective on single strands.
    XorCanonical,
    /// The lexicographically smaller of the k-mer and its reverse
    /// complement; the conventional canonical k-mer.
    LexCanonical,
}

impl KeyTransform {
    /// Apply the transform.
    #[inline]
    pub fn apply(&self, kmer: Kmer, spec: &KmerSpec) -> Kmer {
        match self {
            KeyTransform::Identity => kmer,
            KeyTransform::XorCanonical => Kmer(kmer.0 ^ spec.reverse_complement(kmer).0),
            KeyTransform::LexCanonical => {
                let rc = spec.reverse_complement(kmer);
                if rc.0 < kmer.0 {
                    rc
                } else {
                    kmer
                }
            }
        }
    }
}

/// Rolling k-mer generator over a read's bases.
///
/// Yields `(offset, kmer)` for every window of k consecutive valid
/// symbols; an invalid byte resets the window, so no k-mer ever spans
/// a rejected base.
pub struct KmerScan<'a> {
    spec: KmerSpec,
    seq: &'a [u8],
    pos: usize,
    word: u64,
    valid: usize,
}

impl<'a> KmerScan<'a> {
    pub fn new(spec: KmerSpec, seq: &'a [u8]) -> Self {
        KmerScan {
            spec,
            seq,
            pos: 0,
            word: 0,
            valid: 0,
        }
    }
}

impl<'a> Iterator for KmerScan<'a> {
    type Item = (usize, Kmer);

    fn next(&mut self) -> Option<(usize, Kmer)> {
        while self.pos < self.seq.len() {
            let code = self.spec.alphabet().encode(self.seq[self.pos]);
            self.pos += 1;

            if code == INVALID_CODE {
                self.valid = 0;
                self.word = 0;
                continue;
            }

            self.valid += 1;
            self.word = self.spec.roll(self.word, code);

            if self.valid >= self.spec.k() {
                let offset = self.pos - self.spec.k();
                return Some((offset, Kmer(self.word)));
            }
        }
        None
    }
}
