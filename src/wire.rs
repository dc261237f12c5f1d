//! Fixed-width little-endian record framing for the exchange layer.
//!
//! Bytes produced by one rank's encoder are consumed by the identical
//! decoder on the peer; all participants share a binary, so the format
//! only fixes width and byte order (LE), nothing more. Records are
//! fixed-width, which lets the exchange layer convert between element
//! counts and byte counts without scanning.

use crate::error::{LomviError, Result};
use crate::kmer::Kmer;

/// A fixed-width record that can cross the exchange layer.
pub trait Wire: Sized + Copy {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Append the encoding of `self` to `out`.
    fn encode_into(&self, out: &mut Vec<u8>);

    /// Decode one record from exactly `WIDTH` bytes.
    fn decode(bytes: &[u8]) -> Self;
}

impl Wire for u32 {
    const WIDTH: usize = 4;

    #[inline]
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    #[inline]
    fn decode(bytes: &[u8]) -> Self {
        u32::from_le_bytes(bytes[..4].try_into().unwrap())
    }
}

impl Wire for u64 {
    const WIDTH: usize = 8;

    #[inline]
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    #[inline]
    fn decode(bytes: &[u8]) -> Self {
        u64::from_le_bytes(bytes[..8].try_into().unwrap())
    }
}

impl Wire for u8 {
    const WIDTH: usize = 1;

    #[inline]
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(*self);
    }

    #[inline]
    fn decode(bytes: &[u8]) -> Self {
        bytes[0]
    }
}

impl Wire for Kmer {
    const WIDTH: usize = 8;

    #[inline]
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.0.encode_into(out);
    }

    #[inline]
    fn decode(bytes: &[u8]) -> Self {
        Kmer(u64::decode(bytes))
    }
}

impl<A: Wire, B: Wire> Wire for (A, B) {
    const WIDTH: usize = A::WIDTH + B::WIDTH;

    #[inline]
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.0.encode_into(out);
        self.1.encode_into(out);
    }

    #[inline]
    fn decode(bytes: &[u8]) -> Self {
        (A::decode(bytes), B::decode(&bytes[A::WIDTH..]))
    }
}

/// Encode a slice of records into a fresh byte vector.
pub fn encode_slice<T: Wire>(records: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.len() * T::WIDTH);
    for r in records {
        r.encode_into(&mut out);
    }
    out
}

/// Decode a byte slice into records; the length must be an exact
/// multiple of the record width.
pub fn decode_vec<T: Wire>(bytes: &[u8]) -> Result<Vec<T>> {
    if bytes.len() % T::WIDTH != 0 {
        return Err(LomviError::validation(format!(
            "payload of {} bytes is not a multiple of record width {}",
            bytes.len(),
            T::WIDTH
        )));
    }
    Ok(bytes.chunks_exact(T::WIDTH).map(T::decode).collect())
}
