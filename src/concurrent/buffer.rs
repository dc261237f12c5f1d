//! Fixed-capacity byte buffers for outbound message batching.
//!
//! Two buffer types sit behind the `ByteBuffer` trait:
//!
//! - [`AppendBuffer`]: shared, append-only; many producer threads
//!   reserve disjoint byte ranges with a CAS loop and copy concurrently.
//! - [`Frame`]: a plain single-owner byte frame, used once a payload has
//!   left the shared path (self-destination delivery, received bytes).
//!
//! Conversion between the two is an explicit transfer: `take_frame`
//! moves the bytes out and resets the source's size counter to zero.
//!
//! # Append protocol
//!
//! `append` first checks the blocked flag, then reserves `n` bytes by
//! advancing `reserved` with a CAS (so a loser that would overrun the
//! capacity never publishes its reservation), copies into the reserved
//! range, and finally advances `committed`. A reader must call `seal`
//! first: it blocks the buffer and waits for `committed` to catch up
//! with `reserved`, after which no byte of the readable prefix is still
//! being written.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::{LomviError, Result};

/// Read-side interface shared by the buffer types.
pub trait ByteBuffer {
    /// Bytes currently held.
    fn len(&self) -> usize;

    /// Maximum bytes the buffer can hold.
    fn capacity(&self) -> usize;

    /// Check for emptiness.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared fixed-capacity append-only byte buffer.
///
/// Storage is a slice of `UnsafeCell<u8>` so concurrent appenders can
/// write their reserved ranges through raw pointers without ever
/// forming aliasing references to the whole allocation.
pub struct AppendBuffer {
    data: Box<[UnsafeCell<u8>]>,
    reserved: AtomicUsize,
    committed: AtomicUsize,
    blocked: AtomicBool,
}

// SAFETY: concurrent appenders write disjoint ranges (each owns exactly
// the range its CAS reserved); readers only access the committed prefix
// after seal() has observed committed == reserved with the blocked flag
// preventing new reservations.
unsafe impl Sync for AppendBuffer {}
unsafe impl Send for AppendBuffer {}

impl AppendBuffer {
    /// Allocate a buffer of the given capacity.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(LomviError::validation("buffer capacity must be positive"));
        }
        Ok(AppendBuffer {
            data: (0..capacity).map(|_| UnsafeCell::new(0)).collect(),
            reserved: AtomicUsize::new(0),
            committed: AtomicUsize::new(0),
            blocked: AtomicBool::new(false),
        })
    }

    /// Append bytes. Returns false if the buffer is blocked or the bytes
    /// do not fit; a false return leaves the buffer unchanged.
    pub fn append(&self, bytes: &[u8]) -> bool {
        if self.is_blocked() {
            return false;
        }
        let capacity = self.capacity();
        let n = bytes.len();

        let mut offset = self.reserved.load(Ordering::Acquire);
        loop {
            if offset + n > capacity {
                return false;
            }
            match self.reserved.compare_exchange(
                offset,
                offset + n,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => offset = current,
            }
        }

        // SAFETY: [offset, offset + n) was reserved exclusively above;
        // UnsafeCell<u8> has the layout of u8.
        unsafe {
            let dst = self.data.as_ptr().add(offset) as *mut u8;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, n);
        }
        self.committed.fetch_add(n, Ordering::AcqRel);
        true
    }

    /// Stop accepting appends.
    pub fn block(&self) {
        self.blocked.store(true, Ordering::Release);
    }

    /// Accept appends again.
    pub fn unblock(&self) {
        self.blocked.store(false, Ordering::Release);
    }

    /// Whether appends are currently refused.
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    /// Reset the size to zero and unblock, keeping the allocation.
    pub fn clear(&self) {
        self.reserved.store(0, Ordering::Release);
        self.committed.store(0, Ordering::Release);
        self.unblock();
    }

    /// Block the buffer and wait for in-flight appends to finish copying.
    /// Returns the readable length.
    pub fn seal(&self) -> usize {
        self.block();
        loop {
            let reserved = self.reserved.load(Ordering::Acquire);
            let committed = self.committed.load(Ordering::Acquire);
            if committed == reserved {
                return committed;
            }
            std::hint::spin_loop();
        }
    }

    /// Read the sealed prefix. Callers must have called `seal` and must
    /// not race it with `clear`/`unblock`; the send worker is the only
    /// reader in practice.
    pub fn sealed_bytes(&self) -> &[u8] {
        debug_assert!(self.is_blocked());
        let len = self.committed.load(Ordering::Acquire);
        // SAFETY: seal() ordered all appender copies before this read and
        // the blocked flag stops new reservations.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr() as *const u8, len) }
    }

    /// Explicit transfer: seal, copy the bytes into an owned `Frame`,
    /// and reset this buffer's size counter to zero (unblocked, ready
    /// for reuse).
    pub fn take_frame(&self) -> Frame {
        self.seal();
        let frame = Frame::from_bytes(self.sealed_bytes());
        self.clear();
        frame
    }
}

impl ByteBuffer for AppendBuffer {
    fn len(&self) -> usize {
        self.committed.load(Ordering::Acquire)
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

/// Single-owner byte frame.
#[derive(Debug, Default)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Frame {
            bytes: bytes.to_vec(),
        }
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Frame { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

impl ByteBuffer for Frame {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn capacity(&self) -> usize {
        self.bytes.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(AppendBuffer::new(0).is_err());
    }

    #[test]
    fn test_append_and_read() {
        let buf = AppendBuffer::new(16).unwrap();
        assert!(buf.append(b"abc"));
        assert!(buf.append(b"defg"));
        assert_eq!(buf.len(), 7);
        assert_eq!(buf.seal(), 7);
        assert_eq!(buf.sealed_bytes(), b"abcdefg");
    }

    #[test]
    fn test_append_overrun_fails_clean() {
        let buf = AppendBuffer::new(4).unwrap();
        assert!(buf.append(b"abc"));
        assert!(!buf.append(b"de")); // 5 > 4
        assert_eq!(buf.len(), 3);
        assert!(buf.append(b"d")); // exact fit still works
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_block_refuses_appends() {
        let buf = AppendBuffer::new(8).unwrap();
        buf.block();
        assert!(!buf.append(b"x"));
        buf.unblock();
        assert!(buf.append(b"x"));
    }

    #[test]
    fn test_clear_resets_and_unblocks() {
        let buf = AppendBuffer::new(8).unwrap();
        buf.append(b"abcd");
        buf.block();
        buf.clear();
        assert_eq!(buf.len(), 0);
        assert!(!buf.is_blocked());
        assert!(buf.append(b"xy"));
    }

    #[test]
    fn test_take_frame_transfers_and_resets() {
        let buf = AppendBuffer::new(8).unwrap();
        buf.append(b"abcd");
        let frame = buf.take_frame();
        assert_eq!(frame.bytes(), b"abcd");
        assert_eq!(buf.len(), 0);
        assert!(!buf.is_blocked());
    }

    #[test]
    fn test_concurrent_appends_no_interleaving() {
        let buf = Arc::new(AppendBuffer::new(4096).unwrap());
        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let buf = Arc::clone(&buf);
                thread::spawn(move || {
                    let record = [t; 4];
                    let mut accepted = 0;
                    for _ in 0..100 {
                        if buf.append(&record) {
                            accepted += 1;
                        }
                    }
                    accepted
                })
            })
            .collect();

        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        let len = buf.seal();
        assert_eq!(len, accepted * 4);

        // every 4-byte record is a single writer's bytes, uncorrupted
        for chunk in buf.sealed_bytes().chunks_exact(4) {
            assert!(chunk.iter().all(|&b| b == chunk[0]));
        }
    }
}
