//! Library-wide constants and defaults.

/// Default capacity of the outbound send queue (elements).
/// Finite so that producers eventually block instead of ballooning memory.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Default capacity of each per-destination outbound byte buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 8192;

/// Spin iterations before a blocking queue operation parks on a condvar.
pub const SPIN_LIMIT: usize = 64;

/// Estimated bytes of FASTQ file per k-mer, used to size reservations
/// before the real record stream has been scanned. FASTQ spends roughly
/// half its bytes on sequence, and each sequence base past the k-mer
/// window start yields one k-mer.
pub const FASTQ_BYTES_PER_KMER: usize = 2;

/// Upper bound on the number of ranks a communicator may span.
/// Keeps prefix-hash rank extraction within the bit budget.
pub const MAX_COMM_SIZE: usize = 1 << 16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_nonzero() {
        assert!(DEFAULT_QUEUE_CAPACITY > 0);
        assert!(DEFAULT_BUFFER_CAPACITY > 0);
        assert!(FASTQ_BYTES_PER_KMER > 0);
    }
}
