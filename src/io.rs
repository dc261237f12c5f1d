//! Sequence input: rank-local file slices and reservation estimates.
//!
//! Each rank of the communicator reads the same FASTQ/FASTA file but
//! keeps only its own slice of the records (round-robin by record
//! index, so slices are disjoint and together cover the file). Parsing
//! goes through needletail, which transparently handles gzip input.

use needletail::parse_fastx_file;
use std::path::Path;

use crate::constants::FASTQ_BYTES_PER_KMER;
use crate::error::{LomviError, Result};

/// One read owned by this rank.
///
/// `id` is the record's global index in the file, which makes position
/// values comparable across ranks without coordination.
#[derive(Debug, Clone)]
pub struct OwnedRead {
    pub id: u64,
    pub seq: Vec<u8>,
    pub qual: Option<Vec<u8>>,
}

/// Read this rank's slice of a sequence file: records whose index is
/// congruent to `rank` modulo `ranks`.
pub fn read_partition(path: &Path, rank: usize, ranks: usize) -> Result<Vec<OwnedRead>> {
    if ranks == 0 || rank >= ranks {
        return Err(LomviError::validation(format!(
            "invalid partition: rank {} of {}",
            rank, ranks
        )));
    }

    let mut reader = parse_fastx_file(path).map_err(|e| {
        LomviError::io(
            path,
            "open",
            std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        )
    })?;

    let mut reads = Vec::new();
    let mut index: u64 = 0;
    while let Some(record) = reader.next() {
        let record = record.map_err(|e| {
            LomviError::io(
                path,
                "parse",
                std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
            )
        })?;
        if index as usize % ranks == rank {
            reads.push(OwnedRead {
                id: index,
                seq: record.seq().into_owned(),
                qual: record.qual().map(|q| q.to_vec()),
            });
        }
        index += 1;
    }
    Ok(reads)
}

/// Estimate the number of k-mers a sequence file will yield, from its
/// byte size alone. Used to size the index reservation before any
/// records have been scanned; deliberately coarse.
pub fn estimate_kmers_in_file(path: &Path) -> Result<usize> {
    let metadata = std::fs::metadata(path).map_err(|e| LomviError::io(path, "stat", e))?;
    Ok(metadata.len() as usize / FASTQ_BYTES_PER_KMER)
}
