//! Stable bucketing by destination rank and the record exchange built
//! on top of it.
//!
//! `bucket_by_rank` reorders a record vector so that all records for
//! rank 0 come first, then rank 1, and so on, preserving the original
//! relative order inside each run — the per-rank counts it returns feed
//! the all-to-all directly as send counts. Stability matters: it is what
//! makes application-visible insertion order well-defined after the
//! exchange.

use crate::comm::transport::Transport;
use crate::error::Result;
use crate::wire::{decode_vec, encode_slice, Wire};

/// Reorder `records` into contiguous per-rank runs.
///
/// Returns the reordered records and `counts[r]`, the length of the run
/// destined for rank `r`. Linear scan plus linear scatter; two records
/// with the same rank keep their relative order.
pub fn bucket_by_rank<T, F>(records: Vec<T>, ranks: usize, rank_of: F) -> (Vec<T>, Vec<usize>)
where
    F: Fn(&T) -> usize,
{
    let mut counts = vec![0usize; ranks];
    let assigned: Vec<usize> = records
        .iter()
        .map(|r| {
            let rank = rank_of(r);
            debug_assert!(rank < ranks);
            counts[rank] += 1;
            rank
        })
        .collect();

    // exclusive prefix sum gives each run's write cursor
    let mut cursors = vec![0usize; ranks];
    let mut offset = 0;
    for (rank, &count) in counts.iter().enumerate() {
        cursors[rank] = offset;
        offset += count;
    }

    let mut out: Vec<Option<T>> = records.into_iter().map(Some).collect();
    let mut scattered: Vec<Option<T>> = (0..out.len()).map(|_| None).collect();
    for (i, rank) in assigned.into_iter().enumerate() {
        scattered[cursors[rank]] = out[i].take();
        cursors[rank] += 1;
    }

    (
        scattered.into_iter().map(|r| r.unwrap()).collect(),
        counts,
    )
}

/// Bucket records by rank and run the all-to-all.
///
/// Returns every record this rank owns (grouped by source, sources in
/// rank order) and the per-source element counts.
pub fn exchange_by_rank<T, F, C>(
    comm: &C,
    records: Vec<T>,
    rank_of: F,
) -> Result<(Vec<T>, Vec<usize>)>
where
    T: Wire,
    F: Fn(&T) -> usize,
    C: Transport,
{
    let ranks = comm.size();
    let (bucketed, counts) = bucket_by_rank(records, ranks, rank_of);
    exchange_runs(comm, &bucketed, &counts)
}

/// Run the all-to-all over records already laid out in contiguous
/// per-rank runs of the given lengths.
pub fn exchange_runs<T, C>(
    comm: &C,
    bucketed: &[T],
    counts: &[usize],
) -> Result<(Vec<T>, Vec<usize>)>
where
    T: Wire,
    C: Transport,
{
    let mut parts = Vec::with_capacity(counts.len());
    let mut start = 0;
    for &count in counts {
        parts.push(encode_slice(&bucketed[start..start + count]));
        start += count;
    }

    let received = comm.alltoallv(parts)?;

    let mut records = Vec::new();
    let mut recv_counts = Vec::with_capacity(received.len());
    for bytes in &received {
        let decoded: Vec<T> = decode_vec(bytes)?;
        recv_counts.push(decoded.len());
        records.extend(decoded);
    }
    Ok((records, recv_counts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::transport::MemoryComm;
    use std::thread;

    #[test]
    fn test_bucket_counts_and_runs() {
        let records = vec![10u64, 21, 32, 43, 54, 65];
        let (bucketed, counts) = bucket_by_rank(records, 3, |r| (*r % 3) as usize);
        assert_eq!(counts, vec![2, 2, 2]);
        assert_eq!(bucketed, vec![21, 54, 10, 43, 32, 65]);
    }

    #[test]
    fn test_bucket_is_stable() {
        // records with equal rank keep their original order
        let records: Vec<u64> = (0..20).collect();
        let (bucketed, counts) = bucket_by_rank(records, 2, |r| (*r % 2) as usize);
        assert_eq!(counts, vec![10, 10]);
        let evens: Vec<u64> = bucketed[..10].to_vec();
        let odds: Vec<u64> = bucketed[10..].to_vec();
        assert!(evens.windows(2).all(|w| w[0] < w[1]));
        assert!(odds.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_bucket_empty_and_single_rank() {
        let (bucketed, counts) = bucket_by_rank(Vec::<u64>::new(), 4, |_| 0);
        assert!(bucketed.is_empty());
        assert_eq!(counts, vec![0, 0, 0, 0]);

        let (bucketed, counts) = bucket_by_rank(vec![1u64, 2, 3], 1, |_| 0);
        assert_eq!(bucketed, vec![1, 2, 3]);
        assert_eq!(counts, vec![3]);
    }

    #[test]
    fn test_exchange_routes_all_records_to_owner() {
        let comms = MemoryComm::universe(2).unwrap();
        let handles: Vec<_> = comms
            .into_iter()
            .map(|c| {
                thread::spawn(move || {
                    // both ranks hold the full range; owner = value % 2
                    let records: Vec<u64> = (0..10).collect();
                    let (mine, recv_counts) =
                        exchange_by_rank(&c, records, |r| (*r % 2) as usize).unwrap();
                    (c.rank(), mine, recv_counts)
                })
            })
            .collect();

        for h in handles {
            let (rank, mine, recv_counts) = h.join().unwrap();
            assert_eq!(mine.len(), 10);
            assert_eq!(recv_counts, vec![5, 5]);
            assert!(mine.iter().all(|v| (*v % 2) as usize == rank));
        }
    }
}
