//! End-to-end index scenarios over single- and multi-rank universes.

use std::sync::Arc;
use std::thread;

use anyhow::Result;

use lomvi::alphabet::Alphabet;
use lomvi::comm::MemoryComm;
use lomvi::Transport;
use lomvi::hashing::HashKind;
use lomvi::index::{CountIndex, Position, PositionIndex};
use lomvi::kmer::{KeyTransform, Kmer, KmerScan, KmerSpec};
use lomvi::{CountingMap, ReductionMap};

fn spec3() -> KmerSpec {
    KmerSpec::new(3, Alphabet::Dna2).unwrap()
}

fn kmers_of(spec: KmerSpec, reads: &[&[u8]]) -> Vec<Kmer> {
    reads
        .iter()
        .flat_map(|seq| KmerScan::new(spec, seq).map(|(_, k)| k))
        .collect()
}

/// Single-rank counting: reads AAAAA and AAAT yield AAA x3, AAT x1.
#[test]
fn test_single_process_count() -> Result<()> {
    let spec = spec3();
    let comm = MemoryComm::universe(1)?.into_iter().next().unwrap();
    let mut index = CountIndex::new(
        Arc::new(comm),
        spec,
        KeyTransform::Identity,
        HashKind::Murmur,
        HashKind::Std,
    );

    index.build(kmers_of(spec, &[b"AAAAA", b"AAAT"]))?;

    let aaa = spec.pack(b"AAA").unwrap();
    let aat = spec.pack(b"AAT").unwrap();
    let ttt = spec.pack(b"TTT").unwrap();

    assert_eq!(index.local_size(), 2);

    let mut found = index.find(vec![aaa, aat, ttt])?;
    found.sort();
    let mut expected = vec![(aaa, 3), (aat, 1)];
    expected.sort();
    assert_eq!(found, expected);

    let mut counts = index.count(vec![aaa, ttt])?;
    counts.sort();
    let mut expected = vec![(aaa, 3), (ttt, 0)];
    expected.sort();
    assert_eq!(counts, expected);
    Ok(())
}

/// Two ranks: the identity-free prefix hash places AAA on rank 0 and
/// AAT on rank 1, so with both ranks holding the same reads, rank 0
/// ends up with AAA at count 6 and rank 1 with AAT at count 2.
#[test]
fn test_two_process_hashing_split() -> Result<()> {
    let spec = spec3();
    let aaa = spec.pack(b"AAA").unwrap();
    let aat = spec.pack(b"AAT").unwrap();

    // the Std mix sends word 0 (AAA) to rank 0 and word 3 (AAT) to rank 1
    let handles: Vec<_> = MemoryComm::universe(2)?
        .into_iter()
        .map(|comm| {
            thread::spawn(move || -> Result<(usize, Vec<Kmer>, Vec<(Kmer, u64)>)> {
                let rank = comm.rank();
                let mut index = CountIndex::new(
                    Arc::new(comm),
                    spec,
                    KeyTransform::Identity,
                    HashKind::Std,
                    HashKind::Std,
                );
                index.build(kmers_of(spec, &[b"AAAAA", b"AAAT"]))?;

                let mut local_keys = index.keys();
                local_keys.sort();
                let mut counts = index.count(vec![aaa, aat])?;
                counts.sort();
                Ok((rank, local_keys, counts))
            })
        })
        .collect();

    for handle in handles {
        let (rank, local_keys, counts) = handle.join().unwrap()?;
        if rank == 0 {
            assert_eq!(local_keys, vec![aaa]);
        } else {
            assert_eq!(local_keys, vec![aat]);
        }
        // the global view is identical from both ranks
        let mut expected = vec![(aaa, 6), (aat, 2)];
        expected.sort();
        assert_eq!(counts, expected);
    }
    Ok(())
}

/// Multimap position index: read AAAA with id 7 stores AAA at offsets
/// 0 and 1.
#[test]
fn test_multimap_position() -> Result<()> {
    let spec = spec3();
    let comm = MemoryComm::universe(1)?.into_iter().next().unwrap();
    let mut index = PositionIndex::new(
        Arc::new(comm),
        spec,
        KeyTransform::Identity,
        HashKind::Murmur,
        HashKind::Std,
    );

    let aaa = spec.pack(b"AAA").unwrap();
    let tuples: Vec<(Kmer, Position)> = KmerScan::new(spec, b"AAAA")
        .map(|(offset, k)| {
            (
                k,
                Position {
                    read_id: 7,
                    offset: offset as u32,
                },
            )
        })
        .collect();
    index.build(tuples)?;

    let mut found = index.find(vec![aaa])?;
    found.sort();
    assert_eq!(
        found,
        vec![
            (
                aaa,
                Position {
                    read_id: 7,
                    offset: 0
                }
            ),
            (
                aaa,
                Position {
                    read_id: 7,
                    offset: 1
                }
            ),
        ]
    );
    assert_eq!(index.count(vec![aaa])?, vec![(aaa, 2)]);
    Ok(())
}

/// The reduction is applied as stored-left / incoming-right, folded
/// from the zero default: with r(a, b) = 2a + b over inserts 1, 2, 3,
/// the stored value is r(r(r(0,1),2),3) = 11.
#[test]
fn test_reduction_order_sensitivity() -> Result<()> {
    let spec = spec3();
    let comm = MemoryComm::universe(1)?.into_iter().next().unwrap();
    let mut map = ReductionMap::new(
        Arc::new(comm),
        spec,
        KeyTransform::Identity,
        HashKind::Murmur,
        HashKind::Std,
        |a: u64, b: u64| 2 * a + b,
    );

    let k = spec.pack(b"ACG").unwrap();
    map.insert(vec![(k, 1)])?;
    map.insert(vec![(k, 2)])?;
    map.insert(vec![(k, 3)])?;

    assert_eq!(map.find(vec![k])?, vec![(k, 11)]);
    Ok(())
}

/// erase_if with a tally predicate: {A:1, B:2, C:3} minus counts > 1
/// leaves {A:1}.
#[test]
fn test_erase_if_on_counting_map() -> Result<()> {
    let spec = spec3();
    let comm = MemoryComm::universe(1)?.into_iter().next().unwrap();
    let mut map = CountingMap::new(
        Arc::new(comm),
        spec,
        KeyTransform::Identity,
        HashKind::Murmur,
        HashKind::Std,
    );

    let a = spec.pack(b"AAA").unwrap();
    let b = spec.pack(b"CCC").unwrap();
    let c = spec.pack(b"GGG").unwrap();
    let mut batch = vec![a];
    batch.extend([b; 2]);
    batch.extend([c; 3]);
    map.insert(batch)?;

    let removed = map.erase_if(map.keys(), |_, n| *n > 1)?;
    assert_eq!(removed, 2);
    assert_eq!(map.local_size(), 1);
    assert_eq!(map.find(vec![a, b, c])?, vec![(a, 1)]);
    Ok(())
}

/// Canonical transform: reads from opposite strands land on one key.
#[test]
fn test_canonical_transform_merges_strands() -> Result<()> {
    let spec = spec3();
    let comm = MemoryComm::universe(1)?.into_iter().next().unwrap();
    let mut index = CountIndex::new(
        Arc::new(comm),
        spec,
        KeyTransform::LexCanonical,
        HashKind::Murmur,
        HashKind::Std,
    );

    // ACG and its reverse complement CGT count together
    index.build(kmers_of(spec, &[b"ACG", b"CGT"]))?;
    assert_eq!(index.local_size(), 1);

    let canonical = spec.pack(b"ACG").unwrap();
    let found = index.find(vec![spec.pack(b"CGT").unwrap()])?;
    assert_eq!(found, vec![(canonical, 2)]);
    Ok(())
}

/// Four ranks build from the same synthetic reads; the distributed
/// tallies match a sequential reference count.
#[test]
fn test_four_rank_totals_match_reference() -> Result<()> {
    let spec = KmerSpec::new(5, Alphabet::Dna2).unwrap();
    let reads: Vec<Vec<u8>> = (0..16)
        .map(|i| {
            (0..40)
                .map(|j| match (i * 7 + j * 3) % 4 {
                    0 => b'A',
                    1 => b'C',
                    2 => b'G',
                    _ => b'T',
                })
                .collect()
        })
        .collect();

    // sequential reference over every read
    let mut reference: std::collections::HashMap<Kmer, u64> = std::collections::HashMap::new();
    for read in &reads {
        for (_, k) in KmerScan::new(spec, read) {
            *reference.entry(k).or_insert(0) += 1;
        }
    }

    let handles: Vec<_> = MemoryComm::universe(4)?
        .into_iter()
        .map(|comm| {
            let reads = reads.clone();
            thread::spawn(move || -> Result<Vec<(Kmer, u64)>> {
                let rank = comm.rank();
                let mut index = CountIndex::new(
                    Arc::new(comm),
                    spec,
                    KeyTransform::Identity,
                    HashKind::Murmur,
                    HashKind::Std,
                );
                // each rank contributes a disjoint slice of the reads
                let mine: Vec<Kmer> = reads
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| i % 4 == rank)
                    .flat_map(|(_, r)| KmerScan::new(spec, r).map(|(_, k)| k))
                    .collect();
                index.build(mine)?;

                let queries: Vec<Kmer> = (0..1u64 << 10).map(Kmer).collect();
                let mut found = index.find(queries)?;
                found.sort();
                Ok(found)
            })
        })
        .collect();

    let mut expected: Vec<(Kmer, u64)> = reference.into_iter().collect();
    expected.sort();
    for handle in handles {
        assert_eq!(handle.join().unwrap()?, expected);
    }
    Ok(())
}
