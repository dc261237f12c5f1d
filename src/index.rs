//! Index orchestrators: thin glue between sequence input, k-mer
//! generation, and the distributed maps.
//!
//! Three flavors, one per stored payload:
//!
//! - [`CountIndex`]: k-mer -> occurrence count (counting map)
//! - [`PositionIndex`]: k-mer -> (read id, offset), multi-valued
//! - [`PositionQualityIndex`]: k-mer -> ((read id, offset), aggregated
//!   Phred quality), multi-valued
//!
//! Building from a file reserves `estimated_kmers_in_file / P` local
//! slots before inserting, so the hash tables are sized from the first
//! available information about the input rather than grown by rehashing.

use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;

use crate::comm::transport::Transport;
use crate::config::{IndexConfig, StorageKind};
use crate::distmap::{CountingMap, DistMultiMap};
use crate::error::{LomviError, Result};
use crate::hashing::HashKind;
use crate::io::{estimate_kmers_in_file, read_partition, OwnedRead};
use crate::kmer::{KeyTransform, Kmer, KmerScan, KmerSpec};
use crate::quality::WindowQuality;
use crate::wire::Wire;

fn spec_for(config: &IndexConfig, expected: StorageKind) -> Result<KmerSpec> {
    if config.storage != expected {
        return Err(LomviError::validation(format!(
            "configured storage {:?} does not back a {:?} index",
            config.storage, expected
        )));
    }
    KmerSpec::new(config.k, config.alphabet)
}

/// Where a k-mer occurred: the read's global id and the offset of the
/// k-mer's first base within the read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    pub read_id: u64,
    pub offset: u32,
}

impl Wire for Position {
    const WIDTH: usize = 12;

    #[inline]
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.read_id.encode_into(out);
        self.offset.encode_into(out);
    }

    #[inline]
    fn decode(bytes: &[u8]) -> Self {
        Position {
            read_id: u64::decode(bytes),
            offset: u32::decode(&bytes[8..]),
        }
    }
}

/// A position plus the aggregated Phred quality of the k-mer's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PosQual {
    pub pos: Position,
    pub qual: u8,
}

impl Wire for PosQual {
    const WIDTH: usize = 13;

    #[inline]
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.pos.encode_into(out);
        self.qual.encode_into(out);
    }

    #[inline]
    fn decode(bytes: &[u8]) -> Self {
        PosQual {
            pos: Position::decode(bytes),
            qual: u8::decode(&bytes[12..]),
        }
    }
}

// ============================================================================
// CountIndex
// ============================================================================

/// K-mer occurrence counting over a distributed counting map.
pub struct CountIndex<C: Transport> {
    spec: KmerSpec,
    map: CountingMap<C>,
}

impl<C: Transport> CountIndex<C> {
    pub fn new(
        comm: Arc<C>,
        spec: KmerSpec,
        transform: KeyTransform,
        dist_hash: HashKind,
        local_hash: HashKind,
    ) -> Self {
        CountIndex {
            spec,
            map: CountingMap::new(comm, spec, transform, dist_hash, local_hash),
        }
    }

    /// Build from a parsed configuration; the storage kind must be
    /// `counting`.
    pub fn from_config(comm: Arc<C>, config: &IndexConfig) -> Result<Self> {
        let spec = spec_for(config, StorageKind::Counting)?;
        Ok(Self::new(
            comm,
            spec,
            config.key_transform,
            config.dist_hash,
            config.local_hash,
        ))
    }

    pub fn spec(&self) -> &KmerSpec {
        &self.spec
    }

    /// Extract this rank's k-mers from its slice of the file.
    pub fn read_file(&self, path: &Path) -> Result<Vec<Kmer>> {
        let reads = read_partition(path, self.map.core().rank(), self.map.core().ranks())?;
        let spec = self.spec;
        Ok(reads
            .par_iter()
            .map(|r| KmerScan::new(spec, &r.seq).map(|(_, k)| k).collect::<Vec<_>>())
            .flatten()
            .collect())
    }

    /// Read, reserve, and insert a file slice. Collective.
    pub fn build_file(&mut self, path: &Path) -> Result<()> {
        let estimate = estimate_kmers_in_file(path)? / self.map.core().ranks();
        let kmers = self.read_file(path)?;
        self.map.reserve(estimate)?;
        self.map.insert(kmers)
    }

    /// Reserve and insert an already-extracted k-mer batch. Collective.
    pub fn build(&mut self, kmers: Vec<Kmer>) -> Result<()> {
        self.map.reserve(kmers.len())?;
        self.map.insert(kmers)
    }

    pub fn find(&self, queries: Vec<Kmer>) -> Result<Vec<(Kmer, u64)>> {
        self.map.find(queries)
    }

    pub fn find_if<P: Fn(&Kmer, &u64) -> bool>(
        &self,
        queries: Vec<Kmer>,
        pred: P,
    ) -> Result<Vec<(Kmer, u64)>> {
        self.map.find_if(queries, pred)
    }

    pub fn count(&self, queries: Vec<Kmer>) -> Result<Vec<(Kmer, u64)>> {
        self.map.count(queries)
    }

    pub fn count_if<P: Fn(&Kmer, &u64) -> bool>(
        &self,
        queries: Vec<Kmer>,
        pred: P,
    ) -> Result<Vec<(Kmer, u64)>> {
        self.map.count_if(queries, pred)
    }

    pub fn erase(&mut self, keys: Vec<Kmer>) -> Result<usize> {
        self.map.erase(keys)
    }

    pub fn erase_if<P: Fn(&Kmer, &u64) -> bool>(
        &mut self,
        keys: Vec<Kmer>,
        pred: P,
    ) -> Result<usize> {
        self.map.erase_if(keys, pred)
    }

    pub fn keys(&self) -> Vec<Kmer> {
        self.map.keys()
    }

    pub fn local_size(&self) -> usize {
        self.map.local_size()
    }
}

// ============================================================================
// PositionIndex
// ============================================================================

/// K-mer -> occurrence positions over a distributed multimap.
pub struct PositionIndex<C: Transport> {
    spec: KmerSpec,
    map: DistMultiMap<Position, C>,
}

impl<C: Transport> PositionIndex<C> {
    pub fn new(
        comm: Arc<C>,
        spec: KmerSpec,
        transform: KeyTransform,
        dist_hash: HashKind,
        local_hash: HashKind,
    ) -> Self {
        PositionIndex {
            spec,
            map: DistMultiMap::new(comm, spec, transform, dist_hash, local_hash),
        }
    }

    /// Build from a parsed configuration; the storage kind must be
    /// `hash_multimap`.
    pub fn from_config(comm: Arc<C>, config: &IndexConfig) -> Result<Self> {
        let spec = spec_for(config, StorageKind::HashMultimap)?;
        Ok(Self::new(
            comm,
            spec,
            config.key_transform,
            config.dist_hash,
            config.local_hash,
        ))
    }

    pub fn spec(&self) -> &KmerSpec {
        &self.spec
    }

    /// Extract `(k-mer, position)` tuples from this rank's file slice.
    pub fn read_file(&self, path: &Path) -> Result<Vec<(Kmer, Position)>> {
        let reads = read_partition(path, self.map.core().rank(), self.map.core().ranks())?;
        let spec = self.spec;
        Ok(reads
            .par_iter()
            .map(|r| position_tuples(spec, r))
            .flatten()
            .collect())
    }

    /// Read, reserve, insert, and refresh the multiplicity estimate.
    /// Collective.
    pub fn build_file(&mut self, path: &Path) -> Result<()> {
        let estimate = estimate_kmers_in_file(path)? / self.map.core().ranks();
        let tuples = self.read_file(path)?;
        self.map.reserve(estimate)?;
        self.map.insert(tuples)?;
        self.map.update_multiplicity();
        Ok(())
    }

    /// Reserve and insert extracted tuples. Collective.
    pub fn build(&mut self, tuples: Vec<(Kmer, Position)>) -> Result<()> {
        self.map.reserve(tuples.len())?;
        self.map.insert(tuples)?;
        self.map.update_multiplicity();
        Ok(())
    }

    pub fn find(&self, queries: Vec<Kmer>) -> Result<Vec<(Kmer, Position)>> {
        self.map.find(queries)
    }

    pub fn find_if<P: Fn(&Kmer, &Position) -> bool>(
        &self,
        queries: Vec<Kmer>,
        pred: P,
    ) -> Result<Vec<(Kmer, Position)>> {
        self.map.find_if(queries, pred)
    }

    pub fn count(&self, queries: Vec<Kmer>) -> Result<Vec<(Kmer, u64)>> {
        self.map.count(queries)
    }

    pub fn count_if<P: Fn(&Kmer, &Position) -> bool>(
        &self,
        queries: Vec<Kmer>,
        pred: P,
    ) -> Result<Vec<(Kmer, u64)>> {
        self.map.count_if(queries, pred)
    }

    pub fn erase(&mut self, keys: Vec<Kmer>) -> Result<usize> {
        self.map.erase(keys)
    }

    pub fn erase_if<P: Fn(&Kmer, &Position) -> bool>(
        &mut self,
        keys: Vec<Kmer>,
        pred: P,
    ) -> Result<usize> {
        self.map.erase_if(keys, pred)
    }

    pub fn keys(&self) -> Vec<Kmer> {
        self.map.keys()
    }

    pub fn local_size(&self) -> usize {
        self.map.local_size()
    }
}

fn position_tuples(spec: KmerSpec, read: &OwnedRead) -> Vec<(Kmer, Position)> {
    KmerScan::new(spec, &read.seq)
        .map(|(offset, kmer)| {
            (
                kmer,
                Position {
                    read_id: read.id,
                    offset: offset as u32,
                },
            )
        })
        .collect()
}

// ============================================================================
// PositionQualityIndex
// ============================================================================

/// K-mer -> (position, window quality) over a distributed multimap.
pub struct PositionQualityIndex<C: Transport> {
    spec: KmerSpec,
    map: DistMultiMap<PosQual, C>,
}

impl<C: Transport> PositionQualityIndex<C> {
    pub fn new(
        comm: Arc<C>,
        spec: KmerSpec,
        transform: KeyTransform,
        dist_hash: HashKind,
        local_hash: HashKind,
    ) -> Self {
        PositionQualityIndex {
            spec,
            map: DistMultiMap::new(comm, spec, transform, dist_hash, local_hash),
        }
    }

    /// Build from a parsed configuration; the storage kind must be
    /// `hash_multimap`.
    pub fn from_config(comm: Arc<C>, config: &IndexConfig) -> Result<Self> {
        let spec = spec_for(config, StorageKind::HashMultimap)?;
        Ok(Self::new(
            comm,
            spec,
            config.key_transform,
            config.dist_hash,
            config.local_hash,
        ))
    }

    pub fn spec(&self) -> &KmerSpec {
        &self.spec
    }

    /// Extract `(k-mer, (position, quality))` tuples from this rank's
    /// file slice. Fails on records without quality lines.
    pub fn read_file(&self, path: &Path) -> Result<Vec<(Kmer, PosQual)>> {
        let reads = read_partition(path, self.map.core().rank(), self.map.core().ranks())?;
        let spec = self.spec;
        let nested: Vec<Vec<(Kmer, PosQual)>> = reads
            .par_iter()
            .map(|r| pos_qual_tuples(spec, r))
            .collect::<std::result::Result<_, _>>()?;
        Ok(nested.into_iter().flatten().collect())
    }

    /// Read, reserve, insert, and refresh the multiplicity estimate.
    /// Collective.
    pub fn build_file(&mut self, path: &Path) -> Result<()> {
        let estimate = estimate_kmers_in_file(path)? / self.map.core().ranks();
        let tuples = self.read_file(path)?;
        self.map.reserve(estimate)?;
        self.map.insert(tuples)?;
        self.map.update_multiplicity();
        Ok(())
    }

    /// Reserve and insert extracted tuples. Collective.
    pub fn build(&mut self, tuples: Vec<(Kmer, PosQual)>) -> Result<()> {
        self.map.reserve(tuples.len())?;
        self.map.insert(tuples)?;
        self.map.update_multiplicity();
        Ok(())
    }

    pub fn find(&self, queries: Vec<Kmer>) -> Result<Vec<(Kmer, PosQual)>> {
        self.map.find(queries)
    }

    pub fn find_if<P: Fn(&Kmer, &PosQual) -> bool>(
        &self,
        queries: Vec<Kmer>,
        pred: P,
    ) -> Result<Vec<(Kmer, PosQual)>> {
        self.map.find_if(queries, pred)
    }

    pub fn count(&self, queries: Vec<Kmer>) -> Result<Vec<(Kmer, u64)>> {
        self.map.count(queries)
    }

    pub fn count_if<P: Fn(&Kmer, &PosQual) -> bool>(
        &self,
        queries: Vec<Kmer>,
        pred: P,
    ) -> Result<Vec<(Kmer, u64)>> {
        self.map.count_if(queries, pred)
    }

    pub fn erase(&mut self, keys: Vec<Kmer>) -> Result<usize> {
        self.map.erase(keys)
    }

    pub fn erase_if<P: Fn(&Kmer, &PosQual) -> bool>(
        &mut self,
        keys: Vec<Kmer>,
        pred: P,
    ) -> Result<usize> {
        self.map.erase_if(keys, pred)
    }

    pub fn keys(&self) -> Vec<Kmer> {
        self.map.keys()
    }

    pub fn local_size(&self) -> usize {
        self.map.local_size()
    }
}

fn pos_qual_tuples(spec: KmerSpec, read: &OwnedRead) -> Result<Vec<(Kmer, PosQual)>> {
    let qual = read
        .qual
        .as_ref()
        .ok_or_else(|| LomviError::validation(format!("read {} has no quality line", read.id)))?;

    // one aggregated score per window start; k-mer offsets index into it
    let mut wq = WindowQuality::new(spec.k());
    let window_quals = wq.aggregate(qual);

    Ok(KmerScan::new(spec, &read.seq)
        .map(|(offset, kmer)| {
            let q = window_quals.get(offset).copied().unwrap_or(0);
            (
                kmer,
                PosQual {
                    pos: Position {
                        read_id: read.id,
                        offset: offset as u32,
                    },
                    qual: q,
                },
            )
        })
        .collect())
}
