//! Distributed associative maps over a hash-sharded keyspace.
//!
//! Four variants share the machinery in [`MapCore`]:
//!
//! - [`DistMap`]: single value per key, first insert wins
//! - [`DistMultiMap`]: every occurrence stored
//! - [`ReductionMap`]: inserts merge into the stored value via a binary
//!   reduction (left = stored, right = incoming; not assumed
//!   associative)
//! - [`CountingMap`]: reduction with `+` over key occurrence counts
//!
//! Keys are canonicalized by the configured [`KeyTransform`] at the API
//! boundary and stored canonically, so the transform contract — equal
//! transforms imply equal hashes — holds by construction. Ownership of a
//! canonical key is `prefix_hash(key) mod P`; batches are bucketed
//! (stable) by owner, exchanged all-to-all, and applied on the owner.
//! With a single rank the exchange steps drop out entirely.
//!
//! All batched operations are collective: every rank must call them in
//! the same order, even with an empty batch.

pub mod counting;
pub mod map;
pub mod multimap;
pub mod reduction;

pub use counting::CountingMap;
pub use map::DistMap;
pub use multimap::DistMultiMap;
pub use reduction::ReductionMap;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::bucket::exchange_by_rank;
use crate::comm::transport::Transport;
use crate::error::Result;
use crate::hashing::{HashKind, PrefixHash, SuffixBuild};
use crate::kmer::{Kmer, KeyTransform, KmerSpec};
use crate::wire::Wire;

/// Shared machinery: key canonicalization, the two hashes, and the
/// batch routing all variants use.
pub struct MapCore<C: Transport> {
    comm: Arc<C>,
    spec: KmerSpec,
    transform: KeyTransform,
    prefix: PrefixHash,
    local_build: SuffixBuild,
}

impl<C: Transport> MapCore<C> {
    pub fn new(
        comm: Arc<C>,
        spec: KmerSpec,
        transform: KeyTransform,
        dist_hash: HashKind,
        local_hash: HashKind,
    ) -> Self {
        let prefix = PrefixHash::new(dist_hash, comm.size());
        MapCore {
            comm,
            spec,
            transform,
            prefix,
            local_build: SuffixBuild::new(local_hash),
        }
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn ranks(&self) -> usize {
        self.comm.size()
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn spec(&self) -> &KmerSpec {
        &self.spec
    }

    /// The local-table hasher (low-bit hash).
    pub fn local_build(&self) -> SuffixBuild {
        self.local_build
    }

    /// Canonicalize one key.
    #[inline]
    pub fn trans(&self, key: Kmer) -> Kmer {
        self.transform.apply(key, &self.spec)
    }

    /// The rank owning a canonical key.
    #[inline]
    pub fn owner(&self, canonical: Kmer) -> usize {
        self.prefix.rank(canonical.0)
    }

    /// Canonicalize a key batch in place.
    pub fn canonicalize_keys(&self, keys: &mut [Kmer]) {
        for k in keys.iter_mut() {
            *k = self.trans(*k);
        }
    }

    /// Canonicalize the key of every pair in place.
    pub fn canonicalize_pairs<V>(&self, pairs: &mut [(Kmer, V)]) {
        for (k, _) in pairs.iter_mut() {
            *k = self.trans(*k);
        }
    }

    /// Drop duplicate (canonical) keys, keeping one occurrence of each.
    /// Hash-set based: sorting does not scale with the repeat count.
    pub fn retain_unique_keys(&self, keys: Vec<Kmer>) -> Vec<Kmer> {
        let mut seen: HashSet<Kmer, SuffixBuild> =
            HashSet::with_capacity_and_hasher(keys.len(), self.local_build);
        keys.into_iter().filter(|k| seen.insert(*k)).collect()
    }

    /// Drop duplicate-key pairs, keeping the first-seen value per key.
    pub fn retain_first_pairs<V>(&self, pairs: Vec<(Kmer, V)>) -> Vec<(Kmer, V)> {
        let mut seen: HashSet<Kmer, SuffixBuild> =
            HashSet::with_capacity_and_hasher(pairs.len(), self.local_build);
        pairs.into_iter().filter(|(k, _)| seen.insert(*k)).collect()
    }

    /// Merge duplicate-key pairs with the reduction, preserving the
    /// batch's first-seen key order in the output.
    pub fn reduce_pairs<V, F>(&self, pairs: Vec<(Kmer, V)>, reduce: &F) -> Vec<(Kmer, V)>
    where
        V: Copy,
        F: Fn(V, V) -> V,
    {
        let mut index: HashMap<Kmer, usize, SuffixBuild> =
            HashMap::with_capacity_and_hasher(pairs.len(), self.local_build);
        let mut out: Vec<(Kmer, V)> = Vec::with_capacity(pairs.len());
        for (k, v) in pairs {
            match index.get(&k) {
                Some(&i) => out[i].1 = reduce(out[i].1, v),
                None => {
                    index.insert(k, out.len());
                    out.push((k, v));
                }
            }
        }
        out
    }

    /// Route canonical keys to their owners. With one rank this is the
    /// identity; otherwise bucket + all-to-all. The returned counts are
    /// per-source run lengths.
    pub fn distribute_keys(&self, keys: Vec<Kmer>) -> Result<(Vec<Kmer>, Vec<usize>)> {
        if self.ranks() == 1 {
            let counts = vec![keys.len()];
            return Ok((keys, counts));
        }
        exchange_by_rank(self.comm.as_ref(), keys, |k| self.owner(*k))
    }

    /// Route canonical key-value pairs to their owners.
    pub fn distribute_pairs<V>(&self, pairs: Vec<(Kmer, V)>) -> Result<(Vec<(Kmer, V)>, Vec<usize>)>
    where
        V: Wire,
    {
        if self.ranks() == 1 {
            let counts = vec![pairs.len()];
            return Ok((pairs, counts));
        }
        exchange_by_rank(self.comm.as_ref(), pairs, |(k, _)| self.owner(*k))
    }

    /// Return per-source result runs to the ranks that asked for them.
    /// `send_counts[src]` must equal the run length produced for `src`.
    pub fn return_results<R>(&self, results: Vec<R>, send_counts: &[usize]) -> Result<Vec<R>>
    where
        R: Wire,
    {
        if self.ranks() == 1 {
            return Ok(results);
        }
        let (returned, _) =
            crate::bucket::exchange_runs(self.comm.as_ref(), &results, send_counts)?;
        Ok(returned)
    }

    /// Collective barrier; used by `reserve` so no rank runs ahead into
    /// a batch the others have not sized for.
    pub fn barrier(&self) -> Result<()> {
        if self.ranks() > 1 {
            self.comm.barrier()?;
        }
        Ok(())
    }
}

/// Key-multiplicity estimate for sizing multimap `find` results: the
/// published value is `ceil(size / distinct) + 1`, recomputed by a
/// distinct-key scan over the local container.
pub(crate) fn multiplicity_estimate(size: usize, distinct: usize) -> usize {
    if distinct == 0 {
        1
    } else {
        (size + distinct - 1) / distinct + 1
    }
}
