//! Single-value distributed map: first insert per key wins.

use std::collections::HashMap;
use std::sync::Arc;

use crate::comm::transport::Transport;
use crate::error::Result;
use crate::hashing::{HashKind, SuffixBuild};
use crate::kmer::{Kmer, KeyTransform, KmerSpec};
use crate::wire::Wire;

use super::MapCore;

/// Distributed map with one stored value per key.
///
/// Duplicate keys inside one `insert` batch are deduplicated before
/// transmission (first-seen value kept); later batches never overwrite
/// an existing key.
pub struct DistMap<V, C: Transport> {
    core: MapCore<C>,
    table: HashMap<Kmer, V, SuffixBuild>,
}

impl<V, C> DistMap<V, C>
where
    V: Wire,
    C: Transport,
{
    pub fn new(
        comm: Arc<C>,
        spec: KmerSpec,
        transform: KeyTransform,
        dist_hash: HashKind,
        local_hash: HashKind,
    ) -> Self {
        let core = MapCore::new(comm, spec, transform, dist_hash, local_hash);
        let table = HashMap::with_hasher(core.local_build());
        DistMap { core, table }
    }

    pub fn core(&self) -> &MapCore<C> {
        &self.core
    }

    /// Number of key-value pairs stored locally.
    pub fn local_size(&self) -> usize {
        self.table.len()
    }

    /// Local distinct keys (canonical form).
    pub fn keys(&self) -> Vec<Kmer> {
        self.table.keys().copied().collect()
    }

    /// Reserve local capacity, then synchronize so no rank starts the
    /// next batch early.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.table.reserve(additional);
        self.core.barrier()
    }

    /// Batched insert. Collective.
    pub fn insert(&mut self, batch: Vec<(Kmer, V)>) -> Result<()> {
        self.insert_filtered(batch, |_: &(Kmer, V)| true)
    }

    /// Batched insert keeping only pairs the owner-side predicate
    /// accepts. Collective.
    pub fn insert_if<P>(&mut self, batch: Vec<(Kmer, V)>, pred: P) -> Result<()>
    where
        P: Fn(&(Kmer, V)) -> bool,
    {
        self.insert_filtered(batch, pred)
    }

    fn insert_filtered<P>(&mut self, mut batch: Vec<(Kmer, V)>, pred: P) -> Result<()>
    where
        P: Fn(&(Kmer, V)) -> bool,
    {
        self.core.canonicalize_pairs(&mut batch);
        let batch = self.core.retain_first_pairs(batch);
        let (owned, _) = self.core.distribute_pairs(batch)?;
        for (k, v) in owned {
            if pred(&(k, v)) {
                self.table.entry(k).or_insert(v);
            }
        }
        Ok(())
    }

    /// Fold owner-routed pairs into the table with a binary reduction:
    /// an absent key reduces from `V::default()`, so the stored value is
    /// the left fold over every contribution in arrival order. Backs the
    /// reduction and counting variants.
    pub(crate) fn fold_owned<P, F>(&mut self, owned: Vec<(Kmer, V)>, pred: P, reduce: &F)
    where
        V: Default,
        P: Fn(&(Kmer, V)) -> bool,
        F: Fn(V, V) -> V,
    {
        for (k, v) in owned {
            if pred(&(k, v)) {
                let slot = self.table.entry(k).or_default();
                *slot = reduce(*slot, v);
            }
        }
    }

    /// Batched lookup: one `(key, value)` pair per distinct queried key
    /// present in the map. Collective.
    pub fn find(&self, queries: Vec<Kmer>) -> Result<Vec<(Kmer, V)>> {
        self.find_filtered(queries, |_: &Kmer, _: &V| true)
    }

    /// `find` restricted to stored entries the predicate accepts;
    /// evaluated on the owner. Collective.
    pub fn find_if<P>(&self, queries: Vec<Kmer>, pred: P) -> Result<Vec<(Kmer, V)>>
    where
        P: Fn(&Kmer, &V) -> bool,
    {
        self.find_filtered(queries, pred)
    }

    fn find_filtered<P>(&self, mut queries: Vec<Kmer>, pred: P) -> Result<Vec<(Kmer, V)>>
    where
        P: Fn(&Kmer, &V) -> bool,
    {
        self.core.canonicalize_keys(&mut queries);
        let queries = self.core.retain_unique_keys(queries);
        let (owned, recv_counts) = self.core.distribute_keys(queries)?;

        let mut results = Vec::with_capacity(owned.len());
        let mut send_counts = vec![0usize; recv_counts.len()];
        let mut start = 0;
        for (src, &count) in recv_counts.iter().enumerate() {
            let before = results.len();
            for k in &owned[start..start + count] {
                if let Some(v) = self.table.get(k) {
                    if pred(k, v) {
                        results.push((*k, *v));
                    }
                }
            }
            send_counts[src] = results.len() - before;
            start += count;
        }

        self.core.return_results(results, &send_counts)
    }

    /// Batched occurrence count: `(key, n)` with `n ∈ {0, 1}` for every
    /// distinct queried key. Collective.
    pub fn count(&self, queries: Vec<Kmer>) -> Result<Vec<(Kmer, u64)>> {
        self.count_filtered(queries, |_: &Kmer, _: &V| true)
    }

    /// `count` with an owner-side predicate over stored entries.
    pub fn count_if<P>(&self, queries: Vec<Kmer>, pred: P) -> Result<Vec<(Kmer, u64)>>
    where
        P: Fn(&Kmer, &V) -> bool,
    {
        self.count_filtered(queries, pred)
    }

    fn count_filtered<P>(&self, mut queries: Vec<Kmer>, pred: P) -> Result<Vec<(Kmer, u64)>>
    where
        P: Fn(&Kmer, &V) -> bool,
    {
        self.core.canonicalize_keys(&mut queries);
        let queries = self.core.retain_unique_keys(queries);
        let (owned, recv_counts) = self.core.distribute_keys(queries)?;

        let mut results = Vec::with_capacity(owned.len());
        for k in &owned {
            let n = match self.table.get(k) {
                Some(v) if pred(k, v) => 1,
                _ => 0,
            };
            results.push((*k, n));
        }
        // one result per query key, so the request counts serve as the
        // response counts unchanged
        self.core.return_results(results, &recv_counts)
    }

    /// Batched erase. Returns the number of pairs removed from this
    /// rank's container. Collective.
    pub fn erase(&mut self, keys: Vec<Kmer>) -> Result<usize> {
        self.erase_filtered(keys, |_: &Kmer, _: &V| true)
    }

    /// `erase` restricted to stored entries the predicate accepts.
    pub fn erase_if<P>(&mut self, keys: Vec<Kmer>, pred: P) -> Result<usize>
    where
        P: Fn(&Kmer, &V) -> bool,
    {
        self.erase_filtered(keys, pred)
    }

    fn erase_filtered<P>(&mut self, mut keys: Vec<Kmer>, pred: P) -> Result<usize>
    where
        P: Fn(&Kmer, &V) -> bool,
    {
        self.core.canonicalize_keys(&mut keys);
        let keys = self.core.retain_unique_keys(keys);
        let (owned, _) = self.core.distribute_keys(keys)?;

        let before = self.table.len();
        for k in &owned {
            let matches = self.table.get(k).map(|v| pred(k, v)).unwrap_or(false);
            if matches {
                self.table.remove(k);
            }
        }
        Ok(before - self.table.len())
    }
}
