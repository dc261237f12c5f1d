//! Reduction map: inserts merge into the stored value.

use std::sync::Arc;

use crate::comm::transport::Transport;
use crate::error::Result;
use crate::hashing::HashKind;
use crate::kmer::{Kmer, KeyTransform, KmerSpec};
use crate::wire::Wire;

use super::{DistMap, MapCore};

/// Distributed map whose insert applies a binary reduction between the
/// stored value (left argument) and the incoming value (right argument).
///
/// The reduction is *not* assumed associative; contributions are folded
/// in arrival order, per-rank order first (the batch's pre-reduction
/// preserves first-seen key order), then across ranks in source-rank
/// order per exchange. An absent key folds from `V::default()`.
pub struct ReductionMap<V, F, C: Transport>
where
    F: Fn(V, V) -> V,
{
    inner: DistMap<V, C>,
    reduce: F,
}

impl<V, F, C> ReductionMap<V, F, C>
where
    V: Wire + Default,
    F: Fn(V, V) -> V,
    C: Transport,
{
    pub fn new(
        comm: Arc<C>,
        spec: KmerSpec,
        transform: KeyTransform,
        dist_hash: HashKind,
        local_hash: HashKind,
        reduce: F,
    ) -> Self {
        ReductionMap {
            inner: DistMap::new(comm, spec, transform, dist_hash, local_hash),
            reduce,
        }
    }

    pub fn core(&self) -> &MapCore<C> {
        self.inner.core()
    }

    pub fn local_size(&self) -> usize {
        self.inner.local_size()
    }

    pub fn keys(&self) -> Vec<Kmer> {
        self.inner.keys()
    }

    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.inner.reserve(additional)
    }

    /// Batched insert-and-merge. The batch is pre-reduced locally (one
    /// pair per distinct key) before the exchange. Collective.
    pub fn insert(&mut self, batch: Vec<(Kmer, V)>) -> Result<()> {
        self.insert_filtered(batch, |_: &(Kmer, V)| true)
    }

    /// Insert-and-merge keeping only pairs the owner-side predicate
    /// accepts. The predicate sees the pre-reduced pair.
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
        let core = self.inner.core();
        core.canonicalize_pairs(&mut batch);
        let batch = core.reduce_pairs(batch, &self.reduce);
        let (owned, _) = core.distribute_pairs(batch)?;
        self.inner.fold_owned(owned, pred, &self.reduce);
        Ok(())
    }

    /// Insert pairs that are already reduced to one entry per key on
    /// this rank. Backs the counting map's key-vector insert.
    pub(crate) fn insert_reduced(&mut self, reduced: Vec<(Kmer, V)>) -> Result<()> {
        let (owned, _) = self.inner.core().distribute_pairs(reduced)?;
        self.inner
            .fold_owned(owned, |_: &(Kmer, V)| true, &self.reduce);
        Ok(())
    }

    pub fn find(&self, queries: Vec<Kmer>) -> Result<Vec<(Kmer, V)>> {
        self.inner.find(queries)
    }

    pub fn find_if<P>(&self, queries: Vec<Kmer>, pred: P) -> Result<Vec<(Kmer, V)>>
    where
        P: Fn(&Kmer, &V) -> bool,
    {
        self.inner.find_if(queries, pred)
    }

    pub fn count(&self, queries: Vec<Kmer>) -> Result<Vec<(Kmer, u64)>> {
        self.inner.count(queries)
    }

    pub fn count_if<P>(&self, queries: Vec<Kmer>, pred: P) -> Result<Vec<(Kmer, u64)>>
    where
        P: Fn(&Kmer, &V) -> bool,
    {
        self.inner.count_if(queries, pred)
    }

    pub fn erase(&mut self, keys: Vec<Kmer>) -> Result<usize> {
        self.inner.erase(keys)
    }

    pub fn erase_if<P>(&mut self, keys: Vec<Kmer>, pred: P) -> Result<usize>
    where
        P: Fn(&Kmer, &V) -> bool,
    {
        self.inner.erase_if(keys, pred)
    }
}
