//! Multi-value distributed map: every inserted occurrence is stored.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::comm::transport::Transport;
use crate::error::Result;
use crate::hashing::{HashKind, SuffixBuild};
use crate::kmer::{Kmer, KeyTransform, KmerSpec};
use crate::wire::Wire;

use super::{multiplicity_estimate, MapCore};

/// Distributed multimap. `find` returns the full bag for each queried
/// key; `count` returns the bag size.
///
/// The cached key-multiplicity estimate sizes `find`'s result
/// reservation; it is recomputed on demand by a distinct-key scan of
/// the local container.
pub struct DistMultiMap<V, C: Transport> {
    core: MapCore<C>,
    table: HashMap<Kmer, Vec<V>, SuffixBuild>,
    /// Total stored pairs (sum of bag sizes).
    pairs: usize,
    key_multiplicity: usize,
}

impl<V, C> DistMultiMap<V, C>
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
        DistMultiMap {
            core,
            table,
            pairs: 0,
            key_multiplicity: 1,
        }
    }

    pub fn core(&self) -> &MapCore<C> {
        &self.core
    }

    /// Number of stored pairs on this rank (not distinct keys).
    pub fn local_size(&self) -> usize {
        self.pairs
    }

    /// Local distinct keys (canonical form).
    pub fn keys(&self) -> Vec<Kmer> {
        self.table.keys().copied().collect()
    }

    /// The cached average bag size estimate.
    pub fn key_multiplicity(&self) -> usize {
        self.key_multiplicity
    }

    /// Recompute the key-multiplicity estimate by scanning the local
    /// container for distinct keys. Returns the refreshed value.
    pub fn update_multiplicity(&mut self) -> usize {
        let distinct = self.table.len();
        self.key_multiplicity = multiplicity_estimate(self.pairs, distinct);
        debug!(
            "rank {}: {} pairs over {} distinct keys, multiplicity {}",
            self.core.rank(),
            self.pairs,
            distinct,
            self.key_multiplicity
        );
        self.key_multiplicity
    }

    /// Reserve local capacity (in distinct keys), then synchronize.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.table.reserve(additional);
        self.core.barrier()
    }

    /// Batched insert; every occurrence is kept. Collective.
    pub fn insert(&mut self, batch: Vec<(Kmer, V)>) -> Result<()> {
        self.insert_filtered(batch, |_: &(Kmer, V)| true)
    }

    /// Insert keeping only pairs the owner-side predicate accepts.
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
        // no dedupe: the multimap keeps duplicates by definition
        let (owned, _) = self.core.distribute_pairs(batch)?;
        for (k, v) in owned {
            if pred(&(k, v)) {
                self.table.entry(k).or_default().push(v);
                self.pairs += 1;
            }
        }
        Ok(())
    }

    /// Batched lookup returning one `(key, value)` pair per stored
    /// occurrence of each distinct queried key. Collective.
    pub fn find(&self, queries: Vec<Kmer>) -> Result<Vec<(Kmer, V)>> {
        self.find_filtered(queries, |_: &Kmer, _: &V| true)
    }

    /// `find` restricted to stored occurrences the predicate accepts;
    /// evaluated on the owner, per occurrence.
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

        // the multiplicity estimate sizes the result buffer: one bag of
        // roughly `key_multiplicity` values per queried key
        let mut results = Vec::with_capacity(owned.len() * self.key_multiplicity);
        let mut send_counts = vec![0usize; recv_counts.len()];
        let mut start = 0;
        for (src, &count) in recv_counts.iter().enumerate() {
            let before = results.len();
            for k in &owned[start..start + count] {
                if let Some(bag) = self.table.get(k) {
                    for v in bag {
                        if pred(k, v) {
                            results.push((*k, *v));
                        }
                    }
                }
            }
            send_counts[src] = results.len() - before;
            start += count;
        }

        self.core.return_results(results, &send_counts)
    }

    /// Batched occurrence count: `(key, bag size)` for every distinct
    /// queried key, zero included. Collective.
    pub fn count(&self, queries: Vec<Kmer>) -> Result<Vec<(Kmer, u64)>> {
        self.count_filtered(queries, |_: &Kmer, _: &V| true)
    }

    /// `count` restricted to stored occurrences the predicate accepts.
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
                Some(bag) => bag.iter().filter(|v| pred(k, v)).count() as u64,
                None => 0,
            };
            results.push((*k, n));
        }
        self.core.return_results(results, &recv_counts)
    }

    /// Batched erase of whole bags. Returns the number of pairs removed
    /// from this rank's container. Collective.
    pub fn erase(&mut self, mut keys: Vec<Kmer>) -> Result<usize> {
        self.core.canonicalize_keys(&mut keys);
        let keys = self.core.retain_unique_keys(keys);
        let (owned, _) = self.core.distribute_keys(keys)?;

        let mut removed = 0;
        for k in &owned {
            if let Some(bag) = self.table.remove(k) {
                removed += bag.len();
            }
        }
        self.pairs -= removed;
        Ok(removed)
    }

    /// Erase only the stored occurrences the predicate accepts; a bag
    /// emptied this way is dropped entirely. Returns pairs removed.
    pub fn erase_if<P>(&mut self, mut keys: Vec<Kmer>, pred: P) -> Result<usize>
    where
        P: Fn(&Kmer, &V) -> bool,
    {
        self.core.canonicalize_keys(&mut keys);
        let keys = self.core.retain_unique_keys(keys);
        let (owned, _) = self.core.distribute_keys(keys)?;

        let mut removed = 0;
        for k in &owned {
            if let Some(bag) = self.table.get_mut(k) {
                let before = bag.len();
                bag.retain(|v| !pred(k, v));
                removed += before - bag.len();
                if bag.is_empty() {
                    self.table.remove(k);
                }
            }
        }
        self.pairs -= removed;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::Alphabet;
    use crate::comm::transport::MemoryComm;

    fn single_rank_map() -> DistMultiMap<u64, MemoryComm> {
        let comm = MemoryComm::universe(1).unwrap().into_iter().next().unwrap();
        DistMultiMap::new(
            Arc::new(comm),
            KmerSpec::new(3, Alphabet::Dna2).unwrap(),
            KeyTransform::Identity,
            HashKind::Murmur,
            HashKind::Std,
        )
    }

    #[test]
    fn test_every_occurrence_stored() {
        let mut m = single_rank_map();
        m.insert(vec![(Kmer(1), 10), (Kmer(1), 20), (Kmer(2), 30)])
            .unwrap();
        assert_eq!(m.local_size(), 3);

        let mut found = m.find(vec![Kmer(1)]).unwrap();
        found.sort();
        assert_eq!(found, vec![(Kmer(1), 10), (Kmer(1), 20)]);
    }

    #[test]
    fn test_count_is_bag_size() {
        let mut m = single_rank_map();
        m.insert(vec![(Kmer(1), 10), (Kmer(1), 20)]).unwrap();
        let mut counts = m.count(vec![Kmer(1), Kmer(5)]).unwrap();
        counts.sort();
        assert_eq!(counts, vec![(Kmer(1), 2), (Kmer(5), 0)]);
    }

    #[test]
    fn test_count_matches_find_length() {
        let mut m = single_rank_map();
        m.insert(vec![
            (Kmer(1), 1),
            (Kmer(1), 2),
            (Kmer(2), 3),
            (Kmer(3), 4),
        ])
        .unwrap();
        let queries = vec![Kmer(1), Kmer(2), Kmer(3), Kmer(4)];
        let total: u64 = m.count(queries.clone()).unwrap().iter().map(|(_, n)| n).sum();
        assert_eq!(total as usize, m.find(queries).unwrap().len());
    }

    #[test]
    fn test_erase_removes_whole_bag() {
        let mut m = single_rank_map();
        m.insert(vec![(Kmer(1), 10), (Kmer(1), 20), (Kmer(2), 30)])
            .unwrap();
        assert_eq!(m.erase(vec![Kmer(1)]).unwrap(), 2);
        assert_eq!(m.local_size(), 1);
        assert!(m.find(vec![Kmer(1)]).unwrap().is_empty());
    }

    #[test]
    fn test_erase_if_prunes_occurrences() {
        let mut m = single_rank_map();
        m.insert(vec![(Kmer(1), 10), (Kmer(1), 20), (Kmer(1), 30)])
            .unwrap();
        let removed = m.erase_if(vec![Kmer(1)], |_, v| *v >= 20).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(m.find(vec![Kmer(1)]).unwrap(), vec![(Kmer(1), 10)]);
    }

    #[test]
    fn test_multiplicity_updates() {
        let mut m = single_rank_map();
        m.insert(vec![(Kmer(1), 1), (Kmer(1), 2), (Kmer(1), 3), (Kmer(2), 4)])
            .unwrap();
        // 4 pairs over 2 distinct keys: ceil(4/2) + 1 = 3
        assert_eq!(m.update_multiplicity(), 3);
    }

    #[test]
    fn test_find_if_filters_occurrences() {
        let mut m = single_rank_map();
        m.insert(vec![(Kmer(1), 10), (Kmer(1), 25)]).unwrap();
        let found = m.find_if(vec![Kmer(1)], |_, v| *v > 15).unwrap();
        assert_eq!(found, vec![(Kmer(1), 25)]);
    }
}
