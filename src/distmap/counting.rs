//! Counting map: reduction with `+` over key occurrence counts.

use std::collections::HashMap;
use std::sync::Arc;

use crate::comm::transport::Transport;
use crate::error::Result;
use crate::hashing::{HashKind, SuffixBuild};
use crate::kmer::{Kmer, KeyTransform, KmerSpec};

use super::{MapCore, ReductionMap};

fn add(a: u64, b: u64) -> u64 {
    a + b
}

/// Distributed occurrence counter.
///
/// `insert` accepts a plain key vector and reduces it locally to
/// `(key, count)` pairs before the exchange, so the bytes on the wire
/// scale with the number of distinct keys rather than the number of
/// occurrences. `count` reports the stored tally (zero for absent
/// keys), matching the occurrences the counter represents.
pub struct CountingMap<C: Transport> {
    inner: ReductionMap<u64, fn(u64, u64) -> u64, C>,
}

impl<C: Transport> CountingMap<C> {
    pub fn new(
        comm: Arc<C>,
        spec: KmerSpec,
        transform: KeyTransform,
        dist_hash: HashKind,
        local_hash: HashKind,
    ) -> Self {
        CountingMap {
            inner: ReductionMap::new(comm, spec, transform, dist_hash, local_hash, add),
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

    /// Count a batch of key occurrences. Collective.
    pub fn insert(&mut self, mut keys: Vec<Kmer>) -> Result<()> {
        let core = self.inner.core();
        core.canonicalize_keys(&mut keys);

        // local reduction: occurrences collapse to (key, count) pairs
        let mut tally: HashMap<Kmer, u64, SuffixBuild> =
            HashMap::with_capacity_and_hasher(keys.len(), core.local_build());
        for k in keys {
            *tally.entry(k).or_insert(0) += 1;
        }
        let reduced: Vec<(Kmer, u64)> = tally.into_iter().collect();
        self.inner.insert_reduced(reduced)
    }

    /// Count occurrences, keeping only `(key, batch count)` pairs the
    /// owner-side predicate accepts.
    pub fn insert_if<P>(&mut self, keys: Vec<Kmer>, pred: P) -> Result<()>
    where
        P: Fn(&(Kmer, u64)) -> bool,
    {
        // tally raw keys; the inner insert canonicalizes exactly once
        // and its pre-reduction merges tallies that share a canon key
        let mut tally: HashMap<Kmer, u64, SuffixBuild> =
            HashMap::with_capacity_and_hasher(keys.len(), self.inner.core().local_build());
        for k in keys {
            *tally.entry(k).or_insert(0) += 1;
        }
        let reduced: Vec<(Kmer, u64)> = tally.into_iter().collect();
        self.inner.insert_if(reduced, pred)
    }

    /// Batched lookup of stored tallies (absent keys omitted).
    pub fn find(&self, queries: Vec<Kmer>) -> Result<Vec<(Kmer, u64)>> {
        self.inner.find(queries)
    }

    pub fn find_if<P>(&self, queries: Vec<Kmer>, pred: P) -> Result<Vec<(Kmer, u64)>>
    where
        P: Fn(&Kmer, &u64) -> bool,
    {
        self.inner.find_if(queries, pred)
    }

    /// Batched tally query: `(key, stored count)` for every distinct
    /// queried key, zero for absent keys. Collective.
    pub fn count(&self, queries: Vec<Kmer>) -> Result<Vec<(Kmer, u64)>> {
        self.count_if(queries, |_, _| true)
    }

    /// `count` with an owner-side predicate over stored tallies.
    pub fn count_if<P>(&self, queries: Vec<Kmer>, pred: P) -> Result<Vec<(Kmer, u64)>>
    where
        P: Fn(&Kmer, &u64) -> bool,
    {
        // a found tally reports its stored value; everything else is 0
        let found = self.inner.find_if(queries.clone(), pred)?;
        let mut by_key: HashMap<Kmer, u64, SuffixBuild> =
            HashMap::with_capacity_and_hasher(found.len(), self.inner.core().local_build());
        for (k, n) in found {
            by_key.insert(k, n);
        }

        let core = self.inner.core();
        let mut canonical = queries;
        core.canonicalize_keys(&mut canonical);
        let distinct = core.retain_unique_keys(canonical);
        Ok(distinct
            .into_iter()
            .map(|k| {
                let n = by_key.get(&k).copied().unwrap_or(0);
                (k, n)
            })
            .collect())
    }

    pub fn erase(&mut self, keys: Vec<Kmer>) -> Result<usize> {
        self.inner.erase(keys)
    }

    pub fn erase_if<P>(&mut self, keys: Vec<Kmer>, pred: P) -> Result<usize>
    where
        P: Fn(&Kmer, &u64) -> bool,
    {
        self.inner.erase_if(keys, pred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::Alphabet;
    use crate::comm::transport::MemoryComm;

    fn single_rank_map() -> CountingMap<MemoryComm> {
        let comm = MemoryComm::universe(1).unwrap().into_iter().next().unwrap();
        CountingMap::new(
            Arc::new(comm),
            KmerSpec::new(3, Alphabet::Dna2).unwrap(),
            KeyTransform::Identity,
            HashKind::Murmur,
            HashKind::Std,
        )
    }

    #[test]
    fn test_occurrences_tallied() {
        let mut m = single_rank_map();
        m.insert(vec![Kmer(1), Kmer(1), Kmer(1), Kmer(2)]).unwrap();
        let mut found = m.find(vec![Kmer(1), Kmer(2)]).unwrap();
        found.sort();
        assert_eq!(found, vec![(Kmer(1), 3), (Kmer(2), 1)]);
    }

    #[test]
    fn test_repeat_insert_sums() {
        let mut m = single_rank_map();
        m.insert(vec![Kmer(1), Kmer(1)]).unwrap();
        m.insert(vec![Kmer(1)]).unwrap();
        assert_eq!(m.find(vec![Kmer(1)]).unwrap(), vec![(Kmer(1), 3)]);
    }

    #[test]
    fn test_count_reports_stored_tally_and_zero() {
        let mut m = single_rank_map();
        m.insert(vec![Kmer(1), Kmer(1)]).unwrap();
        let mut counts = m.count(vec![Kmer(1), Kmer(9)]).unwrap();
        counts.sort();
        assert_eq!(counts, vec![(Kmer(1), 2), (Kmer(9), 0)]);
    }

    #[test]
    fn test_erase_if_on_tally() {
        let mut m = single_rank_map();
        m.insert(vec![Kmer(1), Kmer(2), Kmer(2), Kmer(3), Kmer(3), Kmer(3)])
            .unwrap();
        let removed = m.erase_if(m.keys(), |_, n| *n > 1).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(m.find(vec![Kmer(1)]).unwrap(), vec![(Kmer(1), 1)]);
        assert!(m.find(vec![Kmer(2), Kmer(3)]).unwrap().is_empty());
    }

    #[test]
    fn test_local_size_counts_distinct() {
        let mut m = single_rank_map();
        m.insert(vec![Kmer(1), Kmer(1), Kmer(2)]).unwrap();
        assert_eq!(m.local_size(), 2);
    }
}
