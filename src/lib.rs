//! lomvi: a distributed k-mer index.
//!
//! Reads are parsed into length-k substrings (k-mers) on every rank of a
//! communicator; each k-mer is routed to the rank that owns it (a prefix
//! hash of its canonical form, modulo the communicator size) and stored
//! in that rank's local hash table. Batched `insert` / `find` / `count` /
//! `erase` run as bulk-synchronous collectives over a stable bucketing
//! plus all-to-all exchange; an asynchronous broker with per-tag
//! callbacks and a cooperative end-of-stream protocol covers the
//! streaming side.
//!
//! # Layers
//!
//! - [`concurrent`]: bounded MPMC queue, append buffers, and the
//!   per-tag/per-destination buffer rotation feeding the broker
//! - [`comm`]: the [`comm::Transport`] seam (with an in-process
//!   implementation) and the asynchronous [`comm::CommLayer`]
//! - [`distmap`]: the four distributed map variants
//! - [`index`]: count / position / position+quality orchestrators
//! - [`alphabet`], [`kmer`], [`quality`], [`io`]: the bioinformatics
//!   collaborators (packing, canonicalization, Phred aggregation,
//!   FASTQ/FASTA input)
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use lomvi::alphabet::Alphabet;
//! use lomvi::comm::MemoryComm;
//! use lomvi::hashing::HashKind;
//! use lomvi::index::CountIndex;
//! use lomvi::kmer::{KeyTransform, KmerScan, KmerSpec};
//!
//! let comm = MemoryComm::universe(1).unwrap().into_iter().next().unwrap();
//! let spec = KmerSpec::new(3, Alphabet::Dna2).unwrap();
//! let mut index = CountIndex::new(
//!     Arc::new(comm),
//!     spec,
//!     KeyTransform::Identity,
//!     HashKind::Murmur,
//!     HashKind::Std,
//! );
//!
//! let kmers: Vec<_> = KmerScan::new(spec, b"AAAAA").map(|(_, k)| k).collect();
//! index.build(kmers).unwrap();
//!
//! let aaa = spec.pack(b"AAA").unwrap();
//! assert_eq!(index.find(vec![aaa]).unwrap(), vec![(aaa, 3)]);
//! ```

pub mod alphabet;
pub mod bucket;
pub mod comm;
pub mod concurrent;
pub mod config;
pub mod constants;
pub mod distmap;
pub mod error;
pub mod hashing;
pub mod index;
pub mod io;
pub mod kmer;
pub mod logging;
pub mod quality;
pub mod wire;

pub use alphabet::Alphabet;
pub use comm::{CommLayer, MemoryComm, Transport};
pub use config::{IndexConfig, StorageKind};
pub use distmap::{CountingMap, DistMap, DistMultiMap, ReductionMap};
pub use error::{LomviError, Result};
pub use hashing::HashKind;
pub use index::{CountIndex, PosQual, Position, PositionIndex, PositionQualityIndex};
pub use kmer::{KeyTransform, Kmer, KmerScan, KmerSpec};
