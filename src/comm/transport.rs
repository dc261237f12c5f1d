//! The message-passing seam and its in-process implementation.
//!
//! The communication layer and the distributed maps are written against
//! the [`Transport`] trait: rank/size introspection, non-blocking typed
//! point-to-point sends with a probe, a variable-count all-to-all
//! collective, and a barrier. Process-level bindings (MPI and friends)
//! would implement this trait; [`MemoryComm`] implements it for P ranks
//! living in one process, which is also what the integration tests run
//! under.
//!
//! Point-to-point and collective traffic travel on separate channels so
//! an asynchronous receive loop can never steal a collective fragment.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::constants::MAX_COMM_SIZE;
use crate::error::{LomviError, Result};

/// One inbound point-to-point message.
#[derive(Debug)]
pub struct Envelope {
    pub src: usize,
    pub tag: usize,
    pub bytes: Vec<u8>,
}

/// Message-passing contract required by the communication layer and the
/// distributed maps.
pub trait Transport: Send + Sync + 'static {
    /// This process's rank in `[0, size)`.
    fn rank(&self) -> usize;

    /// Number of participating ranks.
    fn size(&self) -> usize;

    /// Post a message to `dst`. Completion is eager: when this returns,
    /// the payload is owned by the transport.
    fn send(&self, dst: usize, tag: usize, bytes: Vec<u8>) -> Result<()>;

    /// Poll for a completed inbound message.
    fn try_probe(&self) -> Result<Option<Envelope>>;

    /// Collective exchange: `parts[i]` goes to rank `i`; the result
    /// holds one part per source rank. Every rank must call collectives
    /// in the same order.
    fn alltoallv(&self, parts: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>>;

    /// Block until every rank has entered the barrier.
    fn barrier(&self) -> Result<()>;
}

// ============================================================================
// In-process transport
// ============================================================================

struct CollectiveMsg {
    src: usize,
    seq: u64,
    bytes: Vec<u8>,
}

/// In-process transport endpoint for one rank.
///
/// Per-(src, dst) FIFO holds because each source pushes into a
/// destination's single channel in program order, and crossbeam channels
/// preserve per-producer ordering.
pub struct MemoryComm {
    rank: usize,
    p2p_out: Vec<Sender<Envelope>>,
    p2p_in: Receiver<Envelope>,
    coll_out: Vec<Sender<CollectiveMsg>>,
    coll_in: Receiver<CollectiveMsg>,
    /// Sequence number of this rank's next collective call.
    coll_seq: AtomicU64,
    /// Collective fragments that arrived ahead of our own matching call.
    coll_stash: Mutex<HashMap<(u64, usize), Vec<u8>>>,
}

impl MemoryComm {
    /// Build a universe of `ranks` connected endpoints.
    pub fn universe(ranks: usize) -> Result<Vec<MemoryComm>> {
        if ranks == 0 {
            return Err(LomviError::validation("communicator has no ranks"));
        }
        if ranks > MAX_COMM_SIZE {
            return Err(LomviError::validation(format!(
                "communicator of {} ranks exceeds the {} limit",
                ranks, MAX_COMM_SIZE
            )));
        }
        let mut p2p_senders = Vec::with_capacity(ranks);
        let mut p2p_receivers = Vec::with_capacity(ranks);
        let mut coll_senders = Vec::with_capacity(ranks);
        let mut coll_receivers = Vec::with_capacity(ranks);
        for _ in 0..ranks {
            let (tx, rx) = unbounded();
            p2p_senders.push(tx);
            p2p_receivers.push(rx);
            let (tx, rx) = unbounded();
            coll_senders.push(tx);
            coll_receivers.push(rx);
        }

        let mut comms = Vec::with_capacity(ranks);
        for (rank, (p2p_in, coll_in)) in p2p_receivers
            .into_iter()
            .zip(coll_receivers.into_iter())
            .enumerate()
        {
            comms.push(MemoryComm {
                rank,
                p2p_out: p2p_senders.clone(),
                p2p_in,
                coll_out: coll_senders.clone(),
                coll_in,
                coll_seq: AtomicU64::new(0),
                coll_stash: Mutex::new(HashMap::new()),
            });
        }
        Ok(comms)
    }
}

impl Transport for MemoryComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.p2p_out.len()
    }

    fn send(&self, dst: usize, tag: usize, bytes: Vec<u8>) -> Result<()> {
        if dst >= self.size() {
            return Err(LomviError::validation(format!(
                "destination rank {} out of range ({} ranks)",
                dst,
                self.size()
            )));
        }
        self.p2p_out[dst]
            .send(Envelope {
                src: self.rank,
                tag,
                bytes,
            })
            .map_err(|_| LomviError::transport(format!("rank {} channel closed", dst)))
    }

    fn try_probe(&self) -> Result<Option<Envelope>> {
        match self.p2p_in.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(crossbeam_channel::TryRecvError::Empty) => Ok(None),
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                Err(LomviError::transport("inbound channel closed"))
            }
        }
    }

    fn alltoallv(&self, parts: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        let ranks = self.size();
        if parts.len() != ranks {
            return Err(LomviError::validation(format!(
                "alltoallv needs {} parts, got {}",
                ranks,
                parts.len()
            )));
        }
        let seq = self.coll_seq.fetch_add(1, Ordering::Relaxed);

        for (dst, bytes) in parts.into_iter().enumerate() {
            self.coll_out[dst]
                .send(CollectiveMsg {
                    src: self.rank,
                    seq,
                    bytes,
                })
                .map_err(|_| LomviError::transport(format!("rank {} channel closed", dst)))?;
        }

        let mut received: Vec<Option<Vec<u8>>> = (0..ranks).map(|_| None).collect();
        let mut remaining = ranks;

        // first claim anything a faster rank already pushed for this seq
        {
            let mut stash = self.coll_stash.lock();
            for src in 0..ranks {
                if let Some(bytes) = stash.remove(&(seq, src)) {
                    received[src] = Some(bytes);
                    remaining -= 1;
                }
            }
        }

        while remaining > 0 {
            let msg = self
                .coll_in
                .recv()
                .map_err(|_| LomviError::transport("collective channel closed"))?;
            if msg.seq == seq {
                debug_assert!(received[msg.src].is_none());
                received[msg.src] = Some(msg.bytes);
                remaining -= 1;
            } else {
                // a rank is ahead of us; park its fragment for later
                self.coll_stash.lock().insert((msg.seq, msg.src), msg.bytes);
            }
        }

        Ok(received.into_iter().map(|p| p.unwrap_or_default()).collect())
    }

    fn barrier(&self) -> Result<()> {
        let empty = vec![Vec::new(); self.size()];
        self.alltoallv(empty).map(|_| ())
    }
}
