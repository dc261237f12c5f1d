//! Asynchronous message broker with per-tag callback dispatch.
//!
//! Application threads batch small payloads into per-destination buffers
//! (`send_message`); a single communication worker drives the transport;
//! a dispatch worker runs the callback registered for each tag on every
//! received payload. Tags are closed cooperatively: `flush` pushes the
//! remaining buffers plus one end-of-stream marker per destination, and
//! `finish` blocks until every peer's end-of-stream arrived and every
//! received payload has been dispatched — after which not a single
//! message of that tag is still in flight anywhere.
//!
//! The worker never unwinds into caller code: a transport failure is
//! recorded, both queues are drained, and subsequent calls fail fast.

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::comm::transport::{Envelope, Transport};
use crate::concurrent::buffer::AppendBuffer;
use crate::concurrent::pool::TagBuffers;
use crate::concurrent::queue::BoundedQueue;
use crate::error::{FirstErrorCapture, LomviError, Result};

/// Callback invoked for every received payload of a tag: `(bytes, src)`.
pub type ReceiveCallback = Box<dyn Fn(&[u8], usize) + Send + Sync>;

/// One element of the outbound send queue. `buffer: None` is the
/// end-of-stream marker for `(tag, dst)`.
struct SendUnit {
    tag: usize,
    dst: usize,
    buffer: Option<Arc<AppendBuffer>>,
}

/// One received payload awaiting its callback.
struct Delivery {
    tag: usize,
    src: usize,
    bytes: Vec<u8>,
}

/// Per-tag termination accounting, guarded by one mutex with a condvar
/// so `finish` can sleep on state changes.
#[derive(Default)]
struct TagState {
    /// Tags still accepting application sends.
    send_accept: HashSet<usize>,
    /// Tag -> peers whose end-of-stream has not arrived yet. The entry
    /// is retired when it reaches zero.
    recv_remaining: HashMap<usize, usize>,
    /// Tag -> payloads received but not yet run through the callback.
    dispatch_pending: HashMap<usize, usize>,
}

struct Shared<T: Transport> {
    transport: Arc<T>,
    send_queue: BoundedQueue<SendUnit>,
    dispatch_queue: BoundedQueue<Delivery>,
    /// Tag -> outbound buffer set; the mutex guards only the lookup.
    buffers: Mutex<HashMap<usize, Arc<TagBuffers>>>,
    state: Mutex<TagState>,
    state_changed: Condvar,
    callbacks: Mutex<HashMap<usize, Arc<ReceiveCallback>>>,
    error: FirstErrorCapture,
    shutdown: AtomicBool,
    buffer_capacity: usize,
}

/// The communication layer. One instance per process (rank).
pub struct CommLayer<T: Transport> {
    shared: Arc<Shared<T>>,
    comm_worker: Option<JoinHandle<()>>,
    dispatch_worker: Option<JoinHandle<()>>,
}

impl<T: Transport> CommLayer<T> {
    /// Initialize communication: spawns the comm worker and the dispatch
    /// worker.
    pub fn new(transport: Arc<T>, queue_capacity: usize, buffer_capacity: usize) -> Result<Self> {
        if buffer_capacity == 0 {
            return Err(LomviError::validation("buffer capacity must be positive"));
        }
        let shared = Arc::new(Shared {
            transport,
            send_queue: BoundedQueue::new(queue_capacity)?,
            dispatch_queue: BoundedQueue::new(queue_capacity.max(2))?,
            buffers: Mutex::new(HashMap::new()),
            state: Mutex::new(TagState::default()),
            state_changed: Condvar::new(),
            callbacks: Mutex::new(HashMap::new()),
            error: FirstErrorCapture::new(),
            shutdown: AtomicBool::new(false),
            buffer_capacity,
        });

        let comm_worker = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("lomvi-comm".into())
                .spawn(move || comm_worker_loop(&shared))
                .map_err(|e| LomviError::transport(format!("failed to spawn comm worker: {e}")))?
        };
        let dispatch_worker = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("lomvi-dispatch".into())
                .spawn(move || dispatch_worker_loop(&shared))
                .map_err(|e| {
                    LomviError::transport(format!("failed to spawn dispatch worker: {e}"))
                })?
        };

        Ok(CommLayer {
            shared,
            comm_worker: Some(comm_worker),
            dispatch_worker: Some(dispatch_worker),
        })
    }

    /// This process's rank.
    pub fn comm_rank(&self) -> usize {
        self.shared.transport.rank()
    }

    /// Number of ranks in the communicator.
    pub fn comm_size(&self) -> usize {
        self.shared.transport.size()
    }

    /// Register the receive callback for a tag and open the tag for
    /// sending. Expects one end-of-stream from every rank (self
    /// included) before the tag can finish.
    ///
    /// Registering a tag twice is a warn-level no-op reported as
    /// `TagRegistered`.
    pub fn add_receive_callback<F>(&self, tag: usize, callback: F) -> Result<()>
    where
        F: Fn(&[u8], usize) + Send + Sync + 'static,
    {
        self.check_poisoned()?;

        let mut callbacks = self.shared.callbacks.lock();
        if callbacks.contains_key(&tag) {
            warn!("receive callback already registered for tag {}", tag);
            return Err(LomviError::TagRegistered { tag });
        }
        callbacks.insert(tag, Arc::new(Box::new(callback)));
        drop(callbacks);

        let mut state = self.shared.state.lock();
        state.send_accept.insert(tag);
        state
            .recv_remaining
            .insert(tag, self.shared.transport.size());
        Ok(())
    }

    /// Buffer one payload for `(tag, dst)`. Blocks when the outbound
    /// path is saturated; fails without side effects if the tag has been
    /// flushed.
    pub fn send_message(&self, bytes: &[u8], dst: usize, tag: usize) -> Result<()> {
        self.check_poisoned()?;

        if !self.shared.state.lock().send_accept.contains(&tag) {
            return Err(LomviError::TagClosed { tag });
        }

        let pool = self.tag_buffers(tag)?;
        loop {
            let outcome = pool.append(dst, bytes)?;
            if let Some(full) = outcome.full {
                use crate::concurrent::buffer::ByteBuffer;
                if full.is_empty() {
                    pool.release(dst, full);
                } else {
                    self.enqueue_send(SendUnit {
                        tag,
                        dst,
                        buffer: Some(full),
                    })?;
                }
            }
            if outcome.appended {
                return Ok(());
            }
            // the tag may have been flushed from under us; without this
            // check a closed (blocked) buffer set would spin forever
            if !self.shared.state.lock().send_accept.contains(&tag) {
                return Err(LomviError::CapacityExhausted { tag, dst });
            }
        }
    }

    /// Close a tag: queue all non-empty buffers, then one end-of-stream
    /// marker per destination. Call from a single thread per tag, after
    /// the tag's producers have stopped.
    pub fn flush(&self, tag: usize) -> Result<()> {
        self.check_poisoned()?;

        {
            let mut state = self.shared.state.lock();
            if !state.send_accept.remove(&tag) {
                warn!("flush on tag {} which is not open", tag);
                return Ok(());
            }
        }

        // buffers may not exist if nothing was ever sent; peers still
        // need our end-of-stream markers
        let pool = self.shared.buffers.lock().get(&tag).cloned();
        if let Some(pool) = pool {
            for (dst, buffer) in pool.flush() {
                self.enqueue_send(SendUnit {
                    tag,
                    dst,
                    buffer: Some(buffer),
                })?;
            }
        }
        for dst in 0..self.comm_size() {
            self.enqueue_send(SendUnit {
                tag,
                dst,
                buffer: None,
            })?;
        }
        Ok(())
    }

    /// Block until every peer's end-of-stream for `tag` has arrived and
    /// every received payload of `tag` has been dispatched.
    pub fn finish(&self, tag: usize) -> Result<()> {
        {
            let state = self.shared.state.lock();
            if state.send_accept.contains(&tag) {
                return Err(LomviError::validation(format!(
                    "finish({}) before flush({})",
                    tag, tag
                )));
            }
        }

        let mut state = self.shared.state.lock();
        loop {
            if self.shared.error.has_error() {
                drop(state);
                return Err(self.poisoned_error());
            }
            let receives_done = !state.recv_remaining.contains_key(&tag);
            let dispatched = state.dispatch_pending.get(&tag).copied().unwrap_or(0) == 0;
            if receives_done && dispatched {
                return Ok(());
            }
            self.shared
                .state_changed
                .wait_for(&mut state, Duration::from_millis(1));
        }
    }

    /// Stop both workers. All tags must be finished first.
    pub fn finish_communication(&mut self) -> Result<()> {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.send_queue.disable_push();
        if let Some(worker) = self.comm_worker.take() {
            let _ = worker.join();
        }
        self.shared.dispatch_queue.disable_push();
        if let Some(worker) = self.dispatch_worker.take() {
            let _ = worker.join();
        }
        if self.shared.error.has_error() {
            return Err(self.poisoned_error());
        }
        Ok(())
    }

    fn tag_buffers(&self, tag: usize) -> Result<Arc<TagBuffers>> {
        let mut buffers = self.shared.buffers.lock();
        if let Some(pool) = buffers.get(&tag) {
            return Ok(Arc::clone(pool));
        }
        let pool = Arc::new(TagBuffers::new(
            self.shared.transport.size(),
            self.shared.buffer_capacity,
        )?);
        buffers.insert(tag, Arc::clone(&pool));
        Ok(pool)
    }

    fn enqueue_send(&self, unit: SendUnit) -> Result<()> {
        self.shared
            .send_queue
            .wait_and_push(unit)
            .map_err(|_| self.poisoned_error())
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.shared.error.has_error() {
            Err(self.poisoned_error())
        } else {
            Ok(())
        }
    }

    fn poisoned_error(&self) -> LomviError {
        LomviError::transport("communication layer is shut down or poisoned")
    }
}

impl<T: Transport> Drop for CommLayer<T> {
    fn drop(&mut self) {
        let _ = self.finish_communication();
    }
}

// ============================================================================
// Workers
// ============================================================================

/// Comm worker: polls inbound completions, then starts at most one send
/// per iteration. Exits once shutdown is requested and the send queue
/// has drained.
fn comm_worker_loop<T: Transport>(shared: &Shared<T>) {
    loop {
        let mut idle = true;

        match shared.transport.try_probe() {
            Ok(Some(envelope)) => {
                idle = false;
                handle_inbound(shared, envelope);
            }
            Ok(None) => {}
            Err(e) => {
                poison(shared, e);
                return;
            }
        }

        if let Some(unit) = shared.send_queue.try_pop() {
            idle = false;
            if let Err(e) = handle_send(shared, unit) {
                poison(shared, e);
                return;
            }
        }

        if shared.shutdown.load(Ordering::Acquire) && shared.send_queue.is_empty() {
            return;
        }
        if idle {
            std::thread::sleep(Duration::from_micros(50));
        }
    }
}

fn handle_inbound<T: Transport>(shared: &Shared<T>, envelope: Envelope) {
    if envelope.bytes.is_empty() {
        end_of_stream(shared, envelope.tag, envelope.src);
    } else {
        deliver(shared, envelope.tag, envelope.src, envelope.bytes);
    }
}

/// Decrement the remaining-senders count for a tag; retire the tag once
/// every rank has signalled end-of-stream.
fn end_of_stream<T: Transport>(shared: &Shared<T>, tag: usize, src: usize) {
    let mut state = shared.state.lock();
    match state.recv_remaining.get_mut(&tag) {
        Some(remaining) => {
            *remaining -= 1;
            debug!(
                "rank {}: end-of-stream for tag {} from {}, {} senders remaining",
                shared.transport.rank(),
                tag,
                src,
                remaining
            );
            if *remaining == 0 {
                state.recv_remaining.remove(&tag);
                shared.state_changed.notify_all();
            }
        }
        None => warn!(
            "end-of-stream for unregistered or already-retired tag {}",
            tag
        ),
    }
}

fn deliver<T: Transport>(shared: &Shared<T>, tag: usize, src: usize, bytes: Vec<u8>) {
    {
        let mut state = shared.state.lock();
        *state.dispatch_pending.entry(tag).or_insert(0) += 1;
    }
    if shared
        .dispatch_queue
        .wait_and_push(Delivery { tag, src, bytes })
        .is_err()
    {
        // dispatcher is gone; roll the accounting back
        let mut state = shared.state.lock();
        if let Some(pending) = state.dispatch_pending.get_mut(&tag) {
            *pending -= 1;
        }
        shared.state_changed.notify_all();
    }
}

fn handle_send<T: Transport>(shared: &Shared<T>, unit: SendUnit) -> Result<()> {
    let me = shared.transport.rank();
    match unit.buffer {
        None => {
            // end-of-stream marker
            if unit.dst == me {
                end_of_stream(shared, unit.tag, me);
            } else {
                shared.transport.send(unit.dst, unit.tag, Vec::new())?;
            }
        }
        Some(buffer) => {
            if unit.dst == me {
                // short-circuit: explicit transfer onto the dispatch path
                let frame = buffer.take_frame();
                let bytes = frame.into_vec();
                if !bytes.is_empty() {
                    deliver(shared, unit.tag, me, bytes);
                }
            } else {
                buffer.seal();
                let bytes = buffer.sealed_bytes().to_vec();
                // a zero-length payload on the wire is the end-of-stream
                // marker; an empty buffer must never masquerade as one
                if !bytes.is_empty() {
                    shared.transport.send(unit.dst, unit.tag, bytes)?;
                }
            }
            if let Some(pool) = shared.buffers.lock().get(&unit.tag) {
                pool.release(unit.dst, buffer);
            }
        }
    }
    Ok(())
}

/// Dispatch worker: runs the registered callback for each delivery, then
/// updates the pending count `finish` waits on.
fn dispatch_worker_loop<T: Transport>(shared: &Shared<T>) {
    while let Some(delivery) = shared.dispatch_queue.wait_and_pop() {
        let callback = shared.callbacks.lock().get(&delivery.tag).cloned();
        match callback {
            Some(cb) => cb(&delivery.bytes, delivery.src),
            None => warn!("payload for tag {} without a callback", delivery.tag),
        }

        let mut state = shared.state.lock();
        if let Some(pending) = state.dispatch_pending.get_mut(&delivery.tag) {
            *pending -= 1;
            if *pending == 0 {
                state.dispatch_pending.remove(&delivery.tag);
            }
        }
        shared.state_changed.notify_all();
    }
}

/// Record the fatal error and drain everything so blocked threads wake.
fn poison<T: Transport>(shared: &Shared<T>, error: LomviError) {
    warn!("communication worker terminating: {}", error);
    shared.error.store(error);
    shared.send_queue.disable_push();
    shared.send_queue.clear();
    shared.dispatch_queue.disable_push();
    shared.state_changed.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::transport::MemoryComm;
    use std::sync::atomic::AtomicUsize;

    fn pair() -> Vec<CommLayer<MemoryComm>> {
        MemoryComm::universe(2)
            .unwrap()
            .into_iter()
            .map(|c| CommLayer::new(Arc::new(c), 16, 64).unwrap())
            .collect()
    }

    #[test]
    fn test_single_rank_roundtrip() {
        let comms = MemoryComm::universe(1).unwrap();
        let mut layer = CommLayer::new(Arc::new(comms.into_iter().next().unwrap()), 8, 64).unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        layer
            .add_receive_callback(1, move |bytes, src| {
                assert_eq!(src, 0);
                seen2.fetch_add(bytes.len(), Ordering::SeqCst);
            })
            .unwrap();

        layer.send_message(b"abcd", 0, 1).unwrap();
        layer.send_message(b"efgh", 0, 1).unwrap();
        layer.flush(1).unwrap();
        layer.finish(1).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 8);
        layer.finish_communication().unwrap();
    }

    #[test]
    fn test_duplicate_registration_is_refused() {
        let comms = MemoryComm::universe(1).unwrap();
        let layer = CommLayer::new(Arc::new(comms.into_iter().next().unwrap()), 8, 64).unwrap();
        layer.add_receive_callback(1, |_, _| {}).unwrap();
        assert!(matches!(
            layer.add_receive_callback(1, |_, _| {}),
            Err(LomviError::TagRegistered { tag: 1 })
        ));
    }

    #[test]
    fn test_send_on_flushed_tag_fails() {
        let comms = MemoryComm::universe(1).unwrap();
        let layer = CommLayer::new(Arc::new(comms.into_iter().next().unwrap()), 8, 64).unwrap();
        layer.add_receive_callback(1, |_, _| {}).unwrap();
        layer.flush(1).unwrap();
        assert!(matches!(
            layer.send_message(b"x", 0, 1),
            Err(LomviError::TagClosed { tag: 1 })
        ));
    }

    #[test]
    fn test_finish_before_flush_is_an_error() {
        let comms = MemoryComm::universe(1).unwrap();
        let layer = CommLayer::new(Arc::new(comms.into_iter().next().unwrap()), 8, 64).unwrap();
        layer.add_receive_callback(1, |_, _| {}).unwrap();
        assert!(layer.finish(1).is_err());
    }

    #[test]
    fn test_two_ranks_exchange() {
        let layers = pair();
        let handles: Vec<_> = layers
            .into_iter()
            .map(|mut layer| {
                std::thread::spawn(move || {
                    let received = Arc::new(AtomicUsize::new(0));
                    let received2 = Arc::clone(&received);
                    layer
                        .add_receive_callback(3, move |bytes, _| {
                            received2.fetch_add(bytes.len() / 8, Ordering::SeqCst);
                        })
                        .unwrap();

                    let peer = 1 - layer.comm_rank();
                    for i in 0..100u64 {
                        layer.send_message(&i.to_le_bytes(), peer, 3).unwrap();
                    }
                    layer.flush(3).unwrap();
                    layer.finish(3).unwrap();
                    layer.finish_communication().unwrap();
                    received.load(Ordering::SeqCst)
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), 100);
        }
    }
}
