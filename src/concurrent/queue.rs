//! Bounded multi-producer multi-consumer queue with a push gate.
//!
//! The outbound send path batches buffers through this queue: many
//! application threads push, the communication worker pops. The queue is
//! bounded so that a slow consumer exerts backpressure on producers, and
//! it can be closed for pushing, which is how the termination protocol
//! drains in-flight work without losing elements.
//!
//! Capacity is enforced by the backing `ArrayQueue`, so `len()` can never
//! exceed `capacity()`, not even transiently. Blocking operations spin
//! briefly with a CPU-relax hint, then park on a condvar with a short
//! timeout; wakeups are edge-notified on push, pop, and gate changes.

use crossbeam_queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::constants::SPIN_LIMIT;
use crate::error::{LomviError, Result};

const PARK_TIMEOUT: Duration = Duration::from_millis(1);

/// A bounded MPMC queue whose push side can be disabled.
///
/// Disabling push is a release operation and observing it an acquire
/// operation, so a consumer that sees `can_pop() == false` also sees
/// every element pushed before the gate closed.
pub struct BoundedQueue<T> {
    inner: ArrayQueue<T>,
    push_enabled: AtomicBool,
    gate: Mutex<()>,
    changed: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Create a queue with the given capacity.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(LomviError::validation("queue capacity must be positive"));
        }
        Ok(BoundedQueue {
            inner: ArrayQueue::new(capacity),
            push_enabled: AtomicBool::new(true),
            gate: Mutex::new(()),
            changed: Condvar::new(),
        })
    }

    /// Current element count. Never exceeds `capacity()`.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if the queue holds no elements.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Maximum element count.
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Allow pushes again after `disable_push`.
    pub fn enable_push(&self) {
        self.push_enabled.store(true, Ordering::Release);
        self.notify();
    }

    /// Refuse all further pushes. Elements already queued remain
    /// poppable; blocked producers return failure.
    pub fn disable_push(&self) {
        self.push_enabled.store(false, Ordering::Release);
        self.notify();
    }

    /// Whether pushes are currently admitted (gate open; may still fail
    /// on capacity).
    pub fn can_push(&self) -> bool {
        self.push_enabled.load(Ordering::Acquire)
    }

    /// Whether a pop can succeed now or in the future: false only when
    /// the push gate is closed AND the queue is empty.
    pub fn can_pop(&self) -> bool {
        self.can_push() || !self.inner.is_empty()
    }

    /// Discard all queued elements. The push gate is left as-is.
    pub fn clear(&self) {
        while self.inner.pop().is_some() {}
        self.notify();
    }

    /// Non-blocking push. On failure (gate closed or at capacity) the
    /// element is handed back untouched.
    pub fn try_push(&self, value: T) -> std::result::Result<(), T> {
        if !self.can_push() {
            return Err(value);
        }
        match self.inner.push(value) {
            Ok(()) => {
                self.notify();
                Ok(())
            }
            Err(value) => Err(value),
        }
    }

    /// Blocking push: waits while the queue is full, returns the element
    /// on failure only if the push gate closes while waiting.
    pub fn wait_and_push(&self, mut value: T) -> std::result::Result<(), T> {
        let mut spins = 0usize;
        loop {
            if !self.can_push() {
                return Err(value);
            }
            match self.inner.push(value) {
                Ok(()) => {
                    self.notify();
                    return Ok(());
                }
                Err(v) => value = v,
            }

            if spins < SPIN_LIMIT {
                spins += 1;
                std::hint::spin_loop();
            } else {
                let mut guard = self.gate.lock();
                // re-check under the lock so a concurrent pop cannot be missed
                if self.inner.len() < self.inner.capacity() || !self.can_push() {
                    continue;
                }
                self.changed.wait_for(&mut guard, PARK_TIMEOUT);
            }
        }
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<T> {
        let value = self.inner.pop();
        if value.is_some() {
            self.notify();
        }
        value
    }

    /// Blocking pop: waits while the queue is empty, returns `None` only
    /// once the push gate is closed and the queue has drained.
    pub fn wait_and_pop(&self) -> Option<T> {
        let mut spins = 0usize;
        loop {
            if let Some(value) = self.inner.pop() {
                self.notify();
                return Some(value);
            }
            if !self.can_pop() {
                return None;
            }

            if spins < SPIN_LIMIT {
                spins += 1;
                std::hint::spin_loop();
            } else {
                let mut guard = self.gate.lock();
                if !self.inner.is_empty() || !self.can_pop() {
                    continue;
                }
                self.changed.wait_for(&mut guard, PARK_TIMEOUT);
            }
        }
    }

    #[inline]
    fn notify(&self) {
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(BoundedQueue::<u32>::new(0).is_err());
    }

    #[test]
    fn test_try_push_pop_basic() {
        let q = BoundedQueue::new(4).unwrap();
        assert!(q.try_push(1).is_ok());
        assert!(q.try_push(2).is_ok());
        assert_eq!(q.len(), 2);
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let q = BoundedQueue::new(2).unwrap();
        assert!(q.try_push(1).is_ok());
        assert!(q.try_push(2).is_ok());
        // full: the element comes back untouched
        assert_eq!(q.try_push(3), Err(3));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_disable_push_rejects_and_drains() {
        let q = BoundedQueue::new(4).unwrap();
        q.try_push(1).unwrap();
        q.disable_push();
        assert_eq!(q.try_push(2), Err(2));
        assert!(!q.can_push());
        assert!(q.can_pop()); // one element still queued
        assert_eq!(q.wait_and_pop(), Some(1));
        assert!(!q.can_pop());
        assert_eq!(q.wait_and_pop(), None);
    }

    #[test]
    fn test_enable_push_reopens() {
        let q = BoundedQueue::new(4).unwrap();
        q.disable_push();
        assert_eq!(q.try_push(1), Err(1));
        q.enable_push();
        assert!(q.try_push(1).is_ok());
    }

    #[test]
    fn test_clear_keeps_gate() {
        let q = BoundedQueue::new(4).unwrap();
        q.try_push(1).unwrap();
        q.try_push(2).unwrap();
        q.clear();
        assert!(q.is_empty());
        assert!(q.can_push());
    }

    #[test]
    fn test_wait_and_push_blocks_until_space() {
        let q = Arc::new(BoundedQueue::new(1).unwrap());
        q.try_push(0u32).unwrap();

        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.wait_and_push(1).is_ok())
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(q.try_pop(), Some(0));
        assert!(producer.join().unwrap());
        assert_eq!(q.try_pop(), Some(1));
    }

    #[test]
    fn test_wait_and_push_released_by_disable() {
        let q = Arc::new(BoundedQueue::new(1).unwrap());
        q.try_push(0u32).unwrap();

        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.wait_and_push(1))
        };

        thread::sleep(Duration::from_millis(20));
        q.disable_push();
        // the blocked producer gets its element back
        assert_eq!(producer.join().unwrap(), Err(1));
    }

    #[test]
    fn test_wait_and_pop_released_by_disable() {
        let q: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new(4).unwrap());

        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.wait_and_pop())
        };

        thread::sleep(Duration::from_millis(20));
        q.disable_push();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_mpmc_all_elements_delivered() {
        let q = Arc::new(BoundedQueue::new(8).unwrap());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..100u64 {
                        q.wait_and_push(p * 1000 + i).unwrap();
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    let mut got = Vec::new();
                    while let Some(v) = q.wait_and_pop() {
                        got.push(v);
                    }
                    got
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        q.disable_push();

        let total: usize = consumers.into_iter().map(|c| c.join().unwrap().len()).sum();
        assert_eq!(total, 400);
    }
}
