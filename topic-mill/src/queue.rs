//! Lock-free multi-producer/multi-consumer queues shared between batch
//! loaders, processor workers, and the merger.

use crossbeam_queue::SegQueue;
use std::sync::Arc;

/// Unbounded MPMC FIFO of shared-owned elements.
///
/// Capacity discipline is a producer-side contract: the processor worker
/// polls [`len`](Self::len) against `merger_queue_max_size` and sleeps
/// while the merger queue is full.
pub struct ThreadSafeQueue<T> {
    inner: SegQueue<Arc<T>>,
}

impl<T> ThreadSafeQueue<T> {
    pub fn new() -> Self {
        ThreadSafeQueue {
            inner: SegQueue::new(),
        }
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<Arc<T>> {
        self.inner.pop()
    }

    pub fn push(&self, value: Arc<T>) {
        self.inner.push(value);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<T> Default for ThreadSafeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
