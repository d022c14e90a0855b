//! Bounded hand-off queue between partitions
//!
//! Every partition owns one [`HandoffQueue`]. Producers are external input
//! handles and the sender links of upstream partitions. A full queue is how
//! backpressure travels upstream: `try_push` hands the item back, `push`
//! blocks until the consumer makes room.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

/// Why a push did not enqueue its item; the item is handed back
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError<T> {
    #[error("queue is full")]
    Full(T),
    #[error("queue is closed")]
    Closed(T),
}

impl<T> PushError<T> {
    /// Recover the rejected item
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(item) | PushError::Closed(item) => item,
        }
    }
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded multi-producer, single-consumer queue
#[derive(Debug)]
pub struct HandoffQueue<T> {
    state: Mutex<QueueState<T>>,
    capacity: usize,
    readable: Condvar,
    writable: Condvar,
}

impl<T> HandoffQueue<T> {
    /// Create a queue holding at most `capacity` items
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue without blocking
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.lock();
        if state.closed {
            return Err(PushError::Closed(item));
        }
        if state.items.len() >= self.capacity {
            return Err(PushError::Full(item));
        }
        state.items.push_back(item);
        drop(state);
        self.readable.notify_one();
        Ok(())
    }

    /// Enqueue, waiting while the queue is full
    ///
    /// Only fails if the queue is closed before room appears.
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.lock();
        while !state.closed && state.items.len() >= self.capacity {
            state = self
                .writable
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        if state.closed {
            return Err(PushError::Closed(item));
        }
        state.items.push_back(item);
        drop(state);
        self.readable.notify_one();
        Ok(())
    }

    /// Dequeue one item without blocking
    pub fn try_pop(&self) -> Option<T> {
        let item = self.lock().items.pop_front();
        if item.is_some() {
            self.writable.notify_all();
        }
        item
    }

    /// Take every queued item, oldest first
    pub fn drain(&self) -> Vec<T> {
        let items: Vec<T> = self.lock().items.drain(..).collect();
        if !items.is_empty() {
            self.writable.notify_all();
        }
        items
    }

    /// Wait up to `timeout` for an item to become available
    ///
    /// Returns `true` if the queue is non-empty or closed on return.
    pub fn wait_readable(&self, timeout: Duration) -> bool {
        let state = self.lock();
        if !state.items.is_empty() || state.closed {
            return true;
        }
        let (state, _) = self
            .readable
            .wait_timeout(state, timeout)
            .unwrap_or_else(|e| e.into_inner());
        !state.items.is_empty() || state.closed
    }

    /// Refuse further pushes and release every waiter
    ///
    /// Items already queued can still be drained.
    pub fn close(&self) {
        self.lock().closed = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Check if the queue refuses pushes
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Wake a consumer waiting in [`HandoffQueue::wait_readable`]
    pub fn wake(&self) {
        self.readable.notify_all();
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Maximum number of queued items
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
