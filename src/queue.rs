//! Bounded FIFO job queue.
//!
//! Admission never waits on this queue: [`JobQueue::try_enqueue`] either
//! accepts the item or hands it straight back so the caller can reject the
//! request. Workers suspend in [`JobQueue::dequeue`] until an item arrives or
//! the queue is closed.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

/// Default number of jobs the queue holds before rejecting admissions.
pub const DEFAULT_QUEUE_CAPACITY: usize = 200;

/// Returned by [`JobQueue::try_enqueue`] with the item it refused.
pub struct Rejected<T> {
    pub item: T,
    pub capacity: usize,
    /// The queue was closed rather than full.
    pub closed: bool,
}

impl<T> fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("capacity", &self.capacity)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

pub struct JobQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    peak: AtomicUsize,
    closed: AtomicBool,
    available: Notify,
}

impl<T> JobQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            peak: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            available: Notify::new(),
        }
    }

    // VecDeque push/pop cannot leave the deque half-updated.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append `item` unless the queue is full or closed.
    ///
    /// Returns the queue length after insertion.
    pub fn try_enqueue(&self, item: T) -> Result<usize, Rejected<T>> {
        let len = {
            let mut items = self.lock();
            let closed = self.closed.load(Ordering::Acquire);
            if closed || items.len() >= self.capacity {
                return Err(Rejected {
                    item,
                    capacity: self.capacity,
                    closed,
                });
            }
            items.push_back(item);
            items.len()
        };
        self.peak.fetch_max(len, Ordering::Relaxed);
        self.available.notify_one();
        Ok(len)
    }

    /// Take the oldest item, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue has been closed and drained.
    pub async fn dequeue(&self) -> Option<T> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // register before checking so a concurrent enqueue cannot slip past
            notified.as_mut().enable();
            {
                let mut items = self.lock();
                if let Some(item) = items.pop_front() {
                    return Some(item);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Non-waiting variant of [`dequeue`](Self::dequeue).
    pub fn try_dequeue(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Stop accepting items and wake every waiting worker.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Highest length observed since creation.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Current length / capacity, in `[0, 1]`.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.len() as f64 / self.capacity as f64
        }
    }
}
