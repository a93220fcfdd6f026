//! Bounded, closeable FIFO queue with async backpressure.
//!
//! [`BoundedQueue`] is the single hand-off abstraction between pipeline
//! stages:
//!
//! - [`enqueue`](BoundedQueue::enqueue) suspends while the queue is full
//! - [`dequeue`](BoundedQueue::dequeue) suspends while it is empty
//! - [`close`](BoundedQueue::close) releases every suspended caller;
//!   already-queued items stay drainable
//!
//! Items move in and out by value, so the producer gives up ownership on
//! enqueue and the dequeuing consumer becomes the sole owner.
//!
//! # Example
//!
//! ```
//! use streamfetch::BoundedQueue;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = BoundedQueue::new(2)?;
//! queue.enqueue("a").await?;
//! queue.enqueue("b").await?;
//! queue.close();
//!
//! assert_eq!(queue.dequeue().await, Some("a"));
//! assert_eq!(queue.dequeue().await, Some("b"));
//! assert_eq!(queue.dequeue().await, None);
//! # Ok(())
//! # }
//! ```

mod error;

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::trace;

pub use error::{QueueClosed, QueueError, TryEnqueueError};

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Fixed-capacity FIFO queue shared between async producers and consumers.
///
/// Typically wrapped in an `Arc`. The internal lock is never held across an
/// `.await`.
pub struct BoundedQueue<T> {
    state: Mutex<State<T>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
    closed: Notify,
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("size", &self.size())
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue holding at most `capacity` items.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ZeroCapacity`] when `capacity` is 0.
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::ZeroCapacity);
        }
        Ok(Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            capacity,
            not_empty: Notify::new(),
            not_full: Notify::new(),
            closed: Notify::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `item` at the back, waiting for space while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns the item inside [`QueueClosed`] when the queue is closed,
    /// including when it closes while this call is waiting.
    pub async fn enqueue(&self, item: T) -> Result<(), QueueClosed<T>> {
        let mut item = item;
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_enqueue(item) {
                Ok(()) => return Ok(()),
                Err(TryEnqueueError::Closed(rejected)) => return Err(QueueClosed(rejected)),
                Err(TryEnqueueError::Full(rejected)) => item = rejected,
            }

            trace!(capacity = self.capacity, "queue full, producer waiting");
            notified.await;
        }
    }

    /// Adds `item` at the back without waiting.
    ///
    /// # Errors
    ///
    /// Hands the item back when the queue is full or closed.
    pub fn try_enqueue(&self, item: T) -> Result<(), TryEnqueueError<T>> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(TryEnqueueError::Closed(item));
            }
            if state.items.len() >= self.capacity {
                return Err(TryEnqueueError::Full(item));
            }
            state.items.push_back(item);
        }
        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes the oldest item, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn dequeue(&self) -> Option<T> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    drop(state);
                    self.not_full.notify_one();
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }

            trace!("queue empty, consumer waiting");
            notified.await;
        }
    }

    /// Removes the oldest item without waiting.
    pub fn try_dequeue(&self) -> Option<T> {
        let item = self.lock().items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Closes the queue. Idempotent.
    ///
    /// Waiting consumers observe the end once remaining items are drained;
    /// waiting producers fail with [`QueueClosed`].
    pub fn close(&self) {
        let newly_closed = {
            let mut state = self.lock();
            !std::mem::replace(&mut state.closed, true)
        };
        if newly_closed {
            trace!(remaining = self.size(), "queue closed");
        }
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
        self.closed.notify_waiters();
    }

    /// Resolves once the queue has been closed.
    pub async fn closed(&self) {
        loop {
            let notified = self.closed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    /// Number of items currently queued.
    #[must_use]
    pub fn size(&self) -> usize {
        self.lock().items.len()
    }

    /// Maximum number of queued items.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether no item is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
