//! Error types for queue operations.

use std::fmt;

use thiserror::Error;

/// Errors from building a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// A queue must hold at least one item.
    #[error("queue capacity must be at least 1")]
    ZeroCapacity,
}

/// The queue was closed; the rejected item is handed back.
#[derive(PartialEq, Eq)]
pub struct QueueClosed<T>(pub T);

impl<T> QueueClosed<T> {
    /// Returns the item that could not be enqueued.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueClosed").finish_non_exhaustive()
    }
}

impl<T> fmt::Display for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue is closed")
    }
}

impl<T> std::error::Error for QueueClosed<T> {}

/// Why a non-suspending enqueue did not take the item.
#[derive(PartialEq, Eq)]
pub enum TryEnqueueError<T> {
    /// The queue is at capacity.
    Full(T),
    /// The queue is closed.
    Closed(T),
}

impl<T> TryEnqueueError<T> {
    /// Returns the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }

    /// Whether the rejection was caused by closure.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

impl<T> fmt::Debug for TryEnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> fmt::Display for TryEnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("queue is full"),
            Self::Closed(_) => f.write_str("queue is closed"),
        }
    }
}

impl<T> std::error::Error for TryEnqueueError<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_closed_returns_item() {
        let error = QueueClosed(String::from("payload"));
        assert_eq!(error.to_string(), "queue is closed");
        assert_eq!(error.into_inner(), "payload");
    }

    #[test]
    fn test_try_enqueue_error_labels() {
        let full = TryEnqueueError::Full(1);
        let closed = TryEnqueueError::Closed(2);
        assert_eq!(full.to_string(), "queue is full");
        assert!(!full.is_closed());
        assert!(closed.is_closed());
        assert_eq!(closed.into_inner(), 2);
        assert_eq!(format!("{full:?}"), "Full(..)");
    }

    #[test]
    fn test_zero_capacity_display() {
        assert_eq!(
            QueueError::ZeroCapacity.to_string(),
            "queue capacity must be at least 1"
        );
    }
}
