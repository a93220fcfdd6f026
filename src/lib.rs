//! Streamfetch Library
//!
//! Resilient, bounded-memory streaming of paginated API collections. A
//! cursor-paginated remote collection becomes a lazy stream of items that
//! absorbs transient failures and rate limiting without dropping data or
//! buffering the whole collection.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`error`] - Raw API failures, classification and error records
//! - [`executor`] - Timeout, retry/backoff and rate-limit recovery per operation
//! - [`queue`] - Bounded, closeable FIFO with async backpressure
//! - [`paginate`] - Cursor pagination into a lazy item stream
//! - [`processor`] - Bounded-parallelism transformation with partial-failure isolation
//!
//! Collaborators:
//! - [`http`] - Cursor-paginated JSON endpoint as a page source
//! - [`events`] - Fire-and-forget event sinks
//! - [`shutdown`] - Shared cancellation signal
//! - [`resume`] - Consumer-side resume point tracking
//! - [`cache`] - Explicit per-id cache manager

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod error;
pub mod events;
pub mod executor;
pub mod http;
pub mod paginate;
pub mod processor;
pub mod queue;
pub mod resume;
pub mod shutdown;

mod user_agent;

// Re-export commonly used types
pub use cache::CacheManager;
pub use error::{AggregateProcessingError, ApiError, ErrorKind, ErrorRecord, classify};
pub use events::{ChannelSink, Event, EventSink, NoopSink, TracingSink};
pub use executor::{
    ExecutorConfig, RateLimitPolicy, RateLimitState, RequestExecutor, RetryDecision, RetryPolicy,
};
pub use http::{HttpPageSource, HttpSourceConfig};
pub use paginate::{
    Checkpoint, Page, PageRequest, PageSource, PageStream, PaginatedFetcher, PaginationConfig,
};
pub use processor::{
    ConcurrentProcessor, ProcessedStream, ProcessingStats, ProcessorConfig, ProcessorError,
};
pub use queue::{BoundedQueue, QueueClosed, QueueError, TryEnqueueError};
pub use resume::{ResumeLedger, ResumePoint, Tracked, TrackedSource};
pub use shutdown::Shutdown;
