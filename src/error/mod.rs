//! Error taxonomy for the streaming-fetch layer.
//!
//! - [`ApiError`] - raw failures as reported by a page source or transport
//! - [`classify`] / [`ErrorKind`] - the fixed set of kinds the core branches on
//! - [`ErrorRecord`] - an immutable, classified failure with context
//! - [`AggregateProcessingError`] - every per-item failure of a processed stream

mod api;
mod classify;
mod record;

pub use api::ApiError;
pub use classify::{ErrorKind, classify};
pub use record::{AggregateProcessingError, ErrorRecord};
