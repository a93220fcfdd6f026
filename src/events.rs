//! Fire-and-forget event reporting.
//!
//! The core reports rate-limit hits, page progress and item failures through
//! an [`EventSink`]. Sinks never block and never fail into the caller.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ErrorRecord;

/// Event type for a rate-limit response.
pub const RATE_LIMIT_HIT: &str = "rate_limit.hit";
/// Event type for a fetched page.
pub const FETCH_PAGE: &str = "fetch.page";
/// Event type for a failed item transform.
pub const PROCESSOR_ITEM_FAILED: &str = "processor.item_failed";
/// Event type for a finished processor run.
pub const PROCESSOR_COMPLETED: &str = "processor.completed";

/// A typed notification with a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Dotted event type, e.g. `rate_limit.hit`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event-specific fields.
    pub payload: Map<String, Value>,
}

impl Event {
    /// Creates an event from a type and a JSON object payload.
    ///
    /// Non-object payloads are stored under a `value` key.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// A rate-limit hit observed by `operation`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn rate_limit_hit(operation: &str, retry_after: Duration, retries: u32) -> Self {
        Self::new(
            RATE_LIMIT_HIT,
            json!({
                "operation": operation,
                "retry_after_secs": retry_after.as_secs(),
                "retry_after_ms": retry_after.as_millis() as u64,
                "retries": retries,
            }),
        )
    }

    /// A page fetched by the paginator.
    pub fn fetch_page(
        page: u64,
        items: usize,
        total_items: u64,
        has_more: bool,
        next_cursor: Option<&str>,
    ) -> Self {
        Self::new(
            FETCH_PAGE,
            json!({
                "page": page,
                "items": items,
                "total_items": total_items,
                "has_more": has_more,
                "next_cursor": next_cursor,
            }),
        )
    }

    /// A transform failure inside the processor.
    pub fn item_failed(item_index: usize, record: &ErrorRecord) -> Self {
        Self::new(
            PROCESSOR_ITEM_FAILED,
            json!({
                "item_index": item_index,
                "kind": record.kind().as_str(),
                "message": record.message(),
            }),
        )
    }

    /// A finished processor run.
    pub fn processor_completed(processed: u64, errors: usize) -> Self {
        Self::new(
            PROCESSOR_COMPLETED,
            json!({
                "processed": processed,
                "errors": errors,
            }),
        )
    }

    /// Returns a payload field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// Receiver of pipeline events.
///
/// Implementations must return quickly and must not panic.
pub trait EventSink: Send + Sync {
    /// Delivers one event.
    fn send(&self, event: Event);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn send(&self, _event: Event) {}
}

/// Logs every event at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn send(&self, event: Event) {
        debug!(
            event_type = %event.event_type,
            payload = %serde_json::Value::Object(event.payload),
            "event"
        );
    }
}

/// Forwards events to an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    /// Creates a sink and the receiver that observes its events.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn send(&self, event: Event) {
        // Receiver gone: nobody is listening any more.
        let _ = self.tx.send(event);
    }
}
