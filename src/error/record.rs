//! Classified, immutable error records and their aggregate.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::{ApiError, ErrorKind, classify};

/// A classified failure with its context.
///
/// Records are built once (the `with_*` methods consume `self`) and are
/// cheap to clone, so the same record can be logged, sent as an event and
/// aggregated.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    kind: ErrorKind,
    message: String,
    cause: Option<Arc<dyn StdError + Send + Sync>>,
    context: BTreeMap<String, String>,
}

impl ErrorRecord {
    /// Creates a record without a cause.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            context: BTreeMap::new(),
        }
    }

    /// Creates a record for an operation abandoned by shutdown.
    pub fn cancelled(operation: &str) -> Self {
        Self::new(ErrorKind::Cancelled, format!("{operation} cancelled by shutdown"))
            .with_context("operation", operation)
    }

    /// Wraps an arbitrary error, keeping it as the cause.
    pub fn from_error<E>(kind: ErrorKind, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::new(kind, error.to_string()).with_cause(error)
    }

    /// Attaches the underlying cause.
    #[must_use]
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Adds a context entry, replacing any previous value for `key`.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// The classified kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The underlying cause, if one was attached.
    #[must_use]
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// All context entries, ordered by key.
    #[must_use]
    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    /// A single context value.
    #[must_use]
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl StdError for ErrorRecord {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_deref().map(|cause| cause as &(dyn StdError + 'static))
    }
}

impl From<ApiError> for ErrorRecord {
    fn from(error: ApiError) -> Self {
        let kind = classify(&error);
        let mut record = Self::new(kind, error.to_string());
        if let Some(status) = error.status() {
            record = record.with_context("status", status);
        }
        if let Some(code) = error.code() {
            record = record.with_context("code", code);
        }
        record.with_cause(error)
    }
}

/// Every failure recorded while a processed stream was running.
///
/// Surfaces only after the output stream has been drained; the items that
/// succeeded have already been delivered.
#[derive(Debug, Clone, Error)]
#[error("{} item(s) failed during processing ({})", .errors.len(), summarize_kinds(.errors))]
pub struct AggregateProcessingError {
    errors: Vec<ErrorRecord>,
}

fn summarize_kinds(errors: &[ErrorRecord]) -> String {
    let mut counts: BTreeMap<ErrorKind, usize> = BTreeMap::new();
    for record in errors {
        *counts.entry(record.kind()).or_default() += 1;
    }
    counts
        .iter()
        .map(|(kind, count)| format!("{kind}={count}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl AggregateProcessingError {
    /// Wraps the recorded failures.
    #[must_use]
    pub fn new(errors: Vec<ErrorRecord>) -> Self {
        Self { errors }
    }

    /// The recorded failures, in the order they were recorded.
    #[must_use]
    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    /// Consumes the aggregate, returning the records.
    #[must_use]
    pub fn into_errors(self) -> Vec<ErrorRecord> {
        self.errors
    }

    /// Number of recorded failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether no failure was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Failure counts grouped by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> BTreeMap<ErrorKind, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.errors {
            *counts.entry(record.kind()).or_default() += 1;
        }
        counts
    }
}
