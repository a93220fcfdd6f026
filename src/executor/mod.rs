//! Single-operation execution with timeout, retry and rate-limit recovery.
//!
//! [`RequestExecutor::execute`] runs one remote call to completion:
//!
//! - every attempt is bounded by a timeout (timeouts classify as `Network`)
//! - rate-limit failures wait for the server's hint and retry without
//!   consuming an attempt
//! - transient failures back off exponentially up to the attempt ceiling
//! - everything else fails immediately with a classified [`ErrorRecord`]
//!
//! # Example
//!
//! ```no_run
//! use streamfetch::{ApiError, RequestExecutor};
//!
//! # async fn example() -> Result<(), streamfetch::ErrorRecord> {
//! let executor = RequestExecutor::default();
//! let body = executor
//!     .execute("ping", || async { Ok::<_, ApiError>("pong") })
//!     .await?;
//! assert_eq!(body, "pong");
//! # Ok(())
//! # }
//! ```

mod constants;
mod rate_limit;
mod retry;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

pub use constants::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, DEFAULT_RATE_LIMIT_RETRY_AFTER,
    DEFAULT_TIMEOUT, MAX_RETRY_AFTER,
};
pub use rate_limit::{RateLimitPolicy, RateLimitState, parse_retry_after};
pub use retry::{RetryDecision, RetryPolicy};

use rate_limit::RateLimitTracker;

use crate::error::{ApiError, ErrorKind, ErrorRecord, classify};
use crate::events::{Event, EventSink, NoopSink};
use crate::shutdown::Shutdown;

/// Executor settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Deadline applied to each attempt.
    pub timeout: Duration,
    /// Backoff for transient failures.
    pub retry: RetryPolicy,
    /// Reaction to rate-limit failures.
    pub rate_limit: RateLimitPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            rate_limit: RateLimitPolicy::default(),
        }
    }
}

/// Runs remote operations with timeout, retry and rate-limit handling.
///
/// One executor owns one [`RateLimitState`]; share it (behind an `Arc`)
/// between all callers that talk to the same rate-limited API so a limit
/// observed by one caller holds back the others.
pub struct RequestExecutor {
    config: ExecutorConfig,
    rate_limit: RateLimitTracker,
    events: Arc<dyn EventSink>,
    shutdown: Shutdown,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("config", &self.config)
            .field("rate_limit", &self.rate_limit)
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

impl Default for RequestExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl RequestExecutor {
    /// Creates an executor with no event sink and its own shutdown signal.
    #[must_use]
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            rate_limit: RateLimitTracker::default(),
            events: Arc::new(NoopSink),
            shutdown: Shutdown::new(),
        }
    }

    /// Sends `rate_limit.hit` events to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Makes every wait of this executor observe `shutdown`.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Returns the executor settings.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Returns the shutdown signal observed by this executor.
    #[must_use]
    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Returns a snapshot of the current rate-limit state, if any.
    #[must_use]
    pub fn rate_limit_state(&self) -> Option<RateLimitState> {
        self.rate_limit.snapshot()
    }

    /// Total rate-limit hits observed by this executor.
    #[must_use]
    pub fn rate_limit_hits(&self) -> u64 {
        self.rate_limit.hits()
    }

    /// Runs `op` until it succeeds or fails terminally.
    ///
    /// `op` is called once per attempt. The returned error carries the
    /// `operation` name and the number of `attempts` made as context.
    ///
    /// # Errors
    ///
    /// - the classified failure of the last attempt when it is not
    ///   retryable or the attempt ceiling is exhausted
    /// - a `RateLimited` record when the optional rate-limit cap is reached
    /// - a `Cancelled` record when shutdown is requested
    #[instrument(level = "debug", skip_all, fields(operation = %operation))]
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, ErrorRecord>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt: u32 = 1;
        let mut rate_limit_retries: u32 = 0;
        let mut calls: u32 = 0;

        loop {
            if self.shutdown.is_triggered() {
                return Err(ErrorRecord::cancelled(operation).with_context("attempts", calls));
            }

            if let Some(reset_at) = self.rate_limit.pending_reset() {
                debug!(
                    wait_ms = reset_at.saturating_duration_since(Instant::now()).as_millis(),
                    "waiting for rate limit window to reset"
                );
                self.wait_until(reset_at, operation, calls).await?;
            }

            calls += 1;
            let outcome = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    return Err(ErrorRecord::cancelled(operation).with_context("attempts", calls));
                }
                outcome = tokio::time::timeout(self.config.timeout, op()) => outcome,
            };

            let error = match outcome {
                Ok(Ok(value)) => {
                    self.rate_limit.clear_if_reset();
                    debug!(attempts = calls, "operation succeeded");
                    return Ok(value);
                }
                Ok(Err(error)) => error,
                Err(_elapsed) => ApiError::timeout(operation, self.config.timeout),
            };

            let kind = classify(&error);

            if kind == ErrorKind::RateLimited {
                if !self.config.rate_limit.allows_retry(rate_limit_retries) {
                    warn!(
                        retries = rate_limit_retries,
                        "rate limit retries exhausted"
                    );
                    return Err(self.failure(error, operation, calls));
                }

                let wait = error
                    .retry_after()
                    .unwrap_or(self.config.rate_limit.default_retry_after);
                self.rate_limit.record_hit(wait);
                rate_limit_retries += 1;

                warn!(
                    delay_ms = wait.as_millis(),
                    retries = rate_limit_retries,
                    "rate limited, waiting before retry"
                );
                self.events
                    .send(Event::rate_limit_hit(operation, wait, rate_limit_retries));

                self.wait_for(wait, operation, calls).await?;
                continue;
            }

            match self.config.retry.should_retry(kind, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    info!(
                        attempt,
                        next_attempt = next,
                        delay_ms = delay.as_millis(),
                        %kind,
                        error = %error,
                        "transient failure, retrying"
                    );
                    self.wait_for(delay, operation, calls).await?;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    if kind.is_transient() {
                        warn!(attempts = calls, %kind, %reason, "giving up");
                    } else {
                        debug!(%kind, %reason, "not retrying");
                    }
                    return Err(self.failure(error, operation, calls));
                }
            }
        }
    }

    fn failure(&self, error: ApiError, operation: &str, calls: u32) -> ErrorRecord {
        let record = ErrorRecord::from(error)
            .with_context("operation", operation)
            .with_context("attempts", calls);
        debug!(error = %record, timeout_ms = self.config.timeout.as_millis(), "operation failed");
        record
    }

    async fn wait_for(&self, delay: Duration, operation: &str, calls: u32) -> Result<(), ErrorRecord> {
        self.wait_until(Instant::now() + delay, operation, calls).await
    }

    async fn wait_until(
        &self,
        deadline: Instant,
        operation: &str,
        calls: u32,
    ) -> Result<(), ErrorRecord> {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => {
                Err(ErrorRecord::cancelled(operation).with_context("attempts", calls))
            }
            () = tokio::time::sleep_until(deadline) => Ok(()),
        }
    }
}
