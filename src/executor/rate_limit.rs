//! Rate-limit state shared by every operation of one executor.
//!
//! When the remote end answers with a rate-limit failure, the executor
//! records a [`RateLimitState`] here. Later attempts, from this caller or any
//! other caller sharing the executor, consult it and wait for the window to
//! reset before hitting the API again. The state is cleared by the first
//! successful operation observed after `reset_at` has passed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::{DEFAULT_RATE_LIMIT_RETRY_AFTER, MAX_RETRY_AFTER};

/// Warning threshold for cumulative rate-limit waiting (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Snapshot of the most recent rate-limit observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    /// Requests left in the current window (always 0 after a hit).
    pub remaining: u32,
    /// When the remote window is expected to reset.
    pub reset_at: Instant,
    /// The wait applied after the hit, in whole seconds.
    pub retry_after_secs: u64,
}

impl RateLimitState {
    /// Whether the remote window has reset at `now`.
    #[must_use]
    pub fn is_reset(&self, now: Instant) -> bool {
        now >= self.reset_at
    }
}

/// How the executor reacts to rate-limit failures.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    /// The wait used when the failure carries no retry hint.
    pub default_retry_after: Duration,
    /// Ceiling on consecutive rate-limit retries for one operation.
    ///
    /// `None` retries until the remote end recovers (or shutdown).
    pub max_retries: Option<u32>,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            default_retry_after: DEFAULT_RATE_LIMIT_RETRY_AFTER,
            max_retries: None,
        }
    }
}

impl RateLimitPolicy {
    /// Creates a policy that gives up after `max_retries` consecutive hits.
    #[must_use]
    pub fn capped(max_retries: u32) -> Self {
        Self {
            max_retries: Some(max_retries),
            ..Self::default()
        }
    }

    /// Whether another retry is allowed after `retries` rate-limit retries.
    #[must_use]
    pub fn allows_retry(&self, retries: u32) -> bool {
        self.max_retries.is_none_or(|max| retries < max)
    }
}

/// Mutex-guarded [`RateLimitState`] plus hit statistics.
#[derive(Debug, Default)]
pub(crate) struct RateLimitTracker {
    state: Mutex<Option<RateLimitState>>,
    hits: AtomicU64,
    cumulative_delay_ms: AtomicU64,
}

impl RateLimitTracker {
    /// Records a rate-limit hit and returns the new state.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn record_hit(&self, retry_after: Duration) -> RateLimitState {
        let state = RateLimitState {
            remaining: 0,
            reset_at: Instant::now() + retry_after,
            retry_after_secs: retry_after.as_secs(),
        };
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state);

        self.hits.fetch_add(1, Ordering::Relaxed);
        let delay_ms = retry_after.as_millis() as u64;
        let previous = self.cumulative_delay_ms.fetch_add(delay_ms, Ordering::Relaxed);
        let cumulative = Duration::from_millis(previous + delay_ms);
        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD
            && Duration::from_millis(previous) < CUMULATIVE_DELAY_WARNING_THRESHOLD
        {
            warn!(
                cumulative_secs = cumulative.as_secs(),
                "cumulative rate limit delay exceeded 30 seconds"
            );
        }
        state
    }

    /// Returns the current state, if a hit is being tracked.
    pub(crate) fn snapshot(&self) -> Option<RateLimitState> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the reset instant while the window is still closed.
    pub(crate) fn pending_reset(&self) -> Option<Instant> {
        self.snapshot()
            .filter(|state| !state.is_reset(Instant::now()))
            .map(|state| state.reset_at)
    }

    /// Clears the state once its reset instant has passed. Returns whether
    /// anything was cleared.
    pub(crate) fn clear_if_reset(&self) -> bool {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *guard {
            Some(state) if state.is_reset(Instant::now()) => {
                *guard = None;
                debug!("rate limit window reset, state cleared");
                true
            }
            _ => false,
        }
    }

    /// Total hits recorded.
    pub(crate) fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

/// Parses a Retry-After value to a [`Duration`].
///
/// Supports two formats per RFC 7231:
/// - Integer seconds: `"120"` → 120 seconds
/// - HTTP-date: `"Wed, 21 Oct 2026 07:28:00 GMT"` → duration until that time
///
/// Values exceeding 1 hour are capped at 1 hour. Dates in the past give
/// [`Duration::ZERO`].
///
/// # Returns
///
/// - `Some(Duration)` for valid values
/// - `None` for negative, empty or unparseable values
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use streamfetch::executor::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument(level = "trace")]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(cap_retry_after(duration));
    }

    if let Ok(datetime) = httpdate::parse_http_date(value) {
        match datetime.duration_since(std::time::SystemTime::now()) {
            Ok(duration) => Some(cap_retry_after(duration)),
            Err(_) => {
                debug!(value, "Retry-After date is in the past, returning zero");
                Some(Duration::ZERO)
            }
        }
    } else {
        debug!(value, "unparseable Retry-After value");
        None
    }
}

fn cap_retry_after(duration: Duration) -> Duration {
    if duration > MAX_RETRY_AFTER {
        warn!(
            delay_secs = duration.as_secs(),
            max_secs = MAX_RETRY_AFTER.as_secs(),
            "Retry-After exceeds maximum, capping at 1 hour"
        );
        return MAX_RETRY_AFTER;
    }
    duration
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== RateLimitTracker Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_record_hit_sets_state() {
        let tracker = RateLimitTracker::default();
        assert!(tracker.snapshot().is_none());

        let state = tracker.record_hit(Duration::from_secs(5));
        assert_eq!(state.remaining, 0);
        assert_eq!(state.retry_after_secs, 5);
        assert_eq!(tracker.snapshot(), Some(state));
        assert_eq!(tracker.hits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_reset_until_window_passes() {
        let tracker = RateLimitTracker::default();
        let state = tracker.record_hit(Duration::from_secs(2));

        assert_eq!(tracker.pending_reset(), Some(state.reset_at));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(tracker.pending_reset(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_if_reset_only_after_reset_at() {
        let tracker = RateLimitTracker::default();
        tracker.record_hit(Duration::from_secs(3));

        assert!(!tracker.clear_if_reset());
        assert!(tracker.snapshot().is_some());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(tracker.clear_if_reset());
        assert!(tracker.snapshot().is_none());
        assert!(!tracker.clear_if_reset());
    }

    #[test]
    fn test_policy_default_unbounded() {
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.default_retry_after, Duration::from_secs(60));
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(10_000));
    }

    #[test]
    fn test_policy_capped() {
        let policy = RateLimitPolicy::capped(2);
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(1));
        assert!(!policy.allows_retry(2));
    }

    // ==================== parse_retry_after Tests ====================

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_retry_after_zero() {
        assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_negative() {
        assert_eq!(parse_retry_after("-5"), None);
    }

    #[test]
    fn test_parse_retry_after_invalid() {
        assert_eq!(parse_retry_after("invalid"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    #[test]
    fn test_parse_retry_after_whitespace() {
        assert_eq!(parse_retry_after("  120  "), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_retry_after_caps_at_one_hour() {
        assert_eq!(parse_retry_after("7200"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_retry_after("3600"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_parse_retry_after_http_date_past() {
        let past_date = "Wed, 01 Jan 2020 00:00:00 GMT";
        assert_eq!(parse_retry_after(past_date), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_http_date_future() {
        let future_time = std::time::SystemTime::now() + Duration::from_secs(60);
        let future_date = httpdate::fmt_http_date(future_time);

        let duration = parse_retry_after(&future_date).unwrap();
        assert!(
            duration >= Duration::from_secs(55) && duration <= Duration::from_secs(65),
            "Duration should be ~60s, got {duration:?}"
        );
    }
}
