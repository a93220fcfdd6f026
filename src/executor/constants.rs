//! Defaults for the request executor (timeouts, backoff, rate limiting).

use std::time::Duration;

/// Default per-attempt timeout (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default attempt ceiling for transient failures, including the first attempt.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry (1 second).
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Cap applied to exponential backoff (10 seconds).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Wait used when a rate-limit response carries no retry hint (60 seconds).
pub const DEFAULT_RATE_LIMIT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);
