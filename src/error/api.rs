//! Raw failures reported by API-binding collaborators.
//!
//! [`ApiError`] is the boundary shape: whatever the transport or the remote
//! API reports is captured here once, then converted into the fixed
//! [`ErrorKind`](super::ErrorKind) taxonomy by [`classify`](super::classify).

use std::time::Duration;

use thiserror::Error;

use crate::executor::parse_retry_after;

/// Errors produced by a single remote call, before classification.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The remote end answered with a non-success HTTP status.
    #[error("HTTP {status} from {url}{}", format_code(.code.as_deref(), .message.as_deref()))]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// Machine-readable error code from the response body, if any.
        code: Option<String>,
        /// Human-readable message from the response body, if any.
        message: Option<String>,
        /// The raw Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// The API reported an error by code without an HTTP status
    /// (SDK-style clients, embedded error objects).
    #[error("API error {code}: {message}")]
    Api {
        /// Machine-readable error code, e.g. `rate_limited`.
        code: String,
        /// Human-readable message.
        message: String,
        /// Retry-after hint in the same format as the HTTP header.
        retry_after: Option<String>,
    },

    /// The operation did not complete within its deadline.
    #[error("timeout after {}ms in {operation}", .timeout.as_millis())]
    Timeout {
        /// Name of the operation that timed out.
        operation: String,
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// Connection-level failure (DNS, refused connection, reset, TLS).
    #[error("network error calling {url}: {message}")]
    Network {
        /// The URL that could not be reached.
        url: String,
        /// Description of the transport failure.
        message: String,
    },

    /// The response arrived but could not be decoded into the expected shape.
    #[error("could not decode response from {url}: {message}")]
    Decode {
        /// The URL whose response was malformed.
        url: String,
        /// Decoder error text.
        message: String,
    },

    /// The request URL could not be built.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

fn format_code(code: Option<&str>, message: Option<&str>) -> String {
    match (code, message) {
        (Some(code), Some(message)) => format!(" ({code}: {message})"),
        (Some(code), None) => format!(" ({code})"),
        (None, Some(message)) => format!(": {message}"),
        (None, None) => String::new(),
    }
}

impl ApiError {
    /// Creates an HTTP status error with no body details.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            code: None,
            message: None,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error carrying a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            code: None,
            message: None,
            retry_after,
        }
    }

    /// Creates a code-based API error.
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
            retry_after: None,
        }
    }

    /// Creates a `rate_limited` API error with an integer-seconds hint.
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::Api {
            code: "rate_limited".to_string(),
            message: "rate limited".to_string(),
            retry_after: Some(retry_after_secs.to_string()),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Creates a network error.
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a decode error.
    pub fn decode(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Returns the HTTP status, when the failure carried one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the machine-readable error code, when the failure carried one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::HttpStatus { code, .. } => code.as_deref(),
            Self::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Returns the raw retry-after hint, if present.
    #[must_use]
    pub fn retry_after_raw(&self) -> Option<&str> {
        match self {
            Self::HttpStatus { retry_after, .. } | Self::Api { retry_after, .. } => {
                retry_after.as_deref()
            }
            _ => None,
        }
    }

    /// Returns the parsed retry-after hint, if present and valid.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_raw().and_then(parse_retry_after)
    }
}
