//! Mapping of raw API failures onto the fixed error taxonomy.

use std::fmt;

use tracing::instrument;

use super::ApiError;

/// Classified failure kinds.
///
/// Everything the core branches on is one of these; loosely-typed remote
/// error shapes never travel past [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// Missing or rejected credentials.
    Unauthorized,
    /// The addressed resource does not exist.
    NotFound,
    /// The request was malformed or rejected by validation.
    Validation,
    /// The request conflicts with the current remote state.
    Conflict,
    /// The remote end failed while handling the request.
    ServerError,
    /// The remote end is temporarily unable to serve requests.
    ServiceUnavailable,
    /// Transport failure or timeout.
    Network,
    /// The remote end asked the client to slow down.
    RateLimited,
    /// Anything that does not map to a known kind.
    Unknown,
    /// The operation was abandoned because shutdown was requested.
    ///
    /// Never produced by [`classify`]; only by the shutdown signal.
    Cancelled,
}

impl ErrorKind {
    /// Returns the stable snake_case label used in logs and events.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::ServerError => "server_error",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Network => "network",
            Self::RateLimited => "rate_limited",
            Self::Unknown => "unknown",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether exponential-backoff retries may help.
    ///
    /// `RateLimited` is recovered separately (wait for the server's hint) and
    /// is not part of this set.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Network | Self::ServerError | Self::ServiceUnavailable
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a raw API failure.
///
/// A known error code takes precedence over the HTTP status; unknown codes
/// fall back to the status, and anything unmapped is [`ErrorKind::Unknown`].
///
/// # HTTP Status Classification
///
/// | Status | Kind |
/// |--------|------|
/// | 400, 413, 422 | Validation |
/// | 401, 403, 407 | Unauthorized |
/// | 404, 410 | NotFound |
/// | 408 | Network |
/// | 409 | Conflict |
/// | 429 | RateLimited |
/// | 500, 502, other 5xx | ServerError |
/// | 503, 504 | ServiceUnavailable |
/// | other | Unknown |
#[instrument(level = "trace")]
pub fn classify(error: &ApiError) -> ErrorKind {
    if let Some(kind) = error.code().and_then(classify_code) {
        return kind;
    }

    match error {
        ApiError::HttpStatus { status, .. } => classify_status(*status),
        ApiError::Timeout { .. } | ApiError::Network { .. } => ErrorKind::Network,
        ApiError::Api { .. } | ApiError::Decode { .. } | ApiError::InvalidUrl { .. } => {
            ErrorKind::Unknown
        }
    }
}

fn classify_code(code: &str) -> Option<ErrorKind> {
    let kind = match code {
        "unauthorized" | "restricted_resource" => ErrorKind::Unauthorized,
        "object_not_found" | "not_found" => ErrorKind::NotFound,
        "validation_error" | "invalid_json" | "invalid_request" | "invalid_request_url" => {
            ErrorKind::Validation
        }
        "conflict_error" | "conflict" => ErrorKind::Conflict,
        "rate_limited" => ErrorKind::RateLimited,
        "internal_server_error" => ErrorKind::ServerError,
        "service_unavailable" | "gateway_timeout" => ErrorKind::ServiceUnavailable,
        _ => return None,
    };
    Some(kind)
}

#[allow(clippy::match_same_arms)]
fn classify_status(status: u16) -> ErrorKind {
    match status {
        400 => ErrorKind::Validation,   // Bad Request
        401 => ErrorKind::Unauthorized, // Unauthorized
        403 => ErrorKind::Unauthorized, // Forbidden
        404 => ErrorKind::NotFound,     // Not Found
        407 => ErrorKind::Unauthorized, // Proxy Authentication Required
        408 => ErrorKind::Network,      // Request Timeout
        409 => ErrorKind::Conflict,     // Conflict
        410 => ErrorKind::NotFound,     // Gone
        413 => ErrorKind::Validation,   // Payload Too Large
        422 => ErrorKind::Validation,   // Unprocessable Entity
        429 => ErrorKind::RateLimited,  // Too Many Requests

        500 => ErrorKind::ServerError,        // Internal Server Error
        502 => ErrorKind::ServerError,        // Bad Gateway
        503 => ErrorKind::ServiceUnavailable, // Service Unavailable
        504 => ErrorKind::ServiceUnavailable, // Gateway Timeout

        status if (500..600).contains(&status) => ErrorKind::ServerError,

        _ => ErrorKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn status(code: u16) -> ErrorKind {
        classify(&ApiError::http_status("https://api.example.com", code))
    }

    #[test]
    fn test_classify_client_statuses() {
        assert_eq!(status(400), ErrorKind::Validation);
        assert_eq!(status(401), ErrorKind::Unauthorized);
        assert_eq!(status(403), ErrorKind::Unauthorized);
        assert_eq!(status(404), ErrorKind::NotFound);
        assert_eq!(status(409), ErrorKind::Conflict);
        assert_eq!(status(410), ErrorKind::NotFound);
        assert_eq!(status(422), ErrorKind::Validation);
    }

    #[test]
    fn test_classify_429_rate_limited() {
        assert_eq!(status(429), ErrorKind::RateLimited);
    }

    #[test]
    fn test_classify_server_statuses() {
        assert_eq!(status(500), ErrorKind::ServerError);
        assert_eq!(status(502), ErrorKind::ServerError);
        assert_eq!(status(503), ErrorKind::ServiceUnavailable);
        assert_eq!(status(504), ErrorKind::ServiceUnavailable);
        assert_eq!(status(599), ErrorKind::ServerError);
    }

    #[test]
    fn test_classify_unmapped_status_unknown() {
        assert_eq!(status(418), ErrorKind::Unknown);
        assert_eq!(status(302), ErrorKind::Unknown);
        assert_eq!(status(0), ErrorKind::Unknown);
    }

    #[test]
    fn test_classify_timeout_and_network() {
        let timeout = ApiError::timeout("op", Duration::from_secs(30));
        assert_eq!(classify(&timeout), ErrorKind::Network);
        assert_eq!(status(408), ErrorKind::Network);

        let network = ApiError::network("https://api.example.com", "connection refused");
        assert_eq!(classify(&network), ErrorKind::Network);
    }

    #[test]
    fn test_classify_codes() {
        let cases = [
            ("unauthorized", ErrorKind::Unauthorized),
            ("restricted_resource", ErrorKind::Unauthorized),
            ("object_not_found", ErrorKind::NotFound),
            ("validation_error", ErrorKind::Validation),
            ("invalid_json", ErrorKind::Validation),
            ("conflict_error", ErrorKind::Conflict),
            ("rate_limited", ErrorKind::RateLimited),
            ("internal_server_error", ErrorKind::ServerError),
            ("service_unavailable", ErrorKind::ServiceUnavailable),
            ("something_new", ErrorKind::Unknown),
        ];
        for (code, expected) in cases {
            assert_eq!(classify(&ApiError::api(code, "m")), expected, "code {code}");
        }
    }

    #[test]
    fn test_known_code_wins_over_status() {
        let error = ApiError::HttpStatus {
            url: "u".to_string(),
            status: 400,
            code: Some("rate_limited".to_string()),
            message: None,
            retry_after: None,
        };
        assert_eq!(classify(&error), ErrorKind::RateLimited);
    }

    #[test]
    fn test_unknown_code_falls_back_to_status() {
        let error = ApiError::HttpStatus {
            url: "u".to_string(),
            status: 503,
            code: Some("brand_new_code".to_string()),
            message: None,
            retry_after: None,
        };
        assert_eq!(classify(&error), ErrorKind::ServiceUnavailable);
    }

    #[test]
    fn test_decode_and_invalid_url_unknown() {
        assert_eq!(classify(&ApiError::decode("u", "eof")), ErrorKind::Unknown);
        assert_eq!(classify(&ApiError::invalid_url("::")), ErrorKind::Unknown);
    }

    #[test]
    fn test_transient_kinds() {
        assert!(ErrorKind::Network.is_transient());
        assert!(ErrorKind::ServerError.is_transient());
        assert!(ErrorKind::ServiceUnavailable.is_transient());
        assert!(!ErrorKind::RateLimited.is_transient());
        assert!(!ErrorKind::NotFound.is_transient());
        assert!(!ErrorKind::Unknown.is_transient());
        assert!(!ErrorKind::Cancelled.is_transient());
    }

    #[test]
    fn test_kind_display_labels() {
        assert_eq!(ErrorKind::ServiceUnavailable.to_string(), "service_unavailable");
        assert_eq!(ErrorKind::RateLimited.to_string(), "rate_limited");
    }
}
