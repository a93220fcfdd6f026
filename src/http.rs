//! Cursor-paginated JSON API over HTTP.
//!
//! [`HttpPageSource`] issues `GET <base>?<cursor_param>=<cursor>&<page_size_param>=<n>`
//! and decodes the common list-response shape into a [`Page`] of raw JSON
//! values. Every failure is reported as an [`ApiError`] so the executor can
//! classify it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use crate::error::ApiError;
use crate::paginate::{Page, PageRequest, PageSource};
use crate::user_agent::default_user_agent;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default query parameter carrying the cursor.
pub const DEFAULT_CURSOR_PARAM: &str = "start_cursor";

/// Default query parameter carrying the page size.
pub const DEFAULT_PAGE_SIZE_PARAM: &str = "page_size";

/// Settings for [`HttpPageSource`].
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// Query parameter name for the cursor.
    pub cursor_param: String,
    /// Query parameter name for the page size.
    pub page_size_param: String,
    /// Bearer token sent in the `Authorization` header.
    pub bearer_token: Option<String>,
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout enforced by the HTTP client, if any.
    pub request_timeout: Option<Duration>,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            cursor_param: DEFAULT_CURSOR_PARAM.to_string(),
            page_size_param: DEFAULT_PAGE_SIZE_PARAM.to_string(),
            bearer_token: None,
            connect_timeout: CONNECT_TIMEOUT,
            request_timeout: None,
        }
    }
}

/// Error body shape used by most JSON APIs.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// Page source for a cursor-paginated JSON endpoint.
#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: Client,
    base_url: Url,
    config: HttpSourceConfig,
}

impl HttpPageSource {
    /// Creates a source for `base_url`.
    ///
    /// # Errors
    ///
    /// - [`ApiError::InvalidUrl`] when `base_url` is not an absolute http(s) URL
    /// - [`ApiError::Network`] when the HTTP client cannot be built
    pub fn new(base_url: &str, config: HttpSourceConfig) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url).map_err(|_| ApiError::invalid_url(base_url))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ApiError::invalid_url(base_url.as_str()));
        }

        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .gzip(true);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ApiError::network(base_url.as_str(), e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds the URL for one page, keeping any query the base URL already has.
    #[must_use]
    pub fn page_url(&self, request: &PageRequest) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut query = url.query_pairs_mut();
            if let Some(cursor) = &request.cursor {
                query.append_pair(&self.config.cursor_param, cursor);
            }
            query.append_pair(&self.config.page_size_param, &request.page_size.to_string());
        }
        url
    }

    #[instrument(level = "debug", skip_all, fields(cursor = ?request.cursor))]
    async fn get_page(&self, request: &PageRequest) -> Result<Page<Value>, ApiError> {
        let url = self.page_url(request);

        let mut builder = self
            .client
            .get(url.clone())
            .header(USER_AGENT, default_user_agent());
        if let Some(token) = &self.config.bearer_token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::timeout(
                    "fetch_page",
                    self.config
                        .request_timeout
                        .unwrap_or(self.config.connect_timeout),
                )
            } else {
                ApiError::network(url.as_str(), e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(std::string::ToString::to_string);
            let body = response.text().await.unwrap_or_default();
            let (code, message) = parse_error_body(&body);
            debug!(status = status.as_u16(), ?code, "page request failed");
            return Err(ApiError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
                code,
                message,
                retry_after,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::network(url.as_str(), e.to_string()))?;
        serde_json::from_slice::<Page<Value>>(&bytes)
            .map_err(|e| ApiError::decode(url.as_str(), e.to_string()))
    }
}

fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => (parsed.code, parsed.message),
        Err(_) => (None, None),
    }
}

#[async_trait]
impl PageSource<Value> for HttpPageSource {
    async fn fetch_page(&self, request: PageRequest) -> Result<Page<Value>, ApiError> {
        self.get_page(&request).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn source(base: &str) -> HttpPageSource {
        HttpPageSource::new(base, HttpSourceConfig::default()).unwrap()
    }

    #[test]
    fn test_page_url_first_page_has_no_cursor() {
        let url = source("https://api.example.com/v1/items").page_url(&PageRequest {
            cursor: None,
            page_size: 50,
        });
        assert_eq!(url.as_str(), "https://api.example.com/v1/items?page_size=50");
    }

    #[test]
    fn test_page_url_keeps_existing_query() {
        let url = source("https://api.example.com/v1/items?filter=open").page_url(&PageRequest {
            cursor: Some("abc def".to_string()),
            page_size: 10,
        });
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v1/items?filter=open&start_cursor=abc+def&page_size=10"
        );
    }

    #[test]
    fn test_custom_param_names() {
        let config = HttpSourceConfig {
            cursor_param: "after".to_string(),
            page_size_param: "limit".to_string(),
            ..HttpSourceConfig::default()
        };
        let url = HttpPageSource::new("http://localhost/list", config)
            .unwrap()
            .page_url(&PageRequest {
                cursor: Some("c1".to_string()),
                page_size: 5,
            });
        assert_eq!(url.query(), Some("after=c1&limit=5"));
    }

    #[test]
    fn test_invalid_urls_rejected() {
        for bad in ["not a url", "ftp://example.com/list", "/relative/path"] {
            let error = HttpPageSource::new(bad, HttpSourceConfig::default()).unwrap_err();
            assert!(matches!(error, ApiError::InvalidUrl { .. }), "{bad}: {error}");
        }
    }

    #[test]
    fn test_parse_error_body() {
        assert_eq!(
            parse_error_body(r#"{"code":"rate_limited","message":"slow down"}"#),
            (Some("rate_limited".to_string()), Some("slow down".to_string()))
        );
        assert_eq!(parse_error_body("<html>oops</html>"), (None, None));
        assert_eq!(parse_error_body(""), (None, None));
    }
}
