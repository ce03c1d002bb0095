//! Shared HTTP plumbing for fetchers
//!
//! Wraps a `reqwest::Client` with the request timeout and headers every source
//! uses, and maps responses onto the [`FetchError`] classification.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{FetchError, FetchResult, MAX_RETRY_AFTER};

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client used by the bundled fetchers
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with the default timeout and headers
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(default_headers())
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    /// Creates a client around a preconfigured `reqwest::Client`
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// GETs `url` and decodes the JSON body
    ///
    /// # Returns
    /// * `Ok(T)` on a success status with a decodable body
    /// * `Err(FetchError::RateLimited)` on 429
    /// * `Err(FetchError::Http)` on any other non-success status
    /// * `Err(FetchError::Network)` on transport failure or an undecodable body
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> FetchResult<T> {
        debug!(url, "sending request");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        if let Some(err) = classify_status(response.status(), response.headers(), Utc::now()) {
            return Err(err);
        }

        let text = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        serde_json::from_str(&text)
            .map_err(|e| FetchError::Network(format!("invalid response body: {e}")))
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("livepoll/", env!("CARGO_PKG_VERSION"))),
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers
}

/// Maps a response status onto a fetch error, or `None` for success
pub fn classify_status(
    status: StatusCode,
    headers: &HeaderMap,
    now: DateTime<Utc>,
) -> Option<FetchError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| parse_retry_after(value, now));
        return Some(FetchError::RateLimited { retry_after });
    }

    if !status.is_success() {
        return Some(FetchError::Http(status.as_u16()));
    }

    None
}

/// Parses a `Retry-After` value given either as delta-seconds or as an HTTP date
///
/// Dates in the past yield a zero wait; waits longer than [`MAX_RETRY_AFTER`]
/// are capped.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs).min(MAX_RETRY_AFTER));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO).min(MAX_RETRY_AFTER))
}
