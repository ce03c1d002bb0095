//! Fetchers for remote data sources
//!
//! A [`Fetcher`] performs one network call for a request key and returns either a
//! typed payload or a classified [`FetchError`]. Fetchers never panic and never
//! surface transport-level detail beyond that classification; everything above
//! this module branches on the error variant only.

pub mod http;
pub mod prices;
pub mod weather;

pub use http::HttpClient;
pub use prices::{PriceFetcher, PriceQuote, PriceSnapshot};
pub use weather::{WeatherFetcher, WeatherReading};

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use thiserror::Error;

use crate::history::Sample;

/// Result of a single fetch
pub type FetchResult<T> = Result<T, FetchError>;

/// Longest retry hint a rate-limited source is allowed to impose (one day)
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Classified failure of a fetch
///
/// This is a closed set: rate limiting, transport failures, and HTTP status
/// failures. Undecodable bodies are reported as [`FetchError::Network`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The source answered 429 Too Many Requests
    #[error("429 Too Many Requests, try again after {}", describe_retry_after(.retry_after))]
    RateLimited {
        /// Advisory wait from the `Retry-After` header, if it could be parsed
        retry_after: Option<Duration>,
    },

    /// Transport failure, timeout, or a body that could not be decoded
    #[error("Network/HTTP error: {0}")]
    Network(String),

    /// Non-success HTTP status other than 429
    #[error("Network/HTTP error: status {0}")]
    Http(u16),
}

impl FetchError {
    /// Returns the advisory retry hint carried by a rate-limit error
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Short machine-readable label for the error class
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::Network(_) => "network_error",
            FetchError::Http(_) => "http_error",
        }
    }
}

fn describe_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!("{}s", wait.as_secs()),
        None => "a bit".to_string(),
    }
}

/// A source of typed payloads keyed by request identity
///
/// The request key is the resolved URL (or any string that uniquely identifies
/// the request); [`crate::cache::PollCache`] memoizes per key.
pub trait Fetcher: Send + Sync {
    /// Payload produced by a successful fetch
    type Output: Clone + Send + Sync + 'static;

    /// Performs one fetch for `key`
    fn fetch(&self, key: &str) -> BoxFuture<'_, FetchResult<Self::Output>>;

    /// Substitute payload that renderers may show while the source is failing
    ///
    /// Fallback payloads are for display only and never enter history.
    fn fallback(&self) -> Option<Self::Output> {
        None
    }

    /// Series keys this fetcher is known to produce
    ///
    /// Used to record missing-value samples for cycles that fail before any
    /// successful payload was seen.
    fn series_keys(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Converts a payload into history samples stamped at `at`
pub trait ToSamples {
    fn to_samples(&self, at: DateTime<Utc>) -> Vec<Sample>;
}

/// A [`Fetcher`] backed by an async closure
///
/// Mostly useful for injecting fake sources in tests.
pub struct FnFetcher<F, T> {
    f: F,
    fallback: Option<T>,
    series_keys: Vec<String>,
}

/// Wraps an async closure `Fn(String) -> Future<Output = FetchResult<T>>` as a fetcher
pub fn from_fn<F, Fut, T>(f: F) -> FnFetcher<F, T>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = FetchResult<T>> + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    FnFetcher {
        f,
        fallback: None,
        series_keys: Vec::new(),
    }
}

impl<F, T> FnFetcher<F, T> {
    /// Sets the fallback payload returned by [`Fetcher::fallback`]
    pub fn with_fallback(mut self, fallback: T) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Declares the series keys this fetcher produces
    pub fn with_series_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.series_keys = keys.into_iter().map(Into::into).collect();
        self
    }
}

impl<F, Fut, T> Fetcher for FnFetcher<F, T>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = FetchResult<T>> + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    type Output = T;

    fn fetch(&self, key: &str) -> BoxFuture<'_, FetchResult<T>> {
        Box::pin((self.f)(key.to_string()))
    }

    fn fallback(&self) -> Option<T> {
        self.fallback.clone()
    }

    fn series_keys(&self) -> Vec<String> {
        self.series_keys.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_message_with_retry_after() {
        let err = FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(err.to_string(), "429 Too Many Requests, try again after 30s");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert_eq!(err.kind(), "rate_limited");
    }

    #[test]
    fn test_rate_limited_message_without_retry_after() {
        let err = FetchError::RateLimited { retry_after: None };
        assert_eq!(err.to_string(), "429 Too Many Requests, try again after a bit");
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_other_errors_carry_no_retry_hint() {
        assert_eq!(FetchError::Http(503).retry_after(), None);
        assert_eq!(FetchError::Network("timed out".into()).retry_after(), None);
        assert_eq!(FetchError::Http(503).to_string(), "Network/HTTP error: status 503");
        assert_eq!(FetchError::Http(503).kind(), "http_error");
        assert_eq!(FetchError::Network("x".into()).kind(), "network_error");
    }

    #[tokio::test]
    async fn test_fn_fetcher_passes_key_through() {
        let fetcher = from_fn(|key: String| async move { Ok::<_, FetchError>(key.len()) })
            .with_series_keys(["a", "b"]);

        assert_eq!(fetcher.fetch("hello").await, Ok(5));
        assert_eq!(fetcher.series_keys(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(fetcher.fallback(), None);
    }

    #[tokio::test]
    async fn test_fn_fetcher_fallback() {
        let fetcher = from_fn(|_key: String| async move {
            Err::<u32, _>(FetchError::Http(500))
        })
        .with_fallback(7);

        assert_eq!(fetcher.fetch("k").await, Err(FetchError::Http(500)));
        assert_eq!(fetcher.fallback(), Some(7));
    }
}
