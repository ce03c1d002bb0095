//! Per-session polling state
//!
//! A [`Session`] owns everything one poller accumulates: the rolling history, the
//! result of the latest cycle, the last successful payload, and the latest error.
//! The refresh task writes to it; renderers read from it. Sessions are never
//! shared between pollers.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::fetch::{FetchError, FetchResult, ToSamples};
use crate::history::{HistoryWindow, Sample};
use crate::metrics::Metric;

/// Default history window for the price source
pub const PRICE_HISTORY_WINDOW_MINUTES: i64 = 30;

/// Default history window for the weather source
pub const WEATHER_HISTORY_WINDOW_MINUTES: i64 = 6 * 60;

/// Longest history window a session may keep (one week)
pub const MAX_HISTORY_WINDOW_MINUTES: i64 = 7 * 24 * 60;

/// A session shared between its refresh task and readers
pub type SharedSession<T> = Arc<RwLock<Session<T>>>;

/// Where the payload in a [`DisplaySnapshot`] comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// The latest cycle succeeded
    Live,
    /// The latest cycle failed; showing the last successful payload
    Stale,
    /// Nothing has succeeded yet; showing the fetcher's fallback payload
    Fallback,
    /// Nothing to show
    Empty,
}

/// What a renderer should show right now
#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySnapshot<'a, T> {
    pub data: Option<&'a T>,
    pub freshness: Freshness,
    /// Error of the latest cycle, shown alongside stale or fallback data
    pub error: Option<&'a FetchError>,
}

/// State accumulated by one poller
#[derive(Debug)]
pub struct Session<T> {
    history: HistoryWindow,
    latest: Option<FetchResult<T>>,
    last_good: Option<(T, DateTime<Utc>)>,
    fallback: Option<T>,
    known_series: Vec<String>,
    last_refreshed: Option<DateTime<Utc>>,
    cycles: u64,
}

impl<T> Session<T> {
    /// Creates an empty session whose history keeps samples newer than `window`
    pub fn new(window: Duration) -> Self {
        Self {
            history: HistoryWindow::new(window),
            latest: None,
            last_good: None,
            fallback: None,
            known_series: Vec::new(),
            last_refreshed: None,
            cycles: 0,
        }
    }

    /// Sets the payload shown while nothing has succeeded yet
    pub fn with_fallback(mut self, fallback: Option<T>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Declares series that get missing-value samples when a cycle fails
    pub fn with_series<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in keys {
            self.remember_series(key.into());
        }
        self
    }

    /// Wraps the session for sharing with a refresh task
    pub fn shared(self) -> SharedSession<T> {
        Arc::new(RwLock::new(self))
    }

    pub fn history(&self) -> &HistoryWindow {
        &self.history
    }

    /// Result of the latest cycle, possibly an error
    pub fn latest(&self) -> Option<&FetchResult<T>> {
        self.latest.as_ref()
    }

    /// Most recent successful payload and when it was recorded
    pub fn last_good(&self) -> Option<(&T, DateTime<Utc>)> {
        self.last_good.as_ref().map(|(data, at)| (data, *at))
    }

    /// Error of the latest cycle, if it failed
    pub fn last_error(&self) -> Option<&FetchError> {
        match &self.latest {
            Some(Err(err)) => Some(err),
            _ => None,
        }
    }

    /// When the latest cycle was recorded
    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.last_refreshed
    }

    /// Number of cycles recorded so far
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Series keys that are recorded every cycle, in first-seen order
    pub fn series_keys(&self) -> &[String] {
        &self.known_series
    }

    /// Payload to render and where it came from
    ///
    /// Never blank while there is anything to show: after a failure the last
    /// successful payload is returned together with the error.
    pub fn display(&self) -> DisplaySnapshot<'_, T> {
        let error = self.last_error();
        let (data, freshness) = match (&self.latest, &self.last_good, &self.fallback) {
            (Some(Ok(data)), _, _) => (Some(data), Freshness::Live),
            (_, Some((data, _)), _) => (Some(data), Freshness::Stale),
            (Some(Err(_)), None, Some(fallback)) => (Some(fallback), Freshness::Fallback),
            _ => (None, Freshness::Empty),
        };
        DisplaySnapshot { data, freshness, error }
    }

    /// Samples of one series in time order
    pub fn series<'a>(
        &'a self,
        series_key: &'a str,
    ) -> impl Iterator<Item = &'a Sample> + Clone + 'a {
        self.history.series(series_key)
    }

    /// Current value and delta of a series
    pub fn metric(&self, series_key: &str) -> Metric {
        Metric::for_series(self.history.series(series_key))
    }

    /// Current value and delta of a named secondary value of a series
    pub fn secondary_metric(&self, series_key: &str, name: &str) -> Metric {
        Metric::for_secondary(self.history.series(series_key), name)
    }

    fn remember_series(&mut self, key: String) {
        if !self.known_series.contains(&key) {
            self.known_series.push(key);
        }
    }
}

impl<T: ToSamples + Clone> Session<T> {
    /// Records the outcome of one cycle captured at `now`
    ///
    /// Appends one sample per series (missing-value samples when the cycle
    /// failed), then prunes the window with the same `now`. Callers hold the write
    /// lock for the whole call, so readers never see an unpruned window.
    ///
    /// `now` is clamped to the latest recorded timestamp so a wall clock stepping
    /// backwards cannot break the window's ordering.
    pub fn record(&mut self, result: FetchResult<T>, now: DateTime<Utc>) {
        let now = self.history.latest_timestamp().map_or(now, |latest| latest.max(now));

        let samples = match &result {
            Ok(data) => {
                let samples = data.to_samples(now);
                for sample in &samples {
                    self.remember_series(sample.series_key().to_string());
                }
                self.last_good = Some((data.clone(), now));
                samples
            }
            Err(err) => {
                warn!(error = %err, "recording failed cycle");
                self.known_series
                    .iter()
                    .map(|key| Sample::missing(now, key.as_str()))
                    .collect()
            }
        };

        for sample in samples {
            if let Err(err) = self.history.append(sample) {
                warn!(error = %err, "dropping sample");
            }
        }
        let evicted = self.history.prune(now);
        if evicted > 0 {
            debug!(evicted, "pruned history");
        }

        self.latest = Some(result);
        self.last_refreshed = Some(now);
        self.cycles += 1;
    }
}

/// Read access to a shared session
pub fn read<T>(session: &SharedSession<T>) -> RwLockReadGuard<'_, Session<T>> {
    session.read().unwrap_or_else(PoisonError::into_inner)
}

/// Write access to a shared session
pub fn write<T>(session: &SharedSession<T>) -> RwLockWriteGuard<'_, Session<T>> {
    session.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{PriceQuote, PriceSnapshot};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::time::Duration as StdDuration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 15, 12, 0, 0).unwrap()
    }

    fn snapshot(btc: Option<f64>, eth: Option<f64>) -> PriceSnapshot {
        PriceSnapshot {
            vs: "usd".to_string(),
            quotes: vec![
                PriceQuote {
                    coin: "bitcoin".to_string(),
                    price: btc,
                },
                PriceQuote {
                    coin: "ethereum".to_string(),
                    price: eth,
                },
            ],
        }
    }

    fn rate_limited() -> FetchError {
        FetchError::RateLimited {
            retry_after: Some(StdDuration::from_secs(30)),
        }
    }

    fn price_session() -> Session<PriceSnapshot> {
        Session::new(Duration::minutes(PRICE_HISTORY_WINDOW_MINUTES))
    }

    #[test]
    fn test_new_session_is_empty() {
        let session = price_session();
        let display = session.display();

        assert_eq!(display.freshness, Freshness::Empty);
        assert!(display.data.is_none());
        assert!(display.error.is_none());
        assert_eq!(session.cycles(), 0);
        assert_eq!(session.metric("bitcoin"), Metric::default());
    }

    #[test]
    fn test_record_success_appends_and_updates_metrics() {
        let mut session = price_session();

        session.record(Ok(snapshot(Some(68000.0), Some(3500.0))), t0());
        session.record(Ok(snapshot(Some(68100.0), Some(3490.0))), t0() + Duration::seconds(30));

        assert_eq!(session.history().len(), 4);
        assert_eq!(
            session.metric("bitcoin"),
            Metric {
                current: Some(68100.0),
                delta: Some(100.0)
            }
        );
        assert_eq!(session.metric("ethereum").delta, Some(-10.0));
        assert_eq!(session.display().freshness, Freshness::Live);
        assert_eq!(session.cycles(), 2);
        assert_eq!(session.last_refreshed(), Some(t0() + Duration::seconds(30)));
        assert_eq!(session.series_keys(), &["bitcoin".to_string(), "ethereum".to_string()]);
    }

    #[test]
    fn test_rate_limited_keeps_last_good_snapshot() {
        let mut session = price_session();
        session.record(Ok(snapshot(Some(68000.0), Some(3500.0))), t0());

        session.record(Err(rate_limited()), t0() + Duration::seconds(30));

        assert_eq!(session.latest(), Some(&Err(rate_limited())));
        assert_eq!(session.last_error(), Some(&rate_limited()));

        let display = session.display();
        assert_eq!(display.freshness, Freshness::Stale);
        assert_eq!(display.data, Some(&snapshot(Some(68000.0), Some(3500.0))));
        assert_eq!(display.error, Some(&rate_limited()));

        let (_, good_at) = session.last_good().expect("last good should survive");
        assert_eq!(good_at, t0());
    }

    #[test]
    fn test_failed_cycle_records_missing_values_for_known_series() {
        let mut session = price_session();
        session.record(Ok(snapshot(Some(68000.0), Some(3500.0))), t0());
        session.record(Err(FetchError::Http(503)), t0() + Duration::seconds(30));

        let values: Vec<Option<f64>> = session.series("bitcoin").map(Sample::value).collect();
        assert_eq!(values, vec![Some(68000.0), None]);
        assert_eq!(session.metric("bitcoin"), Metric::default());
    }

    #[test]
    fn test_failed_cycle_before_any_success_uses_declared_series() {
        let mut session = price_session().with_series(["bitcoin"]);
        session.record(Err(FetchError::Http(500)), t0());

        assert_eq!(session.series("bitcoin").count(), 1);
        assert_eq!(session.series("ethereum").count(), 0);
    }

    #[test]
    fn test_failed_cycle_with_no_known_series_appends_nothing() {
        let mut session = price_session();
        session.record(Err(FetchError::Network("timed out".into())), t0());

        assert!(session.history().is_empty());
        assert_eq!(session.cycles(), 1);
        assert_eq!(session.display().freshness, Freshness::Empty);
    }

    #[test]
    fn test_fallback_shown_until_first_success() {
        let fallback = snapshot(Some(68000.0), Some(3500.0));
        let mut session = price_session().with_fallback(Some(fallback.clone()));

        assert_eq!(session.display().freshness, Freshness::Empty);

        session.record(Err(rate_limited()), t0());
        let display = session.display();
        assert_eq!(display.freshness, Freshness::Fallback);
        assert_eq!(display.data, Some(&fallback));
        assert_eq!(display.error, Some(&rate_limited()));

        // Fallback values never enter history
        assert_eq!(session.history().len(), 0);

        session.record(Ok(snapshot(Some(1.0), Some(2.0))), t0() + Duration::seconds(30));
        assert_eq!(session.display().freshness, Freshness::Live);
    }

    #[test]
    fn test_record_prunes_with_cycle_time() {
        let mut session = price_session();
        session.record(Ok(snapshot(Some(1.0), Some(1.0))), t0());
        session.record(Ok(snapshot(Some(2.0), Some(2.0))), t0() + Duration::minutes(10));
        session.record(Ok(snapshot(Some(3.0), Some(3.0))), t0() + Duration::minutes(39));

        let values: Vec<Option<f64>> = session.series("bitcoin").map(Sample::value).collect();
        assert_eq!(values, vec![Some(2.0), Some(3.0)]);
    }

    #[test]
    fn test_record_with_oversized_window_keeps_everything() {
        let window = Duration::minutes(200_000_000_000);
        let mut session: Session<PriceSnapshot> = Session::new(window);
        session.record(Ok(snapshot(Some(1.0), Some(1.0))), t0());
        session.record(Ok(snapshot(Some(2.0), Some(2.0))), t0() + Duration::days(365));

        assert_eq!(session.history().len(), 4);
        assert_eq!(session.metric("bitcoin").delta, Some(1.0));
    }

    #[test]
    fn test_record_clamps_backwards_clock() {
        let mut session = price_session();
        session.record(Ok(snapshot(Some(1.0), Some(1.0))), t0());
        session.record(Ok(snapshot(Some(2.0), Some(2.0))), t0() - Duration::seconds(5));

        assert_eq!(session.history().len(), 4);
        assert!(session.history().iter().all(|s| s.timestamp() == t0()));
        assert_eq!(session.metric("bitcoin").delta, Some(1.0));
    }

    #[test]
    fn test_shared_session_read_write() {
        let shared = price_session().shared();
        write(&shared).record(Ok(snapshot(Some(5.0), None)), t0());

        let guard = read(&shared);
        assert_eq!(guard.metric("bitcoin").current, Some(5.0));
        assert_eq!(guard.metric("ethereum").current, None);
    }
}
