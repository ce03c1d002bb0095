//! Time-windowed sample history
//!
//! A [`HistoryWindow`] keeps samples from one or more series in append order,
//! which is also timestamp order. Pruning evicts from the front only, so it costs
//! O(k) in the number of evicted samples.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

/// One observation of a series
///
/// A `None` value marks a missing value: a failed fetch or a field that could not
/// be parsed. Secondary values that could not be parsed are simply absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    timestamp: DateTime<Utc>,
    series_key: String,
    value: Option<f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    secondary: BTreeMap<String, f64>,
}

impl Sample {
    /// Creates a sample; non-finite values are stored as missing
    pub fn new(
        timestamp: DateTime<Utc>,
        series_key: impl Into<String>,
        value: Option<f64>,
    ) -> Self {
        Self {
            timestamp,
            series_key: series_key.into(),
            value: value.filter(|v| v.is_finite()),
            secondary: BTreeMap::new(),
        }
    }

    /// Creates a missing-value sample for a failed cycle
    pub fn missing(timestamp: DateTime<Utc>, series_key: impl Into<String>) -> Self {
        Self::new(timestamp, series_key, None)
    }

    /// Adds a named secondary value; absent or non-finite values are skipped
    pub fn with_secondary(mut self, name: impl Into<String>, value: Option<f64>) -> Self {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            self.secondary.insert(name.into(), v);
        }
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn series_key(&self) -> &str {
        &self.series_key
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Returns a named secondary value, if present
    pub fn secondary(&self, name: &str) -> Option<f64> {
        self.secondary.get(name).copied()
    }

    pub fn secondary_values(&self) -> &BTreeMap<String, f64> {
        &self.secondary
    }
}

/// Errors raised by [`HistoryWindow::append`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    /// The sample is older than the most recent sample in the window
    #[error("sample at {sample} is older than the latest sample at {latest}")]
    OutOfOrder {
        sample: DateTime<Utc>,
        latest: DateTime<Utc>,
    },
}

/// Rolling, time-bounded buffer of samples
#[derive(Debug, Clone)]
pub struct HistoryWindow {
    samples: VecDeque<Sample>,
    window: Duration,
}

impl HistoryWindow {
    /// Creates an empty window retaining samples newer than `window`
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Timestamp of the most recently appended sample
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.samples.back().map(Sample::timestamp)
    }

    /// Appends a sample at the back
    ///
    /// Samples sharing the latest timestamp are accepted; older ones are rejected
    /// so the window stays in timestamp order.
    pub fn append(&mut self, sample: Sample) -> Result<(), HistoryError> {
        if let Some(latest) = self.latest_timestamp() {
            if sample.timestamp < latest {
                return Err(HistoryError::OutOfOrder {
                    sample: sample.timestamp,
                    latest,
                });
            }
        }
        self.samples.push_back(sample);
        Ok(())
    }

    /// Evicts samples older than `now - window`
    ///
    /// The cutoff is exclusive: a sample stamped exactly at the cutoff is kept.
    /// A window reaching back past the earliest representable time keeps
    /// everything.
    ///
    /// # Returns
    /// The number of evicted samples
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = now.checked_sub_signed(self.window) else {
            return 0;
        };
        let mut evicted = 0;
        while self
            .samples
            .front()
            .is_some_and(|sample| sample.timestamp < cutoff)
        {
            self.samples.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Samples for one series in ascending timestamp order
    ///
    /// Unknown keys yield an empty iterator.
    pub fn series<'a>(
        &'a self,
        series_key: &'a str,
    ) -> impl Iterator<Item = &'a Sample> + Clone + 'a {
        self.samples
            .iter()
            .filter(move |sample| sample.series_key == series_key)
    }

    /// All samples across series in timestamp order
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Distinct series keys in first-seen order
    pub fn series_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for sample in &self.samples {
            if !keys.contains(&sample.series_key.as_str()) {
                keys.push(&sample.series_key);
            }
        }
        keys
    }
}
