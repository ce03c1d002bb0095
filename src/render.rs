//! Plain-text and JSON rendering of a session
//!
//! Renderers only read a [`Session`]; they never fetch or mutate. Text output is
//! one block per cycle, JSON output is one object per cycle suitable for
//! line-delimited consumers.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::fetch::{PriceSnapshot, WeatherReading};
use crate::metrics::Metric;
use crate::session::{Freshness, Session};

/// Output format selected on the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Payloads that can be listed as human-readable lines
pub trait Describe {
    fn describe(&self) -> Vec<String>;
}

impl Describe for PriceSnapshot {
    fn describe(&self) -> Vec<String> {
        let vs = self.vs.to_uppercase();
        self.quotes
            .iter()
            .map(|quote| format!("{}: {} {}", quote.coin, format_value(quote.price), vs))
            .collect()
    }
}

impl Describe for WeatherReading {
    fn describe(&self) -> Vec<String> {
        let mut line = format!(
            "{}: {} °C, wind {} km/h",
            self.location,
            format_value(self.temperature),
            format_value(self.wind_speed)
        );
        if let Some(observed_at) = self.observed_at {
            line.push_str(&format!(" (observed {})", observed_at.format("%Y-%m-%d %H:%M")));
        }
        vec![line]
    }
}

/// Metric of one series, or of one named secondary value of it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesMetric {
    pub series: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub metric: Metric,
}

impl SeriesMetric {
    fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} {}", self.series, name),
            None => self.series.clone(),
        }
    }
}

/// Metrics for every known series, followed by their secondary values
pub fn series_metrics<T>(session: &Session<T>) -> Vec<SeriesMetric> {
    let mut metrics = Vec::new();
    for key in session.series_keys() {
        metrics.push(SeriesMetric {
            series: key.clone(),
            name: None,
            metric: session.metric(key),
        });

        let names: BTreeSet<&str> = session
            .series(key)
            .flat_map(|sample| sample.secondary_values().keys().map(String::as_str))
            .collect();
        for name in names {
            metrics.push(SeriesMetric {
                series: key.clone(),
                name: Some(name.to_string()),
                metric: session.secondary_metric(key, name),
            });
        }
    }
    metrics
}

/// Renders the session as a text block
pub fn render_text<T: Describe>(session: &Session<T>) -> String {
    let display = session.display();
    let mut out = format!(
        "[{}] {} (cycle {})\n",
        format_time(session.last_refreshed()),
        freshness_label(display.freshness),
        session.cycles()
    );

    match display.data {
        Some(data) => {
            for line in data.describe() {
                out.push_str(&format!("  {}\n", line));
            }
        }
        None => out.push_str("  no data yet\n"),
    }

    let metrics = series_metrics(session);
    if !metrics.is_empty() {
        let width = metrics.iter().map(|m| m.label().len()).max().unwrap_or(0);
        out.push_str("metrics:\n");
        for metric in &metrics {
            out.push_str(&format!(
                "  {:<width$}  {:>12}  ({})\n",
                metric.label(),
                format_value(metric.metric.current),
                format_delta(metric.metric.delta),
                width = width
            ));
        }
    }

    if let Some(error) = display.error {
        match (display.freshness, session.last_good()) {
            (Freshness::Stale, Some((_, good_at))) => out.push_str(&format!(
                "warning: {} (showing data from {})\n",
                error,
                format_time(Some(good_at))
            )),
            (Freshness::Fallback, _) => {
                out.push_str(&format!("warning: {} (showing sample data)\n", error))
            }
            _ => out.push_str(&format!("error: {}\n", error)),
        }
    }

    out
}

/// Renders the session as one JSON object
pub fn render_json<T: Serialize>(session: &Session<T>) -> Value {
    let display = session.display();
    json!({
        "cycle": session.cycles(),
        "refreshed_at": session.last_refreshed(),
        "freshness": display.freshness,
        "data": display.data,
        "metrics": series_metrics(session),
        "error": display.error.map(|err| json!({
            "kind": err.kind(),
            "message": err.to_string(),
        })),
    })
}

fn freshness_label(freshness: Freshness) -> &'static str {
    match freshness {
        Freshness::Live => "live",
        Freshness::Stale => "stale",
        Freshness::Fallback => "sample data",
        Freshness::Empty => "waiting for data",
    }
}

fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|at| at.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}

fn format_value(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "n/a".to_string())
}

fn format_delta(delta: Option<f64>) -> String {
    delta.map(|d| format!("{:+.2}", d)).unwrap_or_else(|| "-".to_string())
}
