//! Current value and delta-from-previous for a series

use serde::Serialize;

use crate::history::Sample;

/// Display metric for one series
///
/// `delta` is only present when both of the two most recent values are present,
/// so a missing value never turns into a zero or a NaN in the arithmetic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Metric {
    pub current: Option<f64>,
    pub delta: Option<f64>,
}

impl Metric {
    /// Computes the metric from values in ascending time order
    pub fn compute<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        let mut previous = None;
        let mut last = None;
        for value in values {
            previous = last;
            last = value;
        }

        let delta = match (last, previous) {
            (Some(current), Some(previous)) => Some(current - previous),
            _ => None,
        };

        Self { current: last, delta }
    }

    /// Metric over the primary values of a series view
    pub fn for_series<'a, I>(view: I) -> Self
    where
        I: IntoIterator<Item = &'a Sample>,
    {
        Self::compute(view.into_iter().map(Sample::value))
    }

    /// Metric over a named secondary value; samples lacking it count as missing
    pub fn for_secondary<'a, I>(view: I, name: &str) -> Self
    where
        I: IntoIterator<Item = &'a Sample>,
    {
        Self::compute(view.into_iter().map(|sample| sample.secondary(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn samples(values: &[Option<f64>]) -> Vec<Sample> {
        let t0 = Utc.with_ymd_and_hms(2024, 7, 15, 12, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Sample::new(t0 + Duration::seconds(i as i64 * 30), "bitcoin", *v))
            .collect()
    }

    #[test]
    fn test_empty_view_has_nothing() {
        let metric = Metric::for_series(&samples(&[]));
        assert_eq!(metric, Metric { current: None, delta: None });
    }

    #[test]
    fn test_single_sample_has_no_delta() {
        let metric = Metric::for_series(&samples(&[Some(68000.0)]));
        assert_eq!(metric.current, Some(68000.0));
        assert_eq!(metric.delta, None);
    }

    #[test]
    fn test_delta_is_last_minus_second_last() {
        let metric = Metric::for_series(&samples(&[Some(1.0), Some(68000.0), Some(67950.5)]));
        assert_eq!(metric.current, Some(67950.5));
        assert_eq!(metric.delta, Some(67950.5 - 68000.0));
    }

    #[test]
    fn test_delta_preserves_sign_and_magnitude() {
        let metric = Metric::compute([Some(0.1), Some(0.3)]);
        assert_eq!(metric.delta, Some(0.3 - 0.1));

        let metric = Metric::compute([Some(10.0), Some(-2.5)]);
        assert_eq!(metric.delta, Some(-12.5));
    }

    #[test]
    fn test_missing_current_value() {
        let metric = Metric::for_series(&samples(&[Some(1.0), None]));
        assert_eq!(metric, Metric { current: None, delta: None });
    }

    #[test]
    fn test_missing_previous_value() {
        let metric = Metric::for_series(&samples(&[Some(5.0), None, Some(7.0)]));
        assert_eq!(metric.current, Some(7.0));
        assert_eq!(metric.delta, None);
    }

    #[test]
    fn test_secondary_metric() {
        let t0 = Utc.with_ymd_and_hms(2024, 7, 15, 12, 0, 0).unwrap();
        let view = vec![
            Sample::new(t0, "denver", Some(20.0)).with_secondary("wind_speed", Some(3.0)),
            Sample::new(t0, "denver", Some(21.0)).with_secondary("wind_speed", Some(4.5)),
        ];

        let wind = Metric::for_secondary(&view, "wind_speed");
        assert_eq!(wind.current, Some(4.5));
        assert_eq!(wind.delta, Some(1.5));

        let missing = Metric::for_secondary(&view, "humidity");
        assert_eq!(missing, Metric::default());
    }
}
