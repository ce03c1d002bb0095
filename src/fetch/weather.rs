//! Open-Meteo current weather client
//!
//! This module fetches current temperature and wind speed from the Open-Meteo API
//! and parses them into a [`WeatherReading`]. Fields the API leaves out or sends
//! as null become missing values instead of failing the fetch.

use chrono::{DateTime, NaiveDateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FetchError, FetchResult, Fetcher, HttpClient, ToSamples};
use crate::history::Sample;

/// Base URL for the Open-Meteo API
const OPEN_METEO_BASE_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Denver, CO
pub const DEFAULT_LATITUDE: f64 = 39.7392;
pub const DEFAULT_LONGITUDE: f64 = -104.9903;
pub const DEFAULT_LOCATION: &str = "denver";

/// Name of the secondary value carrying wind speed
pub const WIND_SPEED: &str = "wind_speed";

/// Current conditions at one location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    /// Location label, used as the series key
    pub location: String,
    /// Observation time reported by the API (local to the requested timezone)
    pub observed_at: Option<NaiveDateTime>,
    /// Temperature in Celsius
    pub temperature: Option<f64>,
    /// Wind speed in km/h
    pub wind_speed: Option<f64>,
}

impl ToSamples for WeatherReading {
    fn to_samples(&self, at: DateTime<Utc>) -> Vec<Sample> {
        vec![Sample::new(at, self.location.as_str(), self.temperature)
            .with_secondary(WIND_SPEED, self.wind_speed)]
    }
}

/// Fetcher for Open-Meteo current conditions
#[derive(Debug, Clone)]
pub struct WeatherFetcher {
    client: HttpClient,
    latitude: f64,
    longitude: f64,
    location: String,
    base_url: String,
}

impl Default for WeatherFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_LATITUDE, DEFAULT_LONGITUDE, DEFAULT_LOCATION)
    }
}

impl WeatherFetcher {
    /// Create a fetcher for the given coordinates, labelled `location`
    pub fn new(latitude: f64, longitude: f64, location: impl Into<String>) -> Self {
        Self {
            client: HttpClient::new(),
            latitude,
            longitude,
            location: location.into(),
            base_url: OPEN_METEO_BASE_URL.to_string(),
        }
    }

    /// Create a fetcher with a custom HTTP client
    pub fn with_client(mut self, client: HttpClient) -> Self {
        self.client = client;
        self
    }

    /// Points the fetcher at a different forecast endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// The request URL, which doubles as the cache key
    pub fn url(&self) -> String {
        format!(
            "{}?latitude={}&longitude={}&current=temperature_2m,wind_speed_10m",
            self.base_url, self.latitude, self.longitude
        )
    }

    /// Parse the Open-Meteo response into a WeatherReading
    fn parse_response(&self, response: OpenMeteoResponse) -> Result<WeatherReading, FetchError> {
        let current = response.current.ok_or_else(|| {
            FetchError::Network("invalid response body: missing field `current`".to_string())
        })?;

        Ok(WeatherReading {
            location: self.location.clone(),
            observed_at: current.time.as_deref().and_then(parse_datetime),
            temperature: current.temperature_2m.as_ref().and_then(Value::as_f64),
            wind_speed: current.wind_speed_10m.as_ref().and_then(Value::as_f64),
        })
    }
}

impl Fetcher for WeatherFetcher {
    type Output = WeatherReading;

    fn fetch(&self, key: &str) -> BoxFuture<'_, FetchResult<WeatherReading>> {
        let url = key.to_string();
        Box::pin(async move {
            let response: OpenMeteoResponse = self.client.get_json(&url).await?;
            self.parse_response(response)
        })
    }

    fn series_keys(&self) -> Vec<String> {
        vec![self.location.clone()]
    }
}

/// Parse a datetime string in ISO 8601 format (e.g., "2024-07-15T05:30")
///
/// Seconds are optional; Open-Meteo omits them.
fn parse_datetime(datetime_str: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

/// Open-Meteo API response structure
#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    current: Option<CurrentWeather>,
}

/// Current weather data from Open-Meteo
///
/// Numeric fields are kept as raw JSON so a null or a string degrades to a
/// missing value instead of rejecting the whole body.
#[derive(Debug, Deserialize)]
struct CurrentWeather {
    time: Option<String>,
    temperature_2m: Option<Value>,
    wind_speed_10m: Option<Value>,
}
