//! CoinGecko simple price client
//!
//! Fetches spot prices for a list of coins in one currency and parses them into a
//! [`PriceSnapshot`]. Coins missing from the response, or with a non-numeric
//! price, are kept with a missing price rather than failing the whole fetch.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FetchResult, Fetcher, HttpClient, ToSamples};
use crate::history::Sample;

/// Base URL for the CoinGecko API
const COINGECKO_BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// Coins polled when none are configured
pub const DEFAULT_COINS: [&str; 2] = ["bitcoin", "ethereum"];

/// Quote currency used when none is configured
pub const DEFAULT_VS_CURRENCY: &str = "usd";

/// Sample prices shown while the API is unavailable
const FALLBACK_PRICES: [(&str, f64); 2] = [("bitcoin", 68000.0), ("ethereum", 3500.0)];

/// Spot price of one coin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// CoinGecko coin id, e.g. "bitcoin"
    pub coin: String,
    /// Price in the snapshot's currency, if the API provided one
    pub price: Option<f64>,
}

/// Prices for all requested coins from one fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    /// Quote currency, e.g. "usd"
    pub vs: String,
    /// One quote per requested coin, in request order
    pub quotes: Vec<PriceQuote>,
}

impl PriceSnapshot {
    /// Returns the quote for `coin`, if it was requested
    pub fn quote(&self, coin: &str) -> Option<&PriceQuote> {
        self.quotes.iter().find(|q| q.coin == coin)
    }
}

impl ToSamples for PriceSnapshot {
    fn to_samples(&self, at: DateTime<Utc>) -> Vec<Sample> {
        self.quotes
            .iter()
            .map(|quote| Sample::new(at, quote.coin.as_str(), quote.price))
            .collect()
    }
}

/// Fetcher for CoinGecko spot prices
#[derive(Debug, Clone)]
pub struct PriceFetcher {
    client: HttpClient,
    coins: Vec<String>,
    vs: String,
    base_url: String,
}

impl Default for PriceFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_COINS, DEFAULT_VS_CURRENCY)
    }
}

impl PriceFetcher {
    /// Creates a fetcher for `coins` priced in `vs`
    pub fn new<I, S>(coins: I, vs: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            client: HttpClient::new(),
            coins: coins.into_iter().map(Into::into).collect(),
            vs: vs.into(),
            base_url: COINGECKO_BASE_URL.to_string(),
        }
    }

    /// Uses a custom HTTP client
    pub fn with_client(mut self, client: HttpClient) -> Self {
        self.client = client;
        self
    }

    /// Points the fetcher at a different API root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn coins(&self) -> &[String] {
        &self.coins
    }

    pub fn vs(&self) -> &str {
        &self.vs
    }

    /// The request URL, which doubles as the cache key
    pub fn url(&self) -> String {
        format!(
            "{}/simple/price?ids={}&vs_currencies={}",
            self.base_url.trim_end_matches('/'),
            self.coins.join(","),
            self.vs
        )
    }

    /// Parses a `/simple/price` body into a snapshot ordered like the request
    fn parse_response(&self, body: HashMap<String, HashMap<String, Value>>) -> PriceSnapshot {
        let quotes = self
            .coins
            .iter()
            .map(|coin| PriceQuote {
                coin: coin.clone(),
                price: body
                    .get(coin)
                    .and_then(|prices| prices.get(&self.vs))
                    .and_then(Value::as_f64),
            })
            .collect();

        PriceSnapshot {
            vs: self.vs.clone(),
            quotes,
        }
    }
}

impl Fetcher for PriceFetcher {
    type Output = PriceSnapshot;

    fn fetch(&self, key: &str) -> BoxFuture<'_, FetchResult<PriceSnapshot>> {
        let url = key.to_string();
        Box::pin(async move {
            let body = self.client.get_json(&url).await?;
            Ok(self.parse_response(body))
        })
    }

    /// Sample prices for the configured coins that have one
    fn fallback(&self) -> Option<PriceSnapshot> {
        let quotes: Vec<PriceQuote> = self
            .coins
            .iter()
            .filter_map(|coin| {
                FALLBACK_PRICES
                    .iter()
                    .find(|(name, _)| *name == coin.as_str())
                    .map(|(_, price)| PriceQuote {
                        coin: coin.clone(),
                        price: Some(*price),
                    })
            })
            .collect();

        if quotes.is_empty() {
            return None;
        }

        Some(PriceSnapshot {
            vs: self.vs.clone(),
            quotes,
        })
    }

    fn series_keys(&self) -> Vec<String> {
        self.coins.clone()
    }
}
