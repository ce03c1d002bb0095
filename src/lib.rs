//! livepoll library
//!
//! A polling engine for live data sources: a TTL cache with single-flight
//! fetches, a rolling history window, current-value and delta metrics, and a
//! background refresh scheduler with manual triggers and cancellation.
//!
//! The binary wires these to a CoinGecko price source and an Open-Meteo weather
//! source; the modules are exposed here for integration tests and embedding.

pub mod cache;
pub mod cli;
pub mod fetch;
pub mod history;
pub mod metrics;
pub mod refresh;
pub mod render;
pub mod session;
