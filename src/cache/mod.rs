//! In-memory result cache for fetchers
//!
//! This module provides a poll cache that memoizes fetch results per request key
//! with a configurable TTL (time-to-live). Failures are cached like payloads, so a
//! rate-limited source is not hammered again before the TTL runs out. Entries can
//! be invalidated explicitly to force a true re-fetch.

mod poll_cache;

pub use poll_cache::{PollCache, PRICE_CACHE_TTL, WEATHER_CACHE_TTL};
