//! TTL cache in front of a fetcher
//!
//! Provides a `PollCache` that answers repeated requests for the same key from
//! memory until the entry's TTL runs out, and runs at most one fetch per key at a
//! time when shared between concurrent callers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Mutex as FlightLock;
use tokio::time::Instant;
use tracing::debug;

use crate::fetch::{FetchResult, Fetcher};

/// Cache TTL for the price source (5 minutes)
pub const PRICE_CACHE_TTL: Duration = Duration::from_secs(300);

/// Cache TTL for the weather source (10 minutes)
pub const WEATHER_CACHE_TTL: Duration = Duration::from_secs(600);

/// A stored fetch result
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    /// The cached result, success or failure
    value: FetchResult<T>,
    /// When the fetch completed
    fetched_at: Instant,
    /// How long the entry is considered fresh
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < self.ttl
    }
}

/// Per-key cache state
///
/// `generation` is bumped by every invalidation. A fetch only stores its
/// result if no invalidation happened while it was in flight.
#[derive(Debug)]
struct Slot<T> {
    entry: Option<CacheEntry<T>>,
    generation: u64,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            entry: None,
            generation: 0,
        }
    }
}

impl<T: Clone> Slot<T> {
    fn fresh_value(&self, now: Instant) -> Option<FetchResult<T>> {
        self.entry
            .as_ref()
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.value.clone())
    }

    fn invalidate(&mut self) -> bool {
        self.generation += 1;
        self.entry.take().is_some()
    }
}

/// Memoizes fetch results per request key
///
/// A `get` within the TTL of the last stored result returns that result without
/// touching the fetcher. Callers sharing a cache through an `Arc` are serialized
/// per key: concurrent misses for the same key trigger one fetch, and the waiters
/// receive its result.
pub struct PollCache<F: Fetcher> {
    fetcher: F,
    ttl: Duration,
    slots: Mutex<HashMap<String, Slot<F::Output>>>,
    flights: Mutex<HashMap<String, Arc<FlightLock<()>>>>,
}

impl<F: Fetcher> PollCache<F> {
    /// Creates a cache around `fetcher` whose entries stay fresh for `ttl`
    pub fn new(fetcher: F, ttl: Duration) -> Self {
        Self {
            fetcher,
            ttl,
            slots: Mutex::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The wrapped fetcher
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Returns the result for `key`, fetching only when there is no fresh entry
    ///
    /// Never fails: fetch failures come back as `Err` values and are cached for
    /// the TTL like successful payloads.
    pub async fn get(&self, key: &str) -> FetchResult<F::Output> {
        let generation = {
            let mut slots = self.slots();
            let slot = slots.entry(key.to_string()).or_default();
            if let Some(hit) = slot.fresh_value(Instant::now()) {
                debug!(key, "cache hit");
                return hit;
            }
            slot.generation
        };

        let flight = self.flight(key);
        let value = {
            let _in_flight = flight.lock().await;

            // Another caller may have completed a fetch while we waited for the
            // lock. Its result only counts if nothing was invalidated since this
            // call began, so an invalidate followed by a get always fetches.
            match self.lookup(key, generation) {
                Some(hit) => {
                    debug!(key, "cache filled by concurrent fetch");
                    hit
                }
                None => {
                    debug!(key, "cache miss, fetching");
                    let value = self.fetcher.fetch(key).await;
                    self.store(key, generation, value.clone());
                    value
                }
            }
        };
        self.release_flight(key, flight);
        value
    }

    /// Removes the entry for `key`; the next `get` is guaranteed to fetch
    ///
    /// A fetch for `key` already in flight still returns its result to its own
    /// caller, but that result is not cached.
    pub fn invalidate(&self, key: &str) {
        if let Some(slot) = self.slots().get_mut(key) {
            if slot.invalidate() {
                debug!(key, "cache entry invalidated");
            }
        }
    }

    /// Removes every entry
    pub fn clear(&self) {
        for slot in self.slots().values_mut() {
            slot.invalidate();
        }
    }

    /// When the entry for `key` was fetched, fresh or not
    pub fn fetched_at(&self, key: &str) -> Option<Instant> {
        self.slots()
            .get(key)
            .and_then(|slot| slot.entry.as_ref())
            .map(|entry| entry.fetched_at)
    }

    /// Whether `key` currently has a fresh entry
    pub fn is_fresh(&self, key: &str) -> bool {
        self.slots()
            .get(key)
            .and_then(|slot| slot.entry.as_ref())
            .is_some_and(|entry| entry.is_fresh(Instant::now()))
    }

    fn lookup(&self, key: &str, generation: u64) -> Option<FetchResult<F::Output>> {
        let slots = self.slots();
        let slot = slots.get(key)?;
        if slot.generation != generation {
            return None;
        }
        slot.fresh_value(Instant::now())
    }

    fn store(&self, key: &str, generation: u64, value: FetchResult<F::Output>) {
        let mut slots = self.slots();
        let slot = slots.entry(key.to_string()).or_default();
        if slot.generation != generation {
            debug!(key, "entry invalidated during fetch, result not cached");
            return;
        }
        slot.entry = Some(CacheEntry {
            value,
            fetched_at: Instant::now(),
            ttl: self.ttl,
        });
    }

    fn flight(&self, key: &str) -> Arc<FlightLock<()>> {
        self.flights()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Drops the flight lock for `key` once no other caller holds it
    fn release_flight(&self, key: &str, flight: Arc<FlightLock<()>>) {
        let mut flights = self.flights();
        // One reference in the map, one here
        let idle = flights
            .get(key)
            .is_some_and(|held| Arc::ptr_eq(held, &flight) && Arc::strong_count(&flight) == 2);
        if idle {
            flights.remove(key);
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot<F::Output>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flights(&self) -> MutexGuard<'_, HashMap<String, Arc<FlightLock<()>>>> {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
