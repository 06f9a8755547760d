//! In-memory observation cache.
//!
//! One slot per station in a `DashMap`. A slot holds the cached entry and, while an
//! upstream fetch for that station is running, the broadcast sender that concurrent
//! callers subscribe to. The first caller to find the slot stale or empty leads the
//! fetch; everyone arriving before it finishes waits for the same outcome.
//!
//! ```text
//! caller A ─┐                        ┌─ fresh entry ──────────► Hit
//! caller B ─┼─► claim(slot) ─────────┼─ fetch in flight ──────► wait on broadcast
//! caller C ─┘                        └─ stale / empty ───────► lead fetch ─► settle
//!                                                                  │
//!                                           Miss / Fallback / NoObservation
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{CacheError, UpstreamError};
use crate::weather::{normalize_station, Observation, WeatherConfig};

/// How far ahead of the cache clock an observation timestamp may be.
const FUTURE_TOLERANCE_MINUTES: i64 = 5;

/// How the returned observation was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheResult {
    /// Fetched from upstream for this request.
    Miss,
    /// Served from a fresh cache entry.
    Hit,
    /// Upstream failed; a stale cached entry was served instead.
    Fallback,
}

impl std::fmt::Display for CacheResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheResult::Miss => write!(f, "MISS"),
            CacheResult::Hit => write!(f, "HIT"),
            CacheResult::Fallback => write!(f, "FALLBACK"),
        }
    }
}

/// Fresh and stale windows, measured from when the cache received the data.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    fresh_window: Duration,
    stale_window: Duration,
}

impl CachePolicy {
    pub fn new(fresh_minutes: i64, stale_minutes: i64) -> Self {
        Self {
            fresh_window: Duration::minutes(fresh_minutes.max(0)),
            stale_window: Duration::minutes(stale_minutes.max(0)),
        }
    }

    pub fn from_config(config: &WeatherConfig) -> Self {
        Self::new(config.cache_minutes, config.serve_stale_up_to_minutes)
    }

    /// Fallback needs a non-zero stale window at least as long as the fresh one.
    pub fn fallback_enabled(&self) -> bool {
        self.stale_window > Duration::zero() && self.stale_window >= self.fresh_window
    }

    fn is_fresh(&self, age: Duration) -> bool {
        age <= self.fresh_window
    }

    fn can_fall_back(&self, age: Duration) -> bool {
        self.fallback_enabled() && age <= self.stale_window
    }
}

/// An observation together with how the cache produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedObservation {
    pub observation: Observation,
    pub cache_result: CacheResult,
}

type FetchOutcome = Result<CachedObservation, CacheError>;

#[derive(Debug, Clone)]
struct CacheEntry {
    observation: Observation,
    /// When the cache received the data, not when it was observed.
    inserted_at: DateTime<Utc>,
}

#[derive(Default)]
struct Slot {
    entry: Option<CacheEntry>,
    in_flight: Option<broadcast::Sender<FetchOutcome>>,
}

impl Slot {
    fn is_vacant(&self) -> bool {
        self.entry.is_none() && self.in_flight.is_none()
    }
}

enum Claim {
    Fresh(Observation),
    Wait(broadcast::Receiver<FetchOutcome>),
    Lead(broadcast::Sender<FetchOutcome>),
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fallbacks: AtomicU64,
    evictions: AtomicU64,
    coalesced: AtomicU64,
    upstream_failures: AtomicU64,
    upstream_calls: AtomicU64,
    upstream_total_ms: AtomicU64,
    upstream_last_ms: AtomicU64,
}

/// Snapshot of cache activity since start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fallbacks: u64,
    pub evictions: u64,
    /// Callers that waited on another caller's fetch.
    pub coalesced: u64,
    pub upstream_failures: u64,
    /// Upstream fetches that settled (cancelled ones are not counted).
    pub upstream_calls: u64,
    pub upstream_total_ms: u64,
    pub upstream_last_ms: u64,
}

impl CacheStats {
    /// Share of answered requests served without an upstream call (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let answered = self.hits + self.misses + self.fallbacks;
        if answered == 0 {
            0.0
        } else {
            self.hits as f64 / answered as f64
        }
    }

    pub fn avg_upstream_ms(&self) -> u64 {
        if self.upstream_calls == 0 {
            0
        } else {
            self.upstream_total_ms / self.upstream_calls
        }
    }
}

/// Process-wide METAR cache. Build one at startup and share it behind an `Arc`.
pub struct ObservationCache {
    slots: DashMap<String, Slot>,
    policy: CachePolicy,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl ObservationCache {
    pub fn new(policy: CachePolicy, clock: Arc<dyn Clock>) -> Self {
        if !policy.fallback_enabled() {
            info!("Stale fallback disabled (stale window must be > 0 and >= fresh window)");
        }
        Self {
            slots: DashMap::new(),
            policy,
            clock,
            counters: Counters::default(),
        }
    }

    /// Return the cached observation for `station_id` if it is fresh, otherwise run
    /// `fetch` (at most once per station across concurrent callers) and fall back to
    /// the stale entry if the fetch fails and the entry is still within the stale window.
    ///
    /// `fetch` receives the normalized station id. If it returns
    /// `UpstreamError::Cancelled`, or this future is dropped while it runs, the cache
    /// is left as it was and waiting callers retry on their own.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        station_id: &str,
        fetch: F,
    ) -> Result<CachedObservation, CacheError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Observation, UpstreamError>>,
    {
        let key = normalize_station(station_id);
        if key.is_empty() {
            return Err(CacheError::InvalidKey(station_id.to_string()));
        }

        let sender = loop {
            match self.claim(&key) {
                Claim::Fresh(observation) => {
                    return Ok(CachedObservation {
                        observation,
                        cache_result: CacheResult::Hit,
                    });
                }
                Claim::Wait(mut rx) => match rx.recv().await {
                    Ok(outcome) => return outcome,
                    Err(_) => {
                        // Leader went away without settling
                        debug!("In-flight fetch for {} abandoned, retrying", key);
                        continue;
                    }
                },
                Claim::Lead(tx) => break tx,
            }
        };

        let guard = InFlightGuard {
            cache: self,
            key: &key,
            armed: true,
        };

        let started = Instant::now();
        let result = fetch(key.clone()).await;
        let elapsed = started.elapsed();

        if matches!(result, Err(UpstreamError::Cancelled)) {
            debug!("Fetch for {} cancelled, leaving cache untouched", key);
            drop(sender);
            drop(guard);
            return Err(CacheError::Cancelled(key));
        }

        self.record_upstream(&key, elapsed);
        let outcome = self.settle(&key, result);
        guard.disarm();

        let waiters = sender.receiver_count();
        if sender.send(outcome.clone()).is_ok() {
            debug!("Shared {} fetch outcome with {} waiter(s)", key, waiters);
        }
        outcome
    }

    /// Drop the cached entry for a station. Returns whether there was one.
    pub fn invalidate(&self, station_id: &str) -> bool {
        let key = normalize_station(station_id);
        let removed = self
            .slots
            .get_mut(&key)
            .and_then(|mut slot| slot.entry.take())
            .is_some();
        self.slots.remove_if(&key, |_, slot| slot.is_vacant());
        if removed {
            info!("Invalidated cached observation for {}", key);
        }
        removed
    }

    /// Number of stations with a cached observation.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            upstream_failures: self.counters.upstream_failures.load(Ordering::Relaxed),
            upstream_calls: self.counters.upstream_calls.load(Ordering::Relaxed),
            upstream_total_ms: self.counters.upstream_total_ms.load(Ordering::Relaxed),
            upstream_last_ms: self.counters.upstream_last_ms.load(Ordering::Relaxed),
        }
    }

    fn record_upstream(&self, key: &str, elapsed: std::time::Duration) {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.counters.upstream_calls.fetch_add(1, Ordering::Relaxed);
        self.counters.upstream_total_ms.fetch_add(ms, Ordering::Relaxed);
        self.counters.upstream_last_ms.store(ms, Ordering::Relaxed);
        debug!("Upstream fetch for {} took {}ms", key, ms);
    }

    /// Decide under the slot lock whether this caller is served, waits, or fetches.
    fn claim(&self, key: &str) -> Claim {
        let now = self.clock.now();
        let mut slot = self.slots.entry(key.to_string()).or_default();

        if let Some(entry) = &slot.entry {
            let age = now - entry.inserted_at;
            if self.policy.is_fresh(age) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache HIT {} (age {}s)", key, age.num_seconds());
                return Claim::Fresh(entry.observation.clone());
            }
            debug!("Cache entry for {} is {}s old, refreshing", key, age.num_seconds());
        }

        if let Some(tx) = &slot.in_flight {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!("Fetch for {} already in flight, waiting", key);
            return Claim::Wait(tx.subscribe());
        }

        let (tx, _rx) = broadcast::channel(1);
        slot.in_flight = Some(tx.clone());
        Claim::Lead(tx)
    }

    /// Apply a finished fetch to the slot and clear its in-flight marker.
    fn settle(&self, key: &str, result: Result<Observation, UpstreamError>) -> FetchOutcome {
        let now = self.clock.now();
        let result = result.and_then(|observation| reject_future(observation, now));

        let outcome = {
            let mut slot = self.slots.entry(key.to_string()).or_default();
            slot.in_flight = None;

            match result {
                Ok(observation) => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    info!(
                        "Cache MISS {}: stored observation from {}",
                        key,
                        observation.observed_at.format("%Y-%m-%d %H:%MZ")
                    );
                    slot.entry = Some(CacheEntry {
                        observation: observation.clone(),
                        inserted_at: now,
                    });
                    Ok(CachedObservation {
                        observation,
                        cache_result: CacheResult::Miss,
                    })
                }
                Err(err) => {
                    self.counters.upstream_failures.fetch_add(1, Ordering::Relaxed);
                    let cause = err.to_string();
                    warn!("Upstream fetch for {} failed: {}", key, cause);

                    let cached = slot
                        .entry
                        .as_ref()
                        .map(|entry| (now - entry.inserted_at, entry.observation.clone()));

                    match cached {
                        Some((age, observation)) if self.policy.can_fall_back(age) => {
                            self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                            info!("Cache FALLBACK {} (age {}s)", key, age.num_seconds());
                            Ok(CachedObservation {
                                observation,
                                cache_result: CacheResult::Fallback,
                            })
                        }
                        Some((age, _)) => {
                            slot.entry = None;
                            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                            info!("Cache EXPIRED {} (age {}s), evicted", key, age.num_seconds());
                            Err(CacheError::NoObservation {
                                station: key.to_string(),
                                cause: Some(cause),
                            })
                        }
                        None => Err(CacheError::NoObservation {
                            station: key.to_string(),
                            cause: Some(cause),
                        }),
                    }
                }
            }
        };

        self.slots.remove_if(key, |_, slot| slot.is_vacant());
        outcome
    }

    /// Clear the in-flight marker without touching the entry.
    fn release(&self, key: &str) {
        if let Some(mut slot) = self.slots.get_mut(key) {
            slot.in_flight = None;
        }
        self.slots.remove_if(key, |_, slot| slot.is_vacant());
    }

    #[cfg(test)]
    fn contains(&self, station_id: &str) -> bool {
        self.slots
            .get(&normalize_station(station_id))
            .is_some_and(|slot| slot.entry.is_some())
    }

    #[cfg(test)]
    fn is_fetching(&self, station_id: &str) -> bool {
        self.slots
            .get(&normalize_station(station_id))
            .is_some_and(|slot| slot.in_flight.is_some())
    }
}

fn reject_future(observation: Observation, now: DateTime<Utc>) -> Result<Observation, UpstreamError> {
    let ahead = observation.observed_at - now;
    if ahead > Duration::minutes(FUTURE_TOLERANCE_MINUTES) {
        return Err(UpstreamError::FutureObservation {
            station: observation.station_id,
            ahead_secs: ahead.num_seconds(),
        });
    }
    Ok(observation)
}

/// Releases the leader's in-flight marker if its fetch never settles.
struct InFlightGuard<'a> {
    cache: &'a ObservationCache,
    key: &'a str,
    armed: bool,
}

impl InFlightGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.release(self.key);
        }
    }
}
