//! Health checks for the upstream METAR feed and the observation cache.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::ObservationCache;
use crate::error::UpstreamError;
use crate::weather::{fetch_with_timeout, normalize_station, ObservationSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Healthy,
    /// Reachable but not answering usefully.
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Degraded => write!(f, "DEGRADED"),
            HealthStatus::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub component: &'static str,
    pub status: HealthStatus,
    pub detail: String,
    pub duration_ms: Option<u64>,
}

/// Fetch `station` straight from the source, bypassing the cache.
///
/// An observation is healthy, an empty answer is degraded, and anything else
/// (errors, timeout, cancellation) is unhealthy.
pub async fn check_source(
    source: &dyn ObservationSource,
    station: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> HealthReport {
    let station = normalize_station(station);
    let started = Instant::now();
    let result = fetch_with_timeout(source, &station, timeout, cancel).await;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let (status, detail) = match result {
        Ok(obs) => (
            HealthStatus::Healthy,
            format!(
                "{} observation from {}",
                obs.station_id,
                obs.observed_at.format("%Y-%m-%d %H:%MZ")
            ),
        ),
        Err(e @ UpstreamError::NoData(_)) => (HealthStatus::Degraded, e.to_string()),
        Err(e) => (HealthStatus::Unhealthy, e.to_string()),
    };

    match status {
        HealthStatus::Healthy => info!("Upstream check {} {} in {}ms", station, status, duration_ms),
        _ => warn!("Upstream check {} {}: {}", station, status, detail),
    }

    HealthReport {
        component: "upstream",
        status,
        detail,
        duration_ms: Some(duration_ms),
    }
}

/// Judge the cache from its counters: degraded once more upstream calls have
/// failed than succeeded.
pub fn check_cache(cache: &ObservationCache) -> HealthReport {
    let stats = cache.stats();
    let status = if stats.upstream_failures > stats.misses {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    HealthReport {
        component: "cache",
        status,
        detail: format!(
            "{} cached, {} upstream calls ({} failed, avg {}ms), hit ratio {:.0}%",
            cache.len(),
            stats.upstream_calls,
            stats.upstream_failures,
            stats.avg_upstream_ms(),
            stats.hit_ratio() * 100.0
        ),
        duration_ms: None,
    }
}
