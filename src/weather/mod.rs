pub mod aviation_weather;
#[cfg(test)]
pub(crate) mod fake;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::UpstreamError;

/// Weather configuration loaded from clearskies.toml
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WeatherConfig {
    /// Cached observations younger than this are served without asking upstream.
    #[serde(default = "default_cache_minutes")]
    pub cache_minutes: i64,
    /// How long a cached observation may stand in for a failed fetch. 0 = never.
    #[serde(default = "default_serve_stale")]
    pub serve_stale_up_to_minutes: i64,
    /// Observations at least this old are flagged stale to the user.
    #[serde(default = "default_stale_after")]
    pub stale_after_minutes: i64,
    /// Observations at least this old are flagged critically stale. 0 = off.
    #[serde(default = "default_critically_stale_after")]
    pub critically_stale_after_minutes: i64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            cache_minutes: 5,
            serve_stale_up_to_minutes: 30,
            stale_after_minutes: 15,
            critically_stale_after_minutes: 60,
            fetch_timeout_secs: 10,
        }
    }
}

fn default_cache_minutes() -> i64 { 5 }
fn default_serve_stale() -> i64 { 30 }
fn default_stale_after() -> i64 { 15 }
fn default_critically_stale_after() -> i64 { 60 }
fn default_fetch_timeout() -> u64 { 10 }

impl WeatherConfig {
    pub fn critically_stale_after(&self) -> Option<i64> {
        (self.critically_stale_after_minutes > 0).then_some(self.critically_stale_after_minutes)
    }
}

/// A single METAR observation for one station.
///
/// Built once by a source and never modified afterwards; the cache hands out clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub station_id: String,
    pub observed_at: DateTime<Utc>,
    pub wind_direction_deg: f64,
    /// Reported as VRB. `wind_direction_deg` is then 0 and meaningless.
    #[serde(default)]
    pub wind_variable: bool,
    pub wind_speed_kt: f64,
    pub gust_kt: Option<f64>,
    pub visibility_sm: f64,
    /// Lowest broken/overcast layer. `None` means no ceiling, not zero.
    pub ceiling_ft_agl: Option<i32>,
    pub temperature_c: f64,
    pub dewpoint_c: f64,
    pub altimeter_inhg: f64,
    pub raw_text: String,
}

/// Upstream weather client. Implementations may be slow or fail; they must stop
/// work and return `UpstreamError::Cancelled` once `cancel` fires.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    async fn fetch(
        &self,
        station_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Observation, UpstreamError>;
}

/// One fetch bounded by `timeout`. Running out of time is an upstream failure,
/// unlike cancellation.
pub async fn fetch_with_timeout(
    source: &dyn ObservationSource,
    station_id: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Observation, UpstreamError> {
    match tokio::time::timeout(timeout, source.fetch(station_id, cancel)).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::Timeout(timeout)),
    }
}

/// Normalize a station id the way the cache keys it.
pub fn normalize_station(station_id: &str) -> String {
    station_id.trim().to_ascii_uppercase()
}

/// ICAO ids: four ASCII letters or digits, starting with a letter.
pub fn is_valid_icao(station_id: &str) -> bool {
    let id = station_id.trim();
    id.len() == 4
        && id.chars().all(|c| c.is_ascii_alphanumeric())
        && id.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
}
