use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::weather::aviation_weather::{DEFAULT_BASE_URL, DEFAULT_USER_AGENT};
use crate::weather::{is_valid_icao, WeatherConfig};

pub const CONFIG_FILE: &str = "clearskies.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Station fetched by `clearskies health` to check the feed.
    #[serde(default = "default_health_station")]
    pub health_station: String,
}

fn default_base_url() -> String { DEFAULT_BASE_URL.to_string() }
fn default_user_agent() -> String { DEFAULT_USER_AGENT.to_string() }
fn default_health_station() -> String { "KORD".to_string() }

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            health_station: default_health_station(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

impl AppConfig {
    /// Read `path` (or `clearskies.toml` when absent), apply environment
    /// overrides and validate. A missing default file just means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(CONFIG_FILE).exists() => Self::from_file(Path::new(CONFIG_FILE))?,
            None => {
                debug!("No {} found, using defaults", CONFIG_FILE);
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Environment wins over the file. `lookup` is `std::env::var` outside tests.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let int = |key: &str| -> Result<Option<i64>> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<i64>()
                    .map(Some)
                    .with_context(|| format!("{} must be an integer, got {:?}", key, raw)),
                None => Ok(None),
            }
        };

        if let Some(v) = int("CLEARSKIES_CACHE_MINUTES")? {
            self.weather.cache_minutes = v;
        }
        if let Some(v) = int("CLEARSKIES_SERVE_STALE_MINUTES")? {
            self.weather.serve_stale_up_to_minutes = v;
        }
        if let Some(v) = int("CLEARSKIES_STALE_AFTER_MINUTES")? {
            self.weather.stale_after_minutes = v;
        }
        if let Some(v) = int("CLEARSKIES_CRITICALLY_STALE_MINUTES")? {
            self.weather.critically_stale_after_minutes = v;
        }
        if let Some(url) = lookup("CLEARSKIES_UPSTREAM_URL").filter(|u| !u.trim().is_empty()) {
            self.upstream.base_url = url.trim().to_string();
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let w = &self.weather;
        let mut issues: Vec<String> = Vec::new();

        if w.cache_minutes < 1 {
            issues.push("weather.cache_minutes must be >= 1".into());
        }
        if w.serve_stale_up_to_minutes < 0 {
            issues.push("weather.serve_stale_up_to_minutes must be >= 0".into());
        }
        if w.stale_after_minutes < 1 {
            issues.push("weather.stale_after_minutes must be >= 1".into());
        }
        if w.critically_stale_after_minutes < 0 {
            issues.push("weather.critically_stale_after_minutes must be >= 0".into());
        }
        if w.fetch_timeout_secs == 0 {
            issues.push("weather.fetch_timeout_secs must be >= 1".into());
        }
        if !self.upstream.base_url.starts_with("http://") && !self.upstream.base_url.starts_with("https://") {
            issues.push(format!("upstream.base_url must be an http(s) URL, got {:?}", self.upstream.base_url));
        }
        if self.upstream.user_agent.trim().is_empty() {
            issues.push("upstream.user_agent must not be empty".into());
        }
        if !is_valid_icao(&self.upstream.health_station) {
            issues.push(format!("upstream.health_station must be an ICAO id, got {:?}", self.upstream.health_station));
        }

        if !issues.is_empty() {
            bail!("Invalid config:\n - {}", issues.join("\n - "));
        }

        if w.serve_stale_up_to_minutes > 0 && w.serve_stale_up_to_minutes < w.cache_minutes {
            warn!(
                "serve_stale_up_to_minutes ({}) < cache_minutes ({}): fallback disabled",
                w.serve_stale_up_to_minutes, w.cache_minutes
            );
        }
        Ok(())
    }
}
