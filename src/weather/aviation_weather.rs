use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{normalize_station, Observation, ObservationSource};
use crate::error::UpstreamError;

pub const DEFAULT_BASE_URL: &str = "https://aviationweather.gov/api/data";
pub const DEFAULT_USER_AGENT: &str = "clearskies/0.1 (contact@example.com)";

const HPA_PER_INHG: f64 = 33.8639;

/// aviationweather.gov METAR client. No API key required.
pub struct AviationWeatherClient {
    http: reqwest::Client,
    base_url: String,
}

/// One element of the `/metar?format=json` response array.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetarRecord {
    icao_id: String,
    /// Unix seconds.
    obs_time: i64,
    temp: Option<f64>,
    dewp: Option<f64>,
    /// Degrees, or "VRB".
    wdir: Option<serde_json::Value>,
    wspd: Option<f64>,
    wgst: Option<f64>,
    /// Statute miles as a number, or strings like "10+" and "1 1/2".
    visib: Option<serde_json::Value>,
    /// hPa.
    altim: Option<f64>,
    raw_ob: Option<String>,
    #[serde(default)]
    clouds: Vec<CloudLayer>,
}

#[derive(Debug, Deserialize)]
struct CloudLayer {
    cover: String,
    base: Option<i32>,
}

impl AviationWeatherClient {
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_latest(&self, station: &str) -> Result<Observation, UpstreamError> {
        let url = format!("{}/metar?ids={}&format=json", self.base_url, station);
        debug!("METAR request: {}", url);

        let resp = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = resp.status();
        // 204 is how the service says "no report for that station"
        if status == reqwest::StatusCode::NO_CONTENT {
            return Err(UpstreamError::NoData(station.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let body = resp.text().await?;
        let observation = parse_metar_response(station, &body)?;
        info!(
            "  {} observation at {}: {}",
            observation.station_id,
            observation.observed_at.format("%H:%MZ"),
            observation.raw_text
        );
        Ok(observation)
    }
}

#[async_trait]
impl ObservationSource for AviationWeatherClient {
    async fn fetch(
        &self,
        station_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Observation, UpstreamError> {
        let station = normalize_station(station_id);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UpstreamError::Cancelled),
            result = self.fetch_latest(&station) => result,
        }
    }
}

/// Parse a `/metar?format=json` body and return the most recent observation.
fn parse_metar_response(station: &str, body: &str) -> Result<Observation, UpstreamError> {
    if body.trim().is_empty() {
        return Err(UpstreamError::NoData(station.to_string()));
    }

    let records: Vec<MetarRecord> =
        serde_json::from_str(body).map_err(|e| UpstreamError::Parse(e.to_string()))?;

    let record = records
        .into_iter()
        .max_by_key(|r| r.obs_time)
        .ok_or_else(|| UpstreamError::NoData(station.to_string()))?;

    record.into_observation()
}

impl MetarRecord {
    fn into_observation(self) -> Result<Observation, UpstreamError> {
        let observed_at = DateTime::<Utc>::from_timestamp(self.obs_time, 0)
            .ok_or_else(|| UpstreamError::Parse(format!("bad obsTime {}", self.obs_time)))?;

        // VRB and missing directions carry no usable heading
        let wind_direction_deg = match &self.wdir {
            Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            _ => 0.0,
        };
        let wind_variable = matches!(&self.wdir, Some(serde_json::Value::String(s)) if s.eq_ignore_ascii_case("VRB"));

        let visibility_sm = match &self.visib {
            Some(serde_json::Value::Number(n)) => n.as_f64(),
            Some(serde_json::Value::String(s)) => parse_visibility(s),
            _ => None,
        }
        .ok_or_else(|| UpstreamError::Parse(format!("missing visibility for {}", self.icao_id)))?;

        let altimeter_inhg = match self.altim {
            Some(v) if v > 100.0 => round2(v / HPA_PER_INHG),
            Some(v) => v,
            None => 29.92,
        };

        Ok(Observation {
            station_id: normalize_station(&self.icao_id),
            observed_at,
            wind_direction_deg,
            wind_variable,
            wind_speed_kt: self.wspd.unwrap_or(0.0),
            gust_kt: self.wgst,
            visibility_sm,
            ceiling_ft_agl: ceiling_from_layers(&self.clouds),
            temperature_c: self.temp.unwrap_or(0.0),
            dewpoint_c: self.dewp.unwrap_or(0.0),
            altimeter_inhg,
            raw_text: self.raw_ob.unwrap_or_default(),
        })
    }
}

/// Lowest broken, overcast or obscured layer.
fn ceiling_from_layers(layers: &[CloudLayer]) -> Option<i32> {
    layers
        .iter()
        .filter(|l| matches!(l.cover.as_str(), "BKN" | "OVC" | "OVX" | "VV"))
        .filter_map(|l| l.base)
        .min()
}

/// "10+", "6", "1/2", "1 1/2", "P6SM", "M1/4"
fn parse_visibility(raw: &str) -> Option<f64> {
    let s = raw
        .trim()
        .trim_end_matches("SM")
        .trim_end_matches('+')
        .trim_start_matches('P')
        .trim_start_matches('M');

    let mut total = 0.0;
    for part in s.split_whitespace() {
        total += match part.split_once('/') {
            Some((num, den)) => {
                let num: f64 = num.parse().ok()?;
                let den: f64 = den.parse().ok()?;
                if den == 0.0 {
                    return None;
                }
                num / den
            }
            None => part.parse::<f64>().ok()?,
        };
    }

    if s.is_empty() {
        None
    } else {
        Some(total)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
