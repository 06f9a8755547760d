pub mod service;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::CacheResult;
use crate::weather::{Observation, WeatherConfig};

/// Standard pressure (inHg) and ISA sea-level temperature (°C)
const STD_ALTIMETER_INHG: f64 = 29.92;
const ISA_SEA_LEVEL_C: f64 = 15.0;
/// ISA lapse rate, °C per foot
const ISA_LAPSE_C_PER_FT: f64 = 0.00198;
/// Density altitude grows roughly 120 ft per °C above ISA
const DA_FT_PER_DEG_C: f64 = 120.0;

/// VFR/MVFR/IFR/LIFR, most restrictive first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlightCategory {
    Lifr,
    Ifr,
    Mvfr,
    Vfr,
    Unknown,
}

impl std::fmt::Display for FlightCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlightCategory::Lifr => write!(f, "LIFR"),
            FlightCategory::Ifr => write!(f, "IFR"),
            FlightCategory::Mvfr => write!(f, "MVFR"),
            FlightCategory::Vfr => write!(f, "VFR"),
            FlightCategory::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Which side of the runway the crosswind comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CrosswindSide {
    Left,
    Right,
    None,
}

impl std::fmt::Display for CrosswindSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrosswindSide::Left => write!(f, "left"),
            CrosswindSide::Right => write!(f, "right"),
            CrosswindSide::None => write!(f, "-"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindComponents {
    /// Positive = headwind, negative = tailwind.
    pub headwind_kt: f64,
    pub crosswind_kt: f64,
    pub crosswind_side: CrosswindSide,
}

/// Everything a pilot-facing response needs, derived per request.
///
/// Never cached: age and staleness depend on the time the response is built.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionsResult {
    pub station_id: String,
    pub raw_text: String,
    pub flight_category: FlightCategory,
    pub observed_at: DateTime<Utc>,
    pub wind_direction_deg: f64,
    pub wind_variable: bool,
    pub wind_speed_kt: f64,
    pub gust_kt: Option<f64>,
    pub visibility_statute_miles: f64,
    pub ceiling_ft_agl: Option<i32>,
    pub temperature_c: f64,
    pub dewpoint_c: f64,
    pub altimeter_in_hg: f64,
    /// Runway heading the wind components were computed against, 0 if none.
    pub runway_heading_deg: i32,
    pub headwind_kt: f64,
    pub crosswind_kt: f64,
    pub crosswind_side: CrosswindSide,
    pub density_altitude_ft: i32,
    pub age_minutes: i64,
    pub is_stale: bool,
    pub is_critically_stale: bool,
    pub cache_result: CacheResult,
}

/// Turns an observation plus request context into a `ConditionsResult`.
///
/// Holds only thresholds; `derive` does no I/O and has no side effects.
#[derive(Debug, Clone, Copy)]
pub struct ConditionsEngine {
    stale_after_minutes: i64,
    critically_stale_after_minutes: Option<i64>,
}

impl ConditionsEngine {
    pub fn new(stale_after_minutes: i64, critically_stale_after_minutes: Option<i64>) -> Self {
        Self {
            stale_after_minutes,
            critically_stale_after_minutes,
        }
    }

    pub fn from_config(config: &WeatherConfig) -> Self {
        Self::new(config.stale_after_minutes, config.critically_stale_after())
    }

    /// `runway_heading_deg` of 0 means no runway was requested.
    pub fn derive(
        &self,
        observation: &Observation,
        runway_heading_deg: i32,
        field_elevation_ft: i32,
        now: DateTime<Utc>,
        cache_result: CacheResult,
    ) -> ConditionsResult {
        let wind = if observation.wind_variable {
            variable_wind_components(observation.wind_speed_kt)
        } else {
            wind_components(
                runway_heading_deg,
                observation.wind_direction_deg,
                observation.wind_speed_kt,
            )
        };
        let age_minutes = age_minutes(observation.observed_at, now);

        // Fallback data is a degraded answer whatever its age
        let is_stale =
            age_minutes >= self.stale_after_minutes || cache_result == CacheResult::Fallback;
        let is_critically_stale = self
            .critically_stale_after_minutes
            .is_some_and(|limit| age_minutes >= limit);

        ConditionsResult {
            station_id: observation.station_id.clone(),
            raw_text: observation.raw_text.clone(),
            flight_category: flight_category(observation.ceiling_ft_agl, observation.visibility_sm),
            observed_at: observation.observed_at,
            wind_direction_deg: observation.wind_direction_deg,
            wind_variable: observation.wind_variable,
            wind_speed_kt: observation.wind_speed_kt,
            gust_kt: observation.gust_kt,
            visibility_statute_miles: observation.visibility_sm,
            ceiling_ft_agl: observation.ceiling_ft_agl,
            temperature_c: observation.temperature_c,
            dewpoint_c: observation.dewpoint_c,
            altimeter_in_hg: observation.altimeter_inhg,
            runway_heading_deg,
            headwind_kt: wind.headwind_kt,
            crosswind_kt: wind.crosswind_kt,
            crosswind_side: wind.crosswind_side,
            density_altitude_ft: density_altitude_ft(
                field_elevation_ft,
                observation.temperature_c,
                observation.altimeter_inhg,
            ),
            age_minutes,
            is_stale,
            is_critically_stale,
            cache_result,
        }
    }
}

/// Classify by ceiling and visibility; the first (most restrictive) rule that
/// matches wins. No ceiling counts as unlimited. A visibility that is not a
/// non-negative number can only be classified on ceiling grounds.
pub fn flight_category(ceiling_ft_agl: Option<i32>, visibility_sm: f64) -> FlightCategory {
    let ceiling_below = |limit: i32| ceiling_ft_agl.is_some_and(|c| c < limit);
    let vis_known = visibility_sm.is_finite() && visibility_sm >= 0.0;
    let vis_below = |limit: f64| vis_known && visibility_sm < limit;

    if ceiling_below(500) || vis_below(1.0) {
        FlightCategory::Lifr
    } else if ceiling_below(1000) || vis_below(3.0) {
        FlightCategory::Ifr
    } else if ceiling_ft_agl.is_some_and(|c| c <= 3000) || vis_below(5.0) {
        FlightCategory::Mvfr
    } else if vis_known && visibility_sm >= 5.0 {
        FlightCategory::Vfr
    } else {
        FlightCategory::Unknown
    }
}

/// Headwind (signed, one decimal) and crosswind (magnitude plus side, one decimal).
pub fn wind_components(runway_heading_deg: i32, wind_dir_deg: f64, wind_speed_kt: f64) -> WindComponents {
    // Difference folded into (-180, 180]
    let mut angle = (wind_dir_deg - runway_heading_deg as f64).rem_euclid(360.0);
    if angle > 180.0 {
        angle -= 360.0;
    }
    let radians = angle.to_radians();

    let headwind_kt = round1(wind_speed_kt * radians.cos());
    let signed_cross = wind_speed_kt * radians.sin();
    let crosswind_kt = round1(signed_cross.abs());

    let crosswind_side = if runway_heading_deg == 0 || crosswind_kt == 0.0 {
        CrosswindSide::None
    } else if signed_cross < 0.0 {
        CrosswindSide::Left
    } else {
        CrosswindSide::Right
    };

    WindComponents {
        // -0.0 reads badly
        headwind_kt: headwind_kt + 0.0,
        crosswind_kt,
        crosswind_side,
    }
}

/// VRB wind has no direction to resolve against a runway. The whole speed is
/// reported as crosswind with no side, and no headwind is credited.
pub fn variable_wind_components(wind_speed_kt: f64) -> WindComponents {
    WindComponents {
        headwind_kt: 0.0,
        crosswind_kt: round1(wind_speed_kt),
        crosswind_side: CrosswindSide::None,
    }
}

/// Pressure altitude corrected for temperature deviation from ISA, nearest foot.
pub fn density_altitude_ft(field_elevation_ft: i32, temperature_c: f64, altimeter_inhg: f64) -> i32 {
    let elevation = field_elevation_ft as f64;
    let pressure_altitude = (STD_ALTIMETER_INHG - altimeter_inhg) * 1000.0 + elevation;
    let isa_temp = ISA_SEA_LEVEL_C - ISA_LAPSE_C_PER_FT * elevation;
    (pressure_altitude + DA_FT_PER_DEG_C * (temperature_c - isa_temp)).round() as i32
}

/// Whole minutes since the observation, never negative.
pub fn age_minutes(observed_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let minutes = (now - observed_at).num_seconds() as f64 / 60.0;
    minutes.round().max(0.0) as i64
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
