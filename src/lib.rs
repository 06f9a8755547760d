//! ClearSkies: current flyable conditions for an airport.
//!
//! METAR observations are fetched from aviationweather.gov through a shared
//! [`cache::ObservationCache`] (fresh window, stale fallback, one upstream call per
//! station at a time) and turned into flight category, runway wind components,
//! density altitude and staleness flags by [`conditions::ConditionsEngine`].
//!
//! ```ignore
//! let service = ConditionsService::new(source, cache, airports, runways, clock, engine, timeout);
//! let result = service.get_conditions("KSFO", Some("28L"), &cancel).await?;
//! println!("{} {}", result.flight_category, result.cache_result);
//! ```

pub mod airports;
pub mod cache;
pub mod clock;
pub mod conditions;
pub mod config;
pub mod error;
pub mod health;
pub mod weather;
