use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ConditionsEngine, ConditionsResult};
use crate::airports::runways::{Designator, RunwayCatalog};
use crate::airports::AirportCatalog;
use crate::cache::ObservationCache;
use crate::clock::Clock;
use crate::error::ConditionsError;
use crate::weather::{fetch_with_timeout, is_valid_icao, normalize_station, ObservationSource};

/// Answers "what are conditions at this airport, for this runway" by combining
/// the catalogs, the shared cache and the conditions engine.
pub struct ConditionsService {
    source: Arc<dyn ObservationSource>,
    cache: Arc<ObservationCache>,
    airports: Arc<dyn AirportCatalog>,
    runways: Arc<dyn RunwayCatalog>,
    clock: Arc<dyn Clock>,
    engine: ConditionsEngine,
    fetch_timeout: Duration,
}

impl ConditionsService {
    pub fn new(
        source: Arc<dyn ObservationSource>,
        cache: Arc<ObservationCache>,
        airports: Arc<dyn AirportCatalog>,
        runways: Arc<dyn RunwayCatalog>,
        clock: Arc<dyn Clock>,
        engine: ConditionsEngine,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            cache,
            airports,
            runways,
            clock,
            engine,
            fetch_timeout,
        }
    }

    pub fn cache(&self) -> &ObservationCache {
        &self.cache
    }

    /// Validate the request, get an observation through the cache and derive
    /// conditions for it. Without a runway the wind components are computed
    /// against heading 0 and carry no crosswind side.
    pub async fn get_conditions(
        &self,
        station_id: &str,
        runway: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ConditionsResult, ConditionsError> {
        self.get_conditions_at(station_id, runway, self.clock.now(), cancel)
            .await
    }

    /// Same as `get_conditions`, with age and staleness measured at `now`.
    pub async fn get_conditions_at(
        &self,
        station_id: &str,
        runway: Option<&str>,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ConditionsResult, ConditionsError> {
        if !is_valid_icao(station_id) {
            return Err(ConditionsError::InvalidStation(station_id.to_string()));
        }
        let station = normalize_station(station_id);

        let elevation_ft = self
            .airports
            .elevation_ft(&station)
            .ok_or_else(|| ConditionsError::UnknownStation(station.clone()))?;

        let runway_heading_deg = match runway.map(str::trim).filter(|r| !r.is_empty()) {
            Some(raw) => self.resolve_runway(&station, raw)?,
            None => 0,
        };

        let timeout = self.fetch_timeout;
        let source = Arc::clone(&self.source);
        let cached = self
            .cache
            .get_or_fetch(&station, |key| async move {
                debug!("Fetching {} from upstream (timeout {:?})", key, timeout);
                fetch_with_timeout(source.as_ref(), &key, timeout, cancel).await
            })
            .await
            .map_err(|e| {
                warn!("No conditions for {}: {}", station, e);
                ConditionsError::from(e)
            })?;

        let result = self.engine.derive(
            &cached.observation,
            runway_heading_deg,
            elevation_ft,
            now,
            cached.cache_result,
        );

        info!(
            "Conditions {} {}: DA {} ft, head {} kt, cross {} kt, age {}m, {}",
            result.station_id,
            result.flight_category,
            result.density_altitude_ft,
            result.headwind_kt,
            result.crosswind_kt,
            result.age_minutes,
            result.cache_result
        );
        Ok(result)
    }

    fn resolve_runway(&self, station: &str, raw: &str) -> Result<i32, ConditionsError> {
        let designator = Designator::parse(raw).ok_or_else(|| ConditionsError::InvalidRunway {
            station: station.to_string(),
            designator: raw.to_string(),
        })?;

        self.runways
            .magnetic_heading(station, &designator)
            .ok_or_else(|| ConditionsError::UnknownRunway {
                station: station.to_string(),
                designator: designator.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    use crate::airports::runways::InMemoryRunwayCatalog;
    use crate::airports::InMemoryAirportCatalog;
    use crate::cache::{CachePolicy, CacheResult};
    use crate::clock::ManualClock;
    use crate::conditions::{CrosswindSide, FlightCategory};
    use crate::error::UpstreamError;
    use crate::weather::fake::FakeSource;
    use crate::weather::Observation;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 31, 12, 0, 0).unwrap()
    }

    fn ksfo(observed_at: DateTime<Utc>) -> Observation {
        Observation {
            station_id: "KSFO".to_string(),
            observed_at,
            wind_direction_deg: 290.0,
            wind_variable: false,
            wind_speed_kt: 20.0,
            gust_kt: None,
            visibility_sm: 10.0,
            ceiling_ft_agl: None,
            temperature_c: 30.0,
            dewpoint_c: 12.0,
            altimeter_inhg: 29.92,
            raw_text: "KSFO 311200Z 29020KT 10SM CLR 30/12 A2992".to_string(),
        }
    }

    struct Harness {
        service: ConditionsService,
        source: Arc<FakeSource>,
        clock: Arc<ManualClock>,
    }

    fn harness(source: FakeSource) -> Harness {
        harness_with_timeout(source, Duration::from_secs(10))
    }

    fn harness_with_timeout(source: FakeSource, fetch_timeout: Duration) -> Harness {
        let clock = Arc::new(ManualClock::new(t0()));
        let source = Arc::new(source);
        let cache = Arc::new(ObservationCache::new(CachePolicy::new(5, 30), clock.clone()));
        let service = ConditionsService::new(
            source.clone(),
            cache,
            Arc::new(InMemoryAirportCatalog::builtin()),
            Arc::new(InMemoryRunwayCatalog::builtin()),
            clock.clone(),
            ConditionsEngine::new(15, Some(60)),
            fetch_timeout,
        );
        Harness {
            service,
            source,
            clock,
        }
    }

    #[tokio::test]
    async fn test_ksfo_28l_conditions() {
        let h = harness(FakeSource::new(vec![Ok(ksfo(t0()))]));
        let cancel = CancellationToken::new();

        let result = h
            .service
            .get_conditions("ksfo", Some("28L"), &cancel)
            .await
            .unwrap();

        assert_eq!(result.station_id, "KSFO");
        assert_eq!(result.runway_heading_deg, 280);
        assert_eq!(result.headwind_kt, 19.7);
        assert_eq!(result.crosswind_kt, 3.5);
        assert_eq!(result.crosswind_side, CrosswindSide::Right);
        assert_eq!(result.flight_category, FlightCategory::Vfr);
        assert_eq!(result.density_altitude_ft, 1816);
        assert_eq!(result.cache_result, CacheResult::Miss);
        assert!(!result.is_stale);
    }

    #[tokio::test]
    async fn test_second_request_is_a_hit() {
        let h = harness(FakeSource::new(vec![Ok(ksfo(t0()))]));
        let cancel = CancellationToken::new();

        h.service.get_conditions("KSFO", None, &cancel).await.unwrap();
        h.clock.advance(ChronoDuration::minutes(3));
        let again = h.service.get_conditions("KSFO", Some("10R"), &cancel).await.unwrap();

        assert_eq!(again.cache_result, CacheResult::Hit);
        assert_eq!(again.age_minutes, 3);
        assert_eq!(again.runway_heading_deg, 100);
        assert_eq!(h.source.calls(), 1);
    }

    #[tokio::test]
    async fn test_explicit_now_drives_age() {
        let h = harness(FakeSource::new(vec![Ok(ksfo(t0()))]));
        let later = t0() + ChronoDuration::minutes(20);

        let result = h
            .service
            .get_conditions_at("KSFO", Some("19L"), later, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.age_minutes, 20);
        assert!(result.is_stale);
        assert_eq!(result.cache_result, CacheResult::Miss);
        assert_eq!(result.runway_heading_deg, 190);
    }

    #[tokio::test]
    async fn test_no_runway_means_no_crosswind_side() {
        let h = harness(FakeSource::new(vec![Ok(ksfo(t0()))]));
        let result = h
            .service
            .get_conditions("KSFO", Some("  "), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.runway_heading_deg, 0);
        assert_eq!(result.crosswind_side, CrosswindSide::None);
    }

    #[tokio::test]
    async fn test_request_errors_do_not_reach_upstream() {
        let h = harness(FakeSource::new(vec![Ok(ksfo(t0()))]));
        let cancel = CancellationToken::new();

        let err = h.service.get_conditions("SFO", None, &cancel).await.unwrap_err();
        assert_eq!(err, ConditionsError::InvalidStation("SFO".into()));

        let err = h.service.get_conditions("KXYZ", None, &cancel).await.unwrap_err();
        assert_eq!(err, ConditionsError::UnknownStation("KXYZ".into()));

        let err = h.service.get_conditions("KSFO", Some("28Z"), &cancel).await.unwrap_err();
        assert!(matches!(err, ConditionsError::InvalidRunway { .. }));

        let err = h.service.get_conditions("KSFO", Some("9"), &cancel).await.unwrap_err();
        assert_eq!(
            err,
            ConditionsError::UnknownRunway {
                station: "KSFO".into(),
                designator: "09".into(),
            }
        );
        assert!(err.is_client_error());

        // Known airport, but no runway data at all
        let err = h.service.get_conditions("KSEA", Some("16L"), &cancel).await.unwrap_err();
        assert!(matches!(err, ConditionsError::UnknownRunway { .. }));

        assert_eq!(h.source.calls(), 0);
    }

    #[tokio::test]
    async fn test_upstream_failure_without_cache_is_no_observation() {
        let h = harness(FakeSource::new(vec![Err(UpstreamError::Status {
            status: 502,
            body: "bad gateway".into(),
        })]));

        let err = h
            .service
            .get_conditions("KDEN", Some("16"), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ConditionsError::NoObservation { station, cause } => {
                assert_eq!(station, "KDEN");
                assert!(cause.unwrap().contains("502"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fallback_is_flagged_stale() {
        let h = harness(FakeSource::new(vec![
            Ok(ksfo(t0())),
            Err(UpstreamError::Timeout(Duration::from_secs(10))),
        ]));
        let cancel = CancellationToken::new();

        h.service.get_conditions("KSFO", Some("28L"), &cancel).await.unwrap();
        h.clock.advance(ChronoDuration::minutes(10));
        let result = h.service.get_conditions("KSFO", Some("28L"), &cancel).await.unwrap();

        assert_eq!(result.cache_result, CacheResult::Fallback);
        assert_eq!(result.age_minutes, 10);
        assert!(result.is_stale);
        assert!(!result.is_critically_stale);
        assert_eq!(h.source.calls(), 2);
    }

    #[tokio::test]
    async fn test_old_observation_is_stale_on_a_miss() {
        let h = harness(FakeSource::new(vec![Ok(ksfo(t0() - ChronoDuration::minutes(70)))]));
        let result = h
            .service
            .get_conditions("KSFO", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.cache_result, CacheResult::Miss);
        assert!(result.is_stale);
        assert!(result.is_critically_stale);
    }

    #[tokio::test]
    async fn test_cancellation_leaves_cache_empty() {
        let h = harness(FakeSource::hanging());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = h
            .service
            .get_conditions("KSFO", None, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, ConditionsError::Cancelled("KSFO".into()));
        assert!(h.service.cache().is_empty());
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let h = harness_with_timeout(FakeSource::hanging(), Duration::from_millis(30));

        let err = h
            .service
            .get_conditions("KSFO", None, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ConditionsError::NoObservation { cause, .. } => {
                assert!(cause.unwrap().contains("timed out"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        let stats = h.service.cache().stats();
        assert_eq!(stats.upstream_failures, 1);
        assert_eq!(stats.upstream_calls, 1);
        assert!(stats.upstream_last_ms >= 30, "{:?}", stats);
    }

    #[tokio::test]
    async fn test_stats_track_upstream_calls() {
        let h = harness(FakeSource::new(vec![Ok(ksfo(t0())), Ok(ksfo(t0() + ChronoDuration::minutes(6)))]));
        let cancel = CancellationToken::new();

        h.service.get_conditions("KSFO", None, &cancel).await.unwrap();
        h.service.get_conditions("KSFO", None, &cancel).await.unwrap();
        h.clock.advance(ChronoDuration::minutes(6));
        h.service.get_conditions("KSFO", None, &cancel).await.unwrap();

        let stats = h.service.cache().stats();
        assert_eq!(h.source.calls(), 2);
        assert_eq!(stats.upstream_calls, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert!(stats.upstream_total_ms >= stats.upstream_last_ms);
    }
}
