use std::time::Duration;

use thiserror::Error;

/// Failure reported by an `ObservationSource`.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to parse upstream response: {0}")]
    Parse(String),

    #[error("no observation returned for {0}")]
    NoData(String),

    #[error("upstream fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream fetch cancelled")]
    Cancelled,

    #[error("observation for {station} is stamped {ahead_secs}s in the future")]
    FutureObservation { station: String, ahead_secs: i64 },
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            UpstreamError::Parse(err.to_string())
        } else {
            UpstreamError::Http(err.to_string())
        }
    }
}

/// Failure returned by `ObservationCache::get_or_fetch`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("invalid station key {0:?}")]
    InvalidKey(String),

    /// No usable observation. `cause` carries the upstream failure when there was one.
    #[error("no observation available for {station}")]
    NoObservation {
        station: String,
        cause: Option<String>,
    },

    #[error("fetch for {0} was cancelled")]
    Cancelled(String),
}

/// Errors surfaced by `ConditionsService::get_conditions`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionsError {
    #[error("invalid station id {0:?}")]
    InvalidStation(String),

    #[error("unknown station {0}")]
    UnknownStation(String),

    #[error("invalid runway designator {designator:?} for {station}")]
    InvalidRunway { station: String, designator: String },

    #[error("runway {designator} not found for {station}")]
    UnknownRunway { station: String, designator: String },

    #[error("no observation available for {station}")]
    NoObservation {
        station: String,
        cause: Option<String>,
    },

    #[error("request for {0} was cancelled")]
    Cancelled(String),
}

/// Rejected airport search arguments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    #[error("query is required")]
    MissingQuery,

    #[error("take must be between 1 and 50, got {0}")]
    InvalidTake(usize),

    #[error("page must be greater than 0")]
    InvalidPage,
}

impl ConditionsError {
    /// True for errors caused by the request itself (bad or unknown station/runway),
    /// false when the station is known but no data could be produced.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ConditionsError::InvalidStation(_)
                | ConditionsError::UnknownStation(_)
                | ConditionsError::InvalidRunway { .. }
                | ConditionsError::UnknownRunway { .. }
        )
    }
}

impl From<CacheError> for ConditionsError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::InvalidKey(key) => ConditionsError::InvalidStation(key),
            CacheError::NoObservation { station, cause } => {
                ConditionsError::NoObservation { station, cause }
            }
            CacheError::Cancelled(station) => ConditionsError::Cancelled(station),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_vs_upstream_errors() {
        assert!(ConditionsError::UnknownStation("KXYZ".into()).is_client_error());
        assert!(ConditionsError::UnknownRunway {
            station: "KSFO".into(),
            designator: "09".into(),
        }
        .is_client_error());

        let no_obs = ConditionsError::NoObservation {
            station: "KSFO".into(),
            cause: None,
        };
        assert!(!no_obs.is_client_error());
        assert!(!ConditionsError::Cancelled("KSFO".into()).is_client_error());
    }

    #[test]
    fn test_cache_error_keeps_cause() {
        let err: ConditionsError = CacheError::NoObservation {
            station: "KDEN".into(),
            cause: Some("upstream returned 503: busy".into()),
        }
        .into();

        match err {
            ConditionsError::NoObservation { station, cause } => {
                assert_eq!(station, "KDEN");
                assert_eq!(cause.as_deref(), Some("upstream returned 503: busy"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
