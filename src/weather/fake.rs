//! Scripted `ObservationSource` for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Observation, ObservationSource};
use crate::error::UpstreamError;

/// Pops queued responses in order and counts calls. Once the queue is empty
/// every fetch is `NoData`. A hanging source waits for cancellation.
pub(crate) struct FakeSource {
    responses: Mutex<Vec<Result<Observation, UpstreamError>>>,
    calls: AtomicUsize,
    hang: bool,
}

impl FakeSource {
    pub(crate) fn new(responses: Vec<Result<Observation, UpstreamError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
            hang: false,
        }
    }

    pub(crate) fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new(Vec::new())
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObservationSource for FakeSource {
    async fn fetch(
        &self,
        station_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Observation, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            cancel.cancelled().await;
            return Err(UpstreamError::Cancelled);
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Err(UpstreamError::NoData(station_id.to_string()))
        } else {
            responses.remove(0)
        }
    }
}
