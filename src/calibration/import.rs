//! Observation import
//!
//! Each accepted coordinate report becomes one [`RawCapture`]: the reported
//! points tagged with the vote vector of the pattern that was displayed.
//! Captures are persisted by independent tasks so that the next capture can
//! proceed while the previous one is still being written.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;

use super::messages::Point;
use crate::error::{CalibrationError, CalibrationResult};
use crate::storage::ArtifactStore;

/// Points reported for one snapshot, tagged with the active pattern's votes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCapture {
    pub pattern: usize,
    pub capture: usize,
    /// Vote per light for the pattern that was displayed
    pub pixels: Vec<i32>,
    pub locations: Vec<Point>,
}

/// Interpret a flat list as interleaved x,y pairs
pub fn points_from_locations(locations: &[f64]) -> CalibrationResult<Vec<Point>> {
    if locations.len() % 2 != 0 {
        return Err(CalibrationError::MalformedPayload(format!(
            "odd number of coordinates ({})",
            locations.len()
        )));
    }
    if let Some(bad) = locations.iter().find(|v| !v.is_finite()) {
        return Err(CalibrationError::MalformedPayload(format!(
            "non-finite coordinate {}",
            bad
        )));
    }

    Ok(locations
        .chunks_exact(2)
        .map(|pair| Point::new(pair[0], pair[1]))
        .collect())
}

/// Append-only collection of the captures imported during a run
#[derive(Debug, Default)]
pub struct CaptureLog {
    captures: Mutex<Vec<RawCapture>>,
}

impl CaptureLog {
    pub fn push(&self, capture: RawCapture) {
        self.captures.lock().push(capture);
    }

    pub fn len(&self) -> usize {
        self.captures.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.captures.lock().is_empty()
    }

    /// Remove and return everything collected so far
    pub fn take(&self) -> Vec<RawCapture> {
        std::mem::take(&mut *self.captures.lock())
    }
}

/// Spawns one persistence task per capture and joins them at the end of capturing.
///
/// Dropping an importer aborts any task still in flight.
pub struct Importer {
    store: Arc<ArtifactStore>,
    log: Arc<CaptureLog>,
    tasks: JoinSet<CalibrationResult<()>>,
}

impl Importer {
    pub fn new(store: Arc<ArtifactStore>, log: Arc<CaptureLog>) -> Self {
        Self {
            store,
            log,
            tasks: JoinSet::new(),
        }
    }

    /// Persist `capture` and add it to the log in the background
    pub fn spawn(&mut self, capture: RawCapture) {
        let store = Arc::clone(&self.store);
        let log = Arc::clone(&self.log);
        self.tasks.spawn(async move {
            store.store_raw_capture(&capture).await?;
            tracing::debug!(
                "Imported capture p{:03}-{:03} with {} points",
                capture.pattern,
                capture.capture,
                capture.locations.len()
            );
            log.push(capture);
            Ok(())
        });
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every outstanding import. Returns the first failure, after
    /// all tasks have finished.
    pub async fn join_all(&mut self) -> CalibrationResult<()> {
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            let result = joined.map_err(CalibrationError::from).and_then(|r| r);
            if let Err(e) = result {
                tracing::error!("Capture import failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
