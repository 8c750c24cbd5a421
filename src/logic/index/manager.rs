//! Anomaly Index Manager
//!
//! Holds the current snapshot behind a lock that is only taken to swap or to
//! clone the `Arc`. Queries run on the cloned snapshot without the lock, so a
//! rebuild is never visible half-done.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;

use super::snapshot::IndexSnapshot;
use super::types::{AnomalyFilter, IndexError, IndexStats};
use crate::logic::anomaly::AnomalyRecord;

#[derive(Debug, Default)]
pub struct AnomalyIndex {
    current: RwLock<Option<Arc<IndexSnapshot>>>,
}

impl AnomalyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any prior state with an index over `anomalies`
    pub fn build(&self, anomalies: &[AnomalyRecord]) {
        self.build_shared(Arc::from(anomalies));
    }

    /// Same as `build` without copying the records
    pub fn build_shared(&self, anomalies: Arc<[AnomalyRecord]>) {
        let snapshot = Arc::new(IndexSnapshot::build(anomalies));
        log::info!(
            "Anomaly index built: {} anomalies, {} frames, {} detectors",
            snapshot.anomalies().len(),
            snapshot.indexed_frame_count(),
            snapshot.detector_names().len()
        );
        *self.current.write() = Some(snapshot);
    }

    /// Drop the snapshot; queries fail with `NotBuilt` until the next build
    pub fn clear(&self) {
        *self.current.write() = None;
        log::debug!("Anomaly index cleared");
    }

    pub fn is_built(&self) -> bool {
        self.current.read().is_some()
    }

    /// Current snapshot, for callers running several queries against one state
    pub fn snapshot(&self) -> Result<Arc<IndexSnapshot>, IndexError> {
        self.current.read().clone().ok_or(IndexError::NotBuilt)
    }

    /// Frames to highlight for `filter`; empty when no facet is active
    ///
    /// Facets are AND-ed on frames, not on records: with `{High}` and `{Tcp}`
    /// a frame shared by a High network record and a Medium TCP record is
    /// returned, while `filtered_anomalies` for the same filter returns neither
    /// record. Use `filtered_anomalies` when every hit must be one record.
    pub fn frames_matching_filters(&self, filter: &AnomalyFilter) -> Result<BTreeSet<u64>, IndexError> {
        Ok(self.snapshot()?.frames_matching(filter))
    }

    pub fn filtered_anomalies(&self, filter: &AnomalyFilter) -> Result<Vec<AnomalyRecord>, IndexError> {
        Ok(self.snapshot()?.filtered_anomalies(filter))
    }

    pub fn anomalies_for_frame(&self, frame: u64) -> Result<Vec<AnomalyRecord>, IndexError> {
        Ok(self.snapshot()?.anomalies_for_frame(frame))
    }

    pub fn detector_names(&self) -> Result<Vec<String>, IndexError> {
        Ok(self.snapshot()?.detector_names())
    }

    pub fn stats(&self) -> Result<IndexStats, IndexError> {
        Ok(self.snapshot()?.stats())
    }
}
