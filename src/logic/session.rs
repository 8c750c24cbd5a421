//! Analysis Session
//!
//! Caller-owned context for one capture: the engine, the latest result and
//! the index over it. Create one per open capture and drop it on close; there
//! is no process-wide state.
//!
//! A failed or cancelled `analyze` leaves the previous result in place, so
//! the index is never built from a partial run.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::AnalysisConfig;
use crate::logic::anomaly::AnomalyRecord;
use crate::logic::detection::{CancellationToken, DetectionEngine, DetectionError, DetectorOutcome};
use crate::logic::index::{AnomalyFilter, AnomalyIndex, IndexError};
use crate::logic::packet::PacketRecord;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

impl SessionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionError::Detection(e) if e.is_cancelled())
    }
}

pub struct AnalysisSession {
    engine: DetectionEngine,
    index: AnomalyIndex,
    anomalies: Arc<[AnomalyRecord]>,
    outcomes: Vec<DetectorOutcome>,
}

impl AnalysisSession {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self::with_engine(DetectionEngine::new(config))
    }

    /// Session configured from `NET_ANOMALY_*` environment variables
    pub fn from_env() -> Self {
        Self::new(&AnalysisConfig::from_env())
    }

    pub fn with_engine(engine: DetectionEngine) -> Self {
        Self {
            engine,
            index: AnomalyIndex::new(),
            anomalies: Arc::from(Vec::new()),
            outcomes: Vec::new(),
        }
    }

    /// Detect, then replace the result and rebuild the index
    pub fn analyze(&mut self, packets: &[PacketRecord], cancel: &CancellationToken) -> Result<Arc<[AnomalyRecord]>, SessionError> {
        let report = self.engine.run(packets, cancel)?;
        // a cancel that lands after the last detector still discards the run
        cancel.check()?;

        let anomalies: Arc<[AnomalyRecord]> = Arc::from(report.anomalies);
        self.index.build_shared(Arc::clone(&anomalies));
        self.anomalies = Arc::clone(&anomalies);
        self.outcomes = report.outcomes;
        Ok(anomalies)
    }

    /// Latest successful result, ranked; empty before the first analysis
    pub fn anomalies(&self) -> &[AnomalyRecord] {
        &self.anomalies
    }

    /// Per-detector outcomes of the latest successful run
    pub fn outcomes(&self) -> &[DetectorOutcome] {
        &self.outcomes
    }

    pub fn index(&self) -> &AnomalyIndex {
        &self.index
    }

    pub fn engine(&self) -> &DetectionEngine {
        &self.engine
    }

    /// Frames to highlight for `filter`
    pub fn highlight(&self, filter: &AnomalyFilter) -> Result<BTreeSet<u64>, SessionError> {
        Ok(self.index.frames_matching_filters(filter)?)
    }

    /// Drop all results; index queries fail with `NotBuilt` afterwards
    pub fn reset(&mut self) {
        self.anomalies = Arc::from(Vec::new());
        self.outcomes.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::anomaly::{AnomalyCategory, Severity};
    use crate::logic::detection::{Detector, NetworkLayerDetector};
    use chrono::{Duration, TimeZone, Utc};

    fn syn_flood() -> Vec<PacketRecord> {
        let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        (0..500u64)
            .map(|i| {
                PacketRecord::new(i + 1, base + Duration::milliseconds(i as i64 * 2))
                    .with_endpoints("203.0.113.9", 40000 + i as u16, "192.168.1.100", 80)
                    .with_tcp_flags(0x02)
            })
            .collect()
    }

    struct CancelsRun;

    impl Detector for CancelsRun {
        fn name(&self) -> &str {
            "cancels-run"
        }

        fn category(&self) -> AnomalyCategory {
            AnomalyCategory::Network
        }

        fn detect(&self, _: &[PacketRecord], cancel: &CancellationToken) -> Result<Vec<AnomalyRecord>, DetectionError> {
            cancel.cancel();
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_analyze_builds_index() {
        let mut session = AnalysisSession::new(&AnalysisConfig::sequential());
        assert!(session.anomalies().is_empty());
        assert!(matches!(session.highlight(&AnomalyFilter::new()), Err(SessionError::Index(IndexError::NotBuilt))));

        let anomalies = session.analyze(&syn_flood(), &CancellationToken::new()).unwrap();
        assert!(!anomalies.is_empty());
        assert_eq!(session.anomalies().len(), anomalies.len());
        assert_eq!(session.outcomes().len(), 7);

        let any_severity = AnomalyFilter::new().with_severities(Severity::ALL);
        assert!(session.highlight(&any_severity).unwrap().contains(&1));
    }

    #[test]
    fn test_cancelled_run_keeps_previous_result() {
        let engine = DetectionEngine::with_detectors(vec![Box::new(NetworkLayerDetector), Box::new(CancelsRun)], false);
        let mut session = AnalysisSession::with_engine(engine);
        assert!(session.analyze(&[], &CancellationToken::new()).unwrap_err().is_cancelled());
        assert!(!session.index().is_built());

        let mut session = AnalysisSession::new(&AnalysisConfig::sequential());
        session.analyze(&syn_flood(), &CancellationToken::new()).unwrap();
        let before = session.anomalies().len();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = session.analyze(&[], &cancel).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(session.anomalies().len(), before);
        assert!(session.index().is_built());
    }

    #[test]
    fn test_reset_drops_everything() {
        let mut session = AnalysisSession::new(&AnalysisConfig::default());
        session.analyze(&syn_flood(), &CancellationToken::new()).unwrap();
        session.reset();
        assert!(session.anomalies().is_empty());
        assert!(session.outcomes().is_empty());
        assert_eq!(session.index().detector_names(), Err(IndexError::NotBuilt));
    }
}
