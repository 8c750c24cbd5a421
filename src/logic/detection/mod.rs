//! Detection Module - Rule/Threshold Based Anomaly Detection
//!
//! Mục đích: Quét một snapshot packet cố định, mỗi detector một họ rules.
//!
//! # Components
//! - `types.rs`: `DetectionError`, `DetectorOutcome`, `DetectionReport`
//! - `cancel.rs`: cooperative `CancellationToken`
//! - `window.rs`: sliding time-window helpers (peak count / peak sum)
//! - `entropy.rs`: Shannon entropy over DNS subdomains with caller-owned scratch
//! - `detectors/`: the seven detector variants
//! - `orchestrator.rs`: `DetectionEngine` (run all, isolate failures, merge, sort)
//!
//! # Contract
//! `detect(packets, cancel)` returns `Ok(vec![])` for "no findings",
//! `Err(DetectionError::Cancelled)` when cancelled, one record per offending group.

pub mod types;
pub mod cancel;
pub mod window;
pub mod entropy;
pub mod detectors;
pub mod orchestrator;
#[cfg(test)]
mod tests;

use std::fmt;

use crate::logic::anomaly::{AnomalyCategory, AnomalyRecord};
use crate::logic::packet::PacketRecord;

pub use types::{DetectionError, DetectionReport, DetectorOutcome};
pub use cancel::CancellationToken;
pub use entropy::EntropyScratch;
pub use detectors::{
    ApplicationLayerDetector, CryptoMiningDetector, ExfiltrationDetector, IotDetector,
    NetworkLayerDetector, TcpAnalysisDetector, VoipQualityDetector,
};
pub use orchestrator::DetectionEngine;

// ============================================================================
// DETECTOR CONTRACT
// ============================================================================

/// One family of threshold rules over a packet snapshot
///
/// Implementations only read `packets`; they may run on any thread.
pub trait Detector: Send + Sync {
    /// Stable name, used for targeted runs and index facets
    fn name(&self) -> &str;

    fn category(&self) -> AnomalyCategory;

    fn detect(
        &self,
        packets: &[PacketRecord],
        cancel: &CancellationToken,
    ) -> Result<Vec<AnomalyRecord>, DetectionError>;
}

// ============================================================================
// DETECTOR KINDS (closed set)
// ============================================================================

/// Every built-in detector, in registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    NetworkLayer,
    TcpAnalysis,
    ApplicationLayer,
    CryptoMining,
    Exfiltration,
    Iot,
    Voip,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 7] = [
        DetectorKind::NetworkLayer,
        DetectorKind::TcpAnalysis,
        DetectorKind::ApplicationLayer,
        DetectorKind::CryptoMining,
        DetectorKind::Exfiltration,
        DetectorKind::Iot,
        DetectorKind::Voip,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DetectorKind::NetworkLayer => detectors::network::NAME,
            DetectorKind::TcpAnalysis => detectors::tcp::NAME,
            DetectorKind::ApplicationLayer => detectors::application::NAME,
            DetectorKind::CryptoMining => detectors::crypto_mining::NAME,
            DetectorKind::Exfiltration => detectors::exfiltration::NAME,
            DetectorKind::Iot => detectors::iot::NAME,
            DetectorKind::Voip => detectors::voip::NAME,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name().eq_ignore_ascii_case(name.trim()))
    }

    pub fn create(&self) -> Box<dyn Detector> {
        match self {
            DetectorKind::NetworkLayer => Box::new(NetworkLayerDetector),
            DetectorKind::TcpAnalysis => Box::new(TcpAnalysisDetector),
            DetectorKind::ApplicationLayer => Box::new(ApplicationLayerDetector),
            DetectorKind::CryptoMining => Box::new(CryptoMiningDetector),
            DetectorKind::Exfiltration => Box::new(ExfiltrationDetector),
            DetectorKind::Iot => Box::new(IotDetector),
            DetectorKind::Voip => Box::new(VoipQualityDetector),
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
