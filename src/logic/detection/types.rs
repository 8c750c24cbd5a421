//! Detection Types
//!
//! Errors and run reports. No detection logic here.

use serde::{Deserialize, Serialize};

use crate::logic::anomaly::{AnomalyCategory, AnomalyRecord};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetectionError {
    /// Cooperative cancellation; distinct from "no findings"
    #[error("detection cancelled")]
    Cancelled,

    #[error("unknown detector: {0}")]
    UnknownDetector(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Built by the orchestrator for a detector that panicked
    #[error("detector '{detector}' failed: {reason}")]
    Failed { detector: String, reason: String },
}

impl DetectionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DetectionError::Cancelled)
    }
}

// ============================================================================
// RUN REPORT
// ============================================================================

/// How one detector fared in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorOutcome {
    pub detector: String,
    pub category: AnomalyCategory,
    pub findings: usize,
    pub elapsed_ms: u64,
    /// Error or panic message; the detector contributed nothing
    pub error: Option<String>,
}

impl DetectorOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Merged result of one detection pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    /// Sorted: score desc, occurrence desc, registration order
    pub anomalies: Vec<AnomalyRecord>,
    /// One entry per detector that ran, in registration order
    pub outcomes: Vec<DetectorOutcome>,
    pub packet_count: usize,
    pub elapsed_ms: u64,
}

impl DetectionReport {
    pub fn failed_detectors(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.succeeded())
            .map(|o| o.detector.as_str())
            .collect()
    }

    pub fn is_partial(&self) -> bool {
        self.outcomes.iter().any(|o| !o.succeeded())
    }
}
