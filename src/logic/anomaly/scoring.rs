//! Severity Scoring
//!
//! Shared mapping from a detector's raw risk indicator to a score in [0, 1]
//! and a discrete `Severity`. Every detector goes through here so scores are
//! comparable across detectors.

use serde::{Deserialize, Serialize};

use super::rules::{CRITICAL_MIN, HIGH_MIN, MEDIUM_MIN};
use super::types::Severity;

// ============================================================================
// SEVERITY SCORE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityScore {
    pub score: f64,
    pub level: Severity,
}

impl SeverityScore {
    /// Clamp risk into [0, 1] (NaN -> 0) and map it to a band
    pub fn from_risk(risk: f64) -> Self {
        let score = unit(risk);
        Self {
            score,
            level: level_for_score(score),
        }
    }
}

/// Band table lookup; `score` is expected in [0, 1]
pub fn level_for_score(score: f64) -> Severity {
    if score >= CRITICAL_MIN {
        Severity::Critical
    } else if score >= HIGH_MIN {
        Severity::High
    } else if score >= MEDIUM_MIN {
        Severity::Medium
    } else {
        Severity::Low
    }
}

// ============================================================================
// RISK HELPERS
// ============================================================================

/// Risk for "observed went past threshold"
///
/// Returns `base` until `observed` reaches `threshold`, then climbs toward 1.0
/// as `base + (1 - base) * (1 - threshold / observed)`. Non-decreasing in
/// `observed`.
pub fn risk_from_exceedance(base: f64, observed: f64, threshold: f64) -> f64 {
    scaled_risk(base, 1.0, observed, threshold)
}

/// Same curve as `risk_from_exceedance` but approaching `ceiling` instead of 1.0
pub fn scaled_risk(base: f64, ceiling: f64, observed: f64, threshold: f64) -> f64 {
    let base = unit(base);
    let ceiling = unit(ceiling).max(base);
    if !observed.is_finite() || !threshold.is_finite() || threshold <= 0.0 || observed < threshold {
        return base;
    }
    let headroom = ceiling - base;
    (base + headroom * (1.0 - threshold / observed)).clamp(0.0, 1.0)
}

/// Probabilistic OR of two risks, for one group tripping two rules
pub fn combine_risk(a: f64, b: f64) -> f64 {
    1.0 - (1.0 - unit(a)) * (1.0 - unit(b))
}

fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
