//! Anomaly Rules & Limits
//!
//! Constants only. Band edges are inclusive at the lower bound:
//! [0, 0.3) Low, [0.3, 0.6) Medium, [0.6, 0.8) High, [0.8, 1.0] Critical.

// ============================================================================
// SEVERITY BANDS
// ============================================================================

/// At or above this score = Medium
pub const MEDIUM_MIN: f64 = 0.3;

/// At or above this score = High
pub const HIGH_MIN: f64 = 0.6;

/// At or above this score = Critical
pub const CRITICAL_MIN: f64 = 0.8;

// ============================================================================
// RECORD LIMITS
// ============================================================================

/// Sample frames retained per record; further matches only bump the occurrence count
pub const MAX_SAMPLE_FRAMES: usize = 100;
