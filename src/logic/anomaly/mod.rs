//! Anomaly Module
//!
//! Unified output of every detector.
//!
//! ## Structure
//! - `types`: `AnomalyRecord`, `Severity`, `AnomalyCategory`, `AnomalyType`, `MetadataValue`
//! - `rules`: severity bands and record limits
//! - `scoring`: shared risk -> severity mapping
//! - `builder`: `AnomalyBuilder`, the only way detectors create records

pub mod types;
pub mod rules;
pub mod scoring;
pub mod builder;

pub use types::{AnomalyCategory, AnomalyRecord, AnomalyType, MetadataValue, Severity};
pub use rules::MAX_SAMPLE_FRAMES;
pub use scoring::{combine_risk, level_for_score, risk_from_exceedance, scaled_risk, SeverityScore};
pub use builder::AnomalyBuilder;
