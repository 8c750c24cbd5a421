//! Logic Module - Detection Core
//!
//! Chứa toàn bộ logic phân tích: packet model, anomaly model, detectors, index.
//!
//! ## Layout
//! - `packet/` - Packet Record (read-only input) + address helpers
//! - `anomaly/` - Anomaly Record, severity scoring, record builder
//! - `detection/` - detector contract, seven detectors, orchestrator
//! - `index/` - inverted index for filtered highlighting
//! - `session.rs` - caller-owned analysis context

pub mod packet;
pub mod anomaly;
pub mod detection;
pub mod index;
pub mod session;
