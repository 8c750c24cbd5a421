//! Detector Variants
//!
//! One file per rule family. Each file documents its thresholds at the top;
//! the constants are part of the detector's contract, not configuration.
//!
//! Shared shape of every rule:
//! 1. one pass over the packets, filtering and grouping into a hash-keyed accumulator
//! 2. per group (sorted by key, so output order is stable): poll cancel, evaluate thresholds
//! 3. one `AnomalyRecord` per offending group

pub mod network;
pub mod tcp;
pub mod application;
pub mod crypto_mining;
pub mod exfiltration;
pub mod iot;
pub mod voip;

use std::collections::HashMap;
use std::hash::Hash;

pub use network::NetworkLayerDetector;
pub use tcp::TcpAnalysisDetector;
pub use application::ApplicationLayerDetector;
pub use crypto_mining::CryptoMiningDetector;
pub use exfiltration::ExfiltrationDetector;
pub use iot::IotDetector;
pub use voip::VoipQualityDetector;

/// Hash-keyed groups in deterministic key order
pub(crate) fn sorted_groups<K: Ord + Hash, V>(groups: HashMap<K, V>) -> Vec<(K, V)> {
    let mut list: Vec<(K, V)> = groups.into_iter().collect();
    list.sort_by(|a, b| a.0.cmp(&b.0));
    list
}

/// Trimmed, non-empty address
pub(crate) fn non_empty(ip: &str) -> Option<&str> {
    let ip = ip.trim();
    if ip.is_empty() {
        None
    } else {
        Some(ip)
    }
}

/// Case-insensitive substring test without allocating the haystack per marker
pub(crate) fn contains_any_ignore_case(haystack_lower: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| haystack_lower.contains(m))
}
