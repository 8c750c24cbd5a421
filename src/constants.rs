//! Central Configuration Constants
//!
//! Single source of truth for execution defaults.
//! Detector thresholds are NOT here - each detector owns its constants in its own module.

/// Crate version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name used in log lines
pub const APP_NAME: &str = "net-anomaly-core";

/// Run detectors on scoped worker threads by default
pub const DEFAULT_PARALLEL_DETECTION: bool = true;

/// Env var: "false"/"0" forces sequential detection
pub const ENV_PARALLEL_DETECTION: &str = "NET_ANOMALY_PARALLEL";

/// Env var: comma-separated detector names to enable (default: all)
pub const ENV_ENABLED_DETECTORS: &str = "NET_ANOMALY_DETECTORS";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Get parallel detection flag from environment or use default
pub fn get_parallel_detection() -> bool {
    match std::env::var(ENV_PARALLEL_DETECTION) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            other => {
                log::warn!("{}: ignoring invalid {}={:?}", APP_NAME, ENV_PARALLEL_DETECTION, other);
                DEFAULT_PARALLEL_DETECTION
            }
        },
        Err(_) => DEFAULT_PARALLEL_DETECTION,
    }
}

/// Get enabled detector names from environment (None = all detectors)
pub fn get_enabled_detectors() -> Option<Vec<String>> {
    let raw = std::env::var(ENV_ENABLED_DETECTORS).ok()?;
    let names: Vec<String> = raw
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();

    if names.is_empty() {
        log::warn!("{}: {} is set but empty, enabling all detectors", APP_NAME, ENV_ENABLED_DETECTORS);
        None
    } else {
        Some(names)
    }
}
