//! Configuration module
//!
//! Execution policy only. Thresholds stay detector-owned constants.

use crate::constants;

/// Analysis configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisConfig {
    /// Run detectors concurrently (one scoped thread per detector)
    pub parallel_detection: bool,

    /// Restrict the engine to these detector names (None = every detector)
    pub enabled_detectors: Option<Vec<String>>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            parallel_detection: constants::DEFAULT_PARALLEL_DETECTION,
            enabled_detectors: None,
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            parallel_detection: constants::get_parallel_detection(),
            enabled_detectors: constants::get_enabled_detectors(),
        }
    }

    /// Sequential execution, mostly useful for deterministic debugging
    pub fn sequential() -> Self {
        Self {
            parallel_detection: false,
            ..Default::default()
        }
    }

    pub fn with_detectors<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_detectors = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Is this detector enabled by the config?
    pub fn is_enabled(&self, name: &str) -> bool {
        match &self.enabled_detectors {
            Some(names) => names.iter().any(|n| n.eq_ignore_ascii_case(name)),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_enables_everything() {
        let config = AnalysisConfig::default();
        assert!(config.parallel_detection);
        assert!(config.is_enabled("network-layer"));
        assert!(config.is_enabled("anything"));
    }

    #[test]
    fn test_enabled_detectors_filter() {
        let config = AnalysisConfig::sequential().with_detectors(["tcp-analysis", "VOIP-QUALITY"]);
        assert!(!config.parallel_detection);
        assert!(config.is_enabled("tcp-analysis"));
        assert!(config.is_enabled("voip-quality"));
        assert!(!config.is_enabled("network-layer"));
    }
}
