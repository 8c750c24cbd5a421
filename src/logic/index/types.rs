//! Index Types

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logic::anomaly::{AnomalyCategory, Severity};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    /// Queried before the first `build` (or after `clear`)
    #[error("anomaly index has not been built")]
    NotBuilt,
}

// ============================================================================
// FILTER
// ============================================================================

/// Three optional facets
///
/// `None` = facet not active. `Some(empty)` is an active facet that matches
/// nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnomalyFilter {
    pub severities: Option<BTreeSet<Severity>>,
    pub categories: Option<BTreeSet<AnomalyCategory>>,
    pub detectors: Option<BTreeSet<String>>,
}

impl AnomalyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the nullable-triple form used by callers
    pub fn from_facets(
        severities: Option<&[Severity]>,
        categories: Option<&[AnomalyCategory]>,
        detectors: Option<&[&str]>,
    ) -> Self {
        Self {
            severities: severities.map(|s| s.iter().copied().collect()),
            categories: categories.map(|c| c.iter().copied().collect()),
            detectors: detectors.map(|d| d.iter().map(|name| name.to_string()).collect()),
        }
    }

    pub fn with_severities<I: IntoIterator<Item = Severity>>(mut self, severities: I) -> Self {
        self.severities = Some(severities.into_iter().collect());
        self
    }

    pub fn with_categories<I: IntoIterator<Item = AnomalyCategory>>(mut self, categories: I) -> Self {
        self.categories = Some(categories.into_iter().collect());
        self
    }

    pub fn with_detectors<I, S>(mut self, detectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.detectors = Some(detectors.into_iter().map(Into::into).collect());
        self
    }

    /// No facet active
    pub fn is_unfiltered(&self) -> bool {
        self.severities.is_none() && self.categories.is_none() && self.detectors.is_none()
    }
}

// ============================================================================
// STATS
// ============================================================================

/// Snapshot summary for dashboards and exporters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub anomaly_count: usize,
    pub indexed_frames: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_category: BTreeMap<AnomalyCategory, usize>,
    pub by_detector: BTreeMap<String, usize>,
    pub built_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_facets_keeps_null_vs_empty() {
        let filter = AnomalyFilter::from_facets(Some(&[Severity::High, Severity::Critical][..]), Some(&[][..]), None);
        assert_eq!(filter.severities.as_ref().map(|s| s.len()), Some(2));
        assert_eq!(filter.categories, Some(BTreeSet::new()));
        assert!(filter.detectors.is_none());
        assert!(!filter.is_unfiltered());
        assert!(AnomalyFilter::new().is_unfiltered());
    }

    #[test]
    fn test_builder_methods() {
        let filter = AnomalyFilter::new()
            .with_categories([AnomalyCategory::Tcp])
            .with_detectors(["tcp-analysis"]);
        assert!(filter.severities.is_none());
        assert!(filter.categories.as_ref().map_or(false, |c| c.contains(&AnomalyCategory::Tcp)));
        assert!(filter.detectors.as_ref().map_or(false, |d| d.contains("tcp-analysis")));
    }
}
