//! Index Snapshot
//!
//! Immutable once built. Posting lists hold positions into the shared
//! anomaly slice, ascending, so query results come back in input order.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::types::{AnomalyFilter, IndexStats};
use crate::logic::anomaly::{AnomalyCategory, AnomalyRecord, Severity};

#[derive(Debug)]
pub struct IndexSnapshot {
    anomalies: Arc<[AnomalyRecord]>,
    by_frame: HashMap<u64, Vec<usize>>,
    by_detector: BTreeMap<String, Vec<usize>>,
    by_severity: HashMap<Severity, Vec<usize>>,
    by_category: HashMap<AnomalyCategory, Vec<usize>>,
    built_at: DateTime<Utc>,
}

impl IndexSnapshot {
    /// One pass over the records
    pub fn build(anomalies: Arc<[AnomalyRecord]>) -> Self {
        let mut by_frame: HashMap<u64, Vec<usize>> = HashMap::new();
        let mut by_detector: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut by_severity: HashMap<Severity, Vec<usize>> = HashMap::new();
        let mut by_category: HashMap<AnomalyCategory, Vec<usize>> = HashMap::new();

        for (pos, record) in anomalies.iter().enumerate() {
            for &frame in &record.sample_frames {
                let postings = by_frame.entry(frame).or_default();
                if postings.last() != Some(&pos) {
                    postings.push(pos);
                }
            }
            by_detector.entry(record.detector_name.clone()).or_default().push(pos);
            by_severity.entry(record.severity).or_default().push(pos);
            by_category.entry(record.category).or_default().push(pos);
        }

        Self { anomalies, by_frame, by_detector, by_severity, by_category, built_at: Utc::now() }
    }

    pub fn anomalies(&self) -> &[AnomalyRecord] {
        &self.anomalies
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn indexed_frame_count(&self) -> usize {
        self.by_frame.len()
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// One position set per active facet (values inside a facet OR-ed)
    fn facet_positions(&self, filter: &AnomalyFilter) -> Vec<BTreeSet<usize>> {
        let mut facets = Vec::with_capacity(3);
        if let Some(severities) = &filter.severities {
            facets.push(union_postings(&self.by_severity, severities.iter()));
        }
        if let Some(categories) = &filter.categories {
            facets.push(union_postings(&self.by_category, categories.iter()));
        }
        if let Some(detectors) = &filter.detectors {
            let mut union = BTreeSet::new();
            for name in detectors {
                if let Some(postings) = self.by_detector.get(name) {
                    union.extend(postings.iter().copied());
                }
            }
            facets.push(union);
        }
        facets
    }

    /// Records satisfying every active facet, as ascending positions
    pub fn matching_positions(&self, filter: &AnomalyFilter) -> BTreeSet<usize> {
        intersect_all(self.facet_positions(filter))
    }

    /// Frames highlighted by every active facet
    ///
    /// Each facet resolves to the frames of its matching records; facets then
    /// intersect on frames. A frame implicated by a High record and by a Tcp
    /// record matches {High} AND {Tcp} even when no single record is both.
    pub fn frames_matching(&self, filter: &AnomalyFilter) -> BTreeSet<u64> {
        let per_facet: Vec<BTreeSet<u64>> = self
            .facet_positions(filter)
            .into_iter()
            .map(|positions| {
                positions
                    .into_iter()
                    .flat_map(|pos| self.anomalies[pos].sample_frames.iter().copied())
                    .collect()
            })
            .collect();
        intersect_all(per_facet)
    }

    pub fn filtered_anomalies(&self, filter: &AnomalyFilter) -> Vec<AnomalyRecord> {
        self.matching_positions(filter)
            .into_iter()
            .map(|pos| self.anomalies[pos].clone())
            .collect()
    }

    pub fn anomalies_for_frame(&self, frame: u64) -> Vec<AnomalyRecord> {
        self.by_frame
            .get(&frame)
            .map(|postings| postings.iter().map(|&pos| self.anomalies[pos].clone()).collect())
            .unwrap_or_default()
    }

    /// Distinct detector names, lexicographic
    pub fn detector_names(&self) -> Vec<String> {
        self.by_detector.keys().cloned().collect()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            anomaly_count: self.anomalies.len(),
            indexed_frames: self.by_frame.len(),
            by_severity: self.by_severity.iter().map(|(k, v)| (*k, v.len())).collect(),
            by_category: self.by_category.iter().map(|(k, v)| (*k, v.len())).collect(),
            by_detector: self.by_detector.iter().map(|(k, v)| (k.clone(), v.len())).collect(),
            built_at: self.built_at,
        }
    }
}

fn union_postings<'a, K, I>(map: &HashMap<K, Vec<usize>>, keys: I) -> BTreeSet<usize>
where
    K: Hash + Eq + 'a,
    I: Iterator<Item = &'a K>,
{
    let mut union = BTreeSet::new();
    for key in keys {
        if let Some(postings) = map.get(key) {
            union.extend(postings.iter().copied());
        }
    }
    union
}

/// Empty input (no active facet) gives the empty set
fn intersect_all<T: Ord + Copy>(sets: Vec<BTreeSet<T>>) -> BTreeSet<T> {
    let mut sets = sets.into_iter();
    let first = match sets.next() {
        Some(first) => first,
        None => return BTreeSet::new(),
    };
    sets.fold(first, |acc, set| acc.intersection(&set).copied().collect())
}
