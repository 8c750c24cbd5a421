//! Detection Orchestrator
//!
//! Runs every registered detector over the same read-only packet slice,
//! isolates failures, merges and ranks the findings.
//!
//! # Guarantees
//! - A detector that returns `Err` or panics contributes nothing; the others
//!   still report (partial results, failure logged and listed in the report).
//! - Cancellation seen anywhere in the run yields `Err(Cancelled)`, never a
//!   partial list.
//! - Output order: severity score desc, occurrence count desc, then
//!   registration order (stable sort). Parallel and sequential runs agree.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Instant;

use super::cancel::CancellationToken;
use super::types::{DetectionError, DetectionReport, DetectorOutcome};
use super::{Detector, DetectorKind};
use crate::config::AnalysisConfig;
use crate::logic::anomaly::AnomalyRecord;
use crate::logic::packet::PacketRecord;

/// One detector's result plus its wall time in ms
type DetectorRun = (Result<Vec<AnomalyRecord>, DetectionError>, u64);

pub struct DetectionEngine {
    detectors: Vec<Box<dyn Detector>>,
    parallel: bool,
}

impl DetectionEngine {
    /// Built-in detectors in registration order, filtered by the config
    pub fn new(config: &AnalysisConfig) -> Self {
        if let Some(names) = &config.enabled_detectors {
            for name in names {
                if DetectorKind::from_name(name).is_none() {
                    log::warn!("Ignoring unknown detector in config: {}", name);
                }
            }
        }

        let detectors = DetectorKind::ALL
            .iter()
            .filter(|kind| config.is_enabled(kind.name()))
            .map(|kind| kind.create())
            .collect();
        Self::with_detectors(detectors, config.parallel_detection)
    }

    /// Arbitrary detector list, registration order = list order
    pub fn with_detectors(detectors: Vec<Box<dyn Detector>>, parallel: bool) -> Self {
        Self { detectors, parallel }
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn detector_names(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// Every registered detector; merged and sorted findings
    pub fn detect_all(
        &self,
        packets: &[PacketRecord],
        cancel: &CancellationToken,
    ) -> Result<Vec<AnomalyRecord>, DetectionError> {
        self.run(packets, cancel).map(|report| report.anomalies)
    }

    /// Targeted re-scan with the named detectors only
    ///
    /// Names resolve against the registered detectors first, then against the
    /// built-in set, so a detector disabled by config can still be run on demand.
    pub fn detect_with(
        &self,
        names: &[&str],
        packets: &[PacketRecord],
        cancel: &CancellationToken,
    ) -> Result<Vec<AnomalyRecord>, DetectionError> {
        if names.is_empty() {
            return Err(DetectionError::InvalidInput("no detector names given".to_string()));
        }

        let mut registered: Vec<usize> = Vec::new();
        let mut builtin: Vec<DetectorKind> = Vec::new();
        for name in names {
            let name = name.trim();
            if let Some(pos) = self.detectors.iter().position(|d| d.name().eq_ignore_ascii_case(name)) {
                registered.push(pos);
            } else if let Some(kind) = DetectorKind::from_name(name) {
                builtin.push(kind);
            } else {
                return Err(DetectionError::UnknownDetector(name.to_string()));
            }
        }

        // Run order is registration order, not argument order: ties in the
        // ranking fall back to it.
        registered.sort_unstable();
        registered.dedup();
        let extra: Vec<Box<dyn Detector>> = DetectorKind::ALL
            .iter()
            .filter(|kind| builtin.contains(*kind))
            .map(|kind| kind.create())
            .collect();

        let mut selected: Vec<&dyn Detector> = registered.iter().map(|&pos| self.detectors[pos].as_ref()).collect();
        selected.extend(extra.iter().map(|d| d.as_ref()));

        self.execute(&selected, packets, cancel).map(|report| report.anomalies)
    }

    /// Full run with per-detector outcomes
    pub fn run(&self, packets: &[PacketRecord], cancel: &CancellationToken) -> Result<DetectionReport, DetectionError> {
        let selected: Vec<&dyn Detector> = self.detectors.iter().map(|d| d.as_ref()).collect();
        self.execute(&selected, packets, cancel)
    }

    // ========================================================================
    // EXECUTION
    // ========================================================================

    fn execute(
        &self,
        detectors: &[&dyn Detector],
        packets: &[PacketRecord],
        cancel: &CancellationToken,
    ) -> Result<DetectionReport, DetectionError> {
        cancel.check()?;
        let started = Instant::now();
        log::info!(
            "Detection started: {} packets, {} detectors ({})",
            packets.len(),
            detectors.len(),
            if self.parallel { "parallel" } else { "sequential" }
        );

        let runs: Vec<Result<DetectorRun, String>> = if self.parallel && detectors.len() > 1 {
            run_parallel(detectors, packets, cancel)
        } else {
            run_sequential(detectors, packets, cancel)
        };

        let mut anomalies = Vec::new();
        let mut outcomes = Vec::with_capacity(detectors.len());
        let mut cancelled = false;

        for (detector, run) in detectors.iter().zip(runs) {
            let name = detector.name().to_string();
            let category = detector.category();
            match run {
                Ok((Ok(records), elapsed_ms)) => {
                    log::debug!("Detector {} ({}) finished: {} findings in {}ms", name, category, records.len(), elapsed_ms);
                    outcomes.push(DetectorOutcome { detector: name, category, findings: records.len(), elapsed_ms, error: None });
                    anomalies.extend(records);
                }
                Ok((Err(DetectionError::Cancelled), _)) => {
                    cancelled = true;
                }
                Ok((Err(e), elapsed_ms)) => {
                    log::error!("Detector {} ({}) failed: {}", name, category, e);
                    outcomes.push(DetectorOutcome { detector: name, category, findings: 0, elapsed_ms, error: Some(e.to_string()) });
                }
                Err(panic_message) => {
                    let failure = DetectionError::Failed { detector: name.clone(), reason: format!("panicked: {}", panic_message) };
                    log::error!("{} ({})", failure, category);
                    outcomes.push(DetectorOutcome { detector: name, category, findings: 0, elapsed_ms: 0, error: Some(failure.to_string()) });
                }
            }
        }

        if cancelled || cancel.is_cancelled() {
            log::warn!("Detection cancelled after {}ms", elapsed_ms(started));
            return Err(DetectionError::Cancelled);
        }

        sort_anomalies(&mut anomalies);
        let report = DetectionReport { anomalies, outcomes, packet_count: packets.len(), elapsed_ms: elapsed_ms(started) };
        log::info!(
            "Detection finished: {} anomalies from {} packets in {}ms ({} detector failures)",
            report.anomalies.len(),
            report.packet_count,
            report.elapsed_ms,
            report.failed_detectors().len()
        );
        Ok(report)
    }
}

fn run_one(detector: &dyn Detector, packets: &[PacketRecord], cancel: &CancellationToken) -> DetectorRun {
    let started = Instant::now();
    let result = detector.detect(packets, cancel);
    (result, elapsed_ms(started))
}

/// One scoped thread per detector; all joined before returning
fn run_parallel(
    detectors: &[&dyn Detector],
    packets: &[PacketRecord],
    cancel: &CancellationToken,
) -> Vec<Result<DetectorRun, String>> {
    thread::scope(|scope| {
        let handles: Vec<_> = detectors
            .iter()
            .map(|&detector| scope.spawn(move || run_one(detector, packets, cancel)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().map_err(panic_message))
            .collect()
    })
}

fn run_sequential(
    detectors: &[&dyn Detector],
    packets: &[PacketRecord],
    cancel: &CancellationToken,
) -> Vec<Result<DetectorRun, String>> {
    detectors
        .iter()
        .map(|&detector| {
            panic::catch_unwind(AssertUnwindSafe(|| run_one(detector, packets, cancel))).map_err(panic_message)
        })
        .collect()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Score desc, occurrence desc; stable so ties keep registration order
pub fn sort_anomalies(anomalies: &mut [AnomalyRecord]) {
    anomalies.sort_by(|a, b| {
        b.severity_score
            .total_cmp(&a.severity_score)
            .then_with(|| b.occurrence_count.cmp(&a.occurrence_count))
    });
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
