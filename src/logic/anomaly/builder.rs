//! Anomaly Builder
//!
//! Accumulates matches for one offending group and produces one
//! `AnomalyRecord`. Holds the record invariants:
//! - sample frames capped at `MAX_SAMPLE_FRAMES`
//! - occurrence count >= sample frames, >= 1
//! - last_seen >= first_seen
//! - score in [0, 1], level from the shared band table

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::rules::MAX_SAMPLE_FRAMES;
use super::scoring::SeverityScore;
use super::types::{AnomalyRecord, AnomalyType, MetadataValue};
use crate::logic::packet::PacketRecord;

pub struct AnomalyBuilder {
    anomaly_type: AnomalyType,
    detector_name: String,
    risk: f64,
    description: String,
    detailed_analysis: String,
    first_seen: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    occurrence_count: u64,
    sample_frames: Vec<u64>,
    affected_ips: BTreeSet<String>,
    affected_ports: BTreeSet<u16>,
    metadata: BTreeMap<String, MetadataValue>,
}

impl AnomalyBuilder {
    pub fn new(anomaly_type: AnomalyType, detector_name: &str) -> Self {
        Self {
            anomaly_type,
            detector_name: detector_name.to_string(),
            risk: 0.0,
            description: anomaly_type.title().to_string(),
            detailed_analysis: String::new(),
            first_seen: None,
            last_seen: None,
            occurrence_count: 0,
            sample_frames: Vec::new(),
            affected_ips: BTreeSet::new(),
            affected_ports: BTreeSet::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Record one raw match
    pub fn record_match(&mut self, frame: u64, timestamp: DateTime<Utc>) {
        self.occurrence_count += 1;
        if self.sample_frames.len() < MAX_SAMPLE_FRAMES {
            self.sample_frames.push(frame);
        }
        self.first_seen = Some(match self.first_seen {
            Some(first) if first <= timestamp => first,
            _ => timestamp,
        });
        self.last_seen = Some(match self.last_seen {
            Some(last) if last >= timestamp => last,
            _ => timestamp,
        });
    }

    pub fn record_packet(&mut self, packet: &PacketRecord) {
        self.record_match(packet.frame_number, packet.timestamp);
    }

    pub fn record_packets<'a, I>(&mut self, packets: I)
    where
        I: IntoIterator<Item = &'a PacketRecord>,
    {
        for packet in packets {
            self.record_packet(packet);
        }
    }

    pub fn risk(mut self, risk: f64) -> Self {
        self.risk = risk;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn detailed_analysis(mut self, detail: impl Into<String>) -> Self {
        self.detailed_analysis = detail.into();
        self
    }

    /// Empty strings are skipped
    pub fn ip(mut self, ip: &str) -> Self {
        self.add_ip(ip);
        self
    }

    pub fn add_ip(&mut self, ip: &str) {
        let ip = ip.trim();
        if !ip.is_empty() {
            self.affected_ips.insert(ip.to_string());
        }
    }

    /// Port 0 is skipped
    pub fn port(mut self, port: u16) -> Self {
        self.add_port(port);
        self
    }

    pub fn add_port(&mut self, port: u16) {
        if port != 0 {
            self.affected_ports.insert(port);
        }
    }

    pub fn meta(mut self, key: &str, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn occurrence_count(&self) -> u64 {
        self.occurrence_count
    }

    /// None when no match was recorded
    pub fn build(self) -> Option<AnomalyRecord> {
        let first_seen = self.first_seen?;
        let last_seen = self.last_seen.unwrap_or(first_seen);
        let scored = SeverityScore::from_risk(self.risk);

        Some(AnomalyRecord {
            id: Uuid::new_v4(),
            anomaly_type: self.anomaly_type,
            category: self.anomaly_type.category(),
            severity: scored.level,
            severity_score: scored.score,
            description: self.description,
            detailed_analysis: self.detailed_analysis,
            first_seen,
            last_seen,
            occurrence_count: self.occurrence_count,
            affected_ips: self.affected_ips,
            affected_ports: self.affected_ports,
            sample_frames: self.sample_frames,
            metadata: self.metadata,
            detector_name: self.detector_name,
        })
    }
}
