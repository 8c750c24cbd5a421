//! Anomaly Types
//!
//! Core types for detector output.
//! KHÔNG chứa logic detect - chỉ data structures.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// SEVERITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Severity::Low, Severity::Medium, Severity::High, Severity::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }

    pub fn level(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CATEGORY
// ============================================================================

/// Closed set of threat categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnomalyCategory {
    Network,
    Tcp,
    Application,
    CryptoMining,
    Exfiltration,
    Iot,
    Voip,
}

impl AnomalyCategory {
    pub const ALL: [AnomalyCategory; 7] = [
        AnomalyCategory::Network,
        AnomalyCategory::Tcp,
        AnomalyCategory::Application,
        AnomalyCategory::CryptoMining,
        AnomalyCategory::Exfiltration,
        AnomalyCategory::Iot,
        AnomalyCategory::Voip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyCategory::Network => "Network",
            AnomalyCategory::Tcp => "TCP",
            AnomalyCategory::Application => "Application",
            AnomalyCategory::CryptoMining => "Crypto Mining",
            AnomalyCategory::Exfiltration => "Exfiltration",
            AnomalyCategory::Iot => "IoT",
            AnomalyCategory::Voip => "VoIP",
        }
    }
}

impl fmt::Display for AnomalyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// ANOMALY TYPE
// ============================================================================

/// Specific pattern a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalyType {
    // Network layer
    SynFlood,
    IcmpFlood,
    ArpSpoofing,
    PortScan,
    // TCP
    TcpRetransmissions,
    DuplicateAckBurst,
    ZeroWindowRun,
    RstStorm,
    // Application
    ProtocolPortMismatch,
    MalformedProtocol,
    CleartextCredentials,
    // Crypto mining
    CryptoMining,
    // Exfiltration
    LargeDataTransfer,
    DnsExfiltration,
    // IoT
    DeviceFingerprintDeviation,
    IotMassScan,
    // VoIP
    VoipQualityDegradation,
}

impl AnomalyType {
    pub fn category(&self) -> AnomalyCategory {
        match self {
            AnomalyType::SynFlood
            | AnomalyType::IcmpFlood
            | AnomalyType::ArpSpoofing
            | AnomalyType::PortScan => AnomalyCategory::Network,
            AnomalyType::TcpRetransmissions
            | AnomalyType::DuplicateAckBurst
            | AnomalyType::ZeroWindowRun
            | AnomalyType::RstStorm => AnomalyCategory::Tcp,
            AnomalyType::ProtocolPortMismatch
            | AnomalyType::MalformedProtocol
            | AnomalyType::CleartextCredentials => AnomalyCategory::Application,
            AnomalyType::CryptoMining => AnomalyCategory::CryptoMining,
            AnomalyType::LargeDataTransfer | AnomalyType::DnsExfiltration => AnomalyCategory::Exfiltration,
            AnomalyType::DeviceFingerprintDeviation | AnomalyType::IotMassScan => AnomalyCategory::Iot,
            AnomalyType::VoipQualityDegradation => AnomalyCategory::Voip,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AnomalyType::SynFlood => "SYN Flood",
            AnomalyType::IcmpFlood => "ICMP Flood",
            AnomalyType::ArpSpoofing => "ARP Spoofing",
            AnomalyType::PortScan => "Port Scan",
            AnomalyType::TcpRetransmissions => "Excessive TCP Retransmissions",
            AnomalyType::DuplicateAckBurst => "Duplicate ACK Burst",
            AnomalyType::ZeroWindowRun => "TCP Zero Window",
            AnomalyType::RstStorm => "RST Storm",
            AnomalyType::ProtocolPortMismatch => "Protocol/Port Mismatch",
            AnomalyType::MalformedProtocol => "Malformed Protocol Data",
            AnomalyType::CleartextCredentials => "Cleartext Credentials",
            AnomalyType::CryptoMining => "Cryptocurrency Mining",
            AnomalyType::LargeDataTransfer => "Large Outbound Transfer",
            AnomalyType::DnsExfiltration => "DNS Exfiltration",
            AnomalyType::DeviceFingerprintDeviation => "Device Fingerprint Deviation",
            AnomalyType::IotMassScan => "IoT Mass Scan",
            AnomalyType::VoipQualityDegradation => "VoIP Quality Degradation",
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.title())
    }
}

// ============================================================================
// METADATA
// ============================================================================

/// Detector-specific fact, restricted to primitives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Integer(v)
    }
}

impl From<u64> for MetadataValue {
    fn from(v: u64) -> Self {
        MetadataValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<usize> for MetadataValue {
    fn from(v: usize) -> Self {
        MetadataValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<u16> for MetadataValue {
    fn from(v: u16) -> Self {
        MetadataValue::Integer(v as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Text(v)
    }
}

// ============================================================================
// ANOMALY RECORD
// ============================================================================

/// One detected pattern instance
///
/// Built through `AnomalyBuilder`; fields are public for read access by
/// exporters but records are never mutated after a detection pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub id: Uuid,
    pub anomaly_type: AnomalyType,
    pub category: AnomalyCategory,
    pub severity: Severity,
    /// Continuous score in [0, 1]
    pub severity_score: f64,
    pub description: String,
    pub detailed_analysis: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Raw matches folded into this record (>= sample_frames.len())
    pub occurrence_count: u64,
    pub affected_ips: BTreeSet<String>,
    pub affected_ports: BTreeSet<u16>,
    /// First matching frames, at most `MAX_SAMPLE_FRAMES`
    pub sample_frames: Vec<u64>,
    pub metadata: BTreeMap<String, MetadataValue>,
    pub detector_name: String,
}

impl AnomalyRecord {
    pub fn metadata_value(&self, key: &str) -> Option<&MetadataValue> {
        self.metadata.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_type_maps_to_category() {
        assert_eq!(AnomalyType::SynFlood.category(), AnomalyCategory::Network);
        assert_eq!(AnomalyType::RstStorm.category(), AnomalyCategory::Tcp);
        assert_eq!(AnomalyType::CleartextCredentials.category(), AnomalyCategory::Application);
        assert_eq!(AnomalyType::CryptoMining.category(), AnomalyCategory::CryptoMining);
        assert_eq!(AnomalyType::DnsExfiltration.category(), AnomalyCategory::Exfiltration);
        assert_eq!(AnomalyType::IotMassScan.category(), AnomalyCategory::Iot);
        assert_eq!(AnomalyType::VoipQualityDegradation.category(), AnomalyCategory::Voip);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::High.level(), 3);
    }

    #[test]
    fn test_metadata_serializes_as_plain_json() {
        let mut map = BTreeMap::new();
        map.insert("rate".to_string(), MetadataValue::from(333.5));
        map.insert("count".to_string(), MetadataValue::from(1000usize));
        map.insert("target".to_string(), MetadataValue::from("192.168.1.100"));
        map.insert("spoofed".to_string(), MetadataValue::from(true));

        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["rate"], serde_json::json!(333.5));
        assert_eq!(json["count"], serde_json::json!(1000));
        assert_eq!(json["target"], serde_json::json!("192.168.1.100"));
        assert_eq!(json["spoofed"], serde_json::json!(true));
    }
}
