//! IoT Security Detector
//!
//! Only private-range sources are considered; those are the devices on the
//! local segment. Rules (fixed thresholds):
//! - Fingerprint deviation: the first half of a source's packets (at least 20)
//!   is its profile. A profile with <= 3 protocols is device-like; flag when
//!   >= 20% of the later packets use protocols outside the profile.
//! - Mass scan: >= 50 distinct destination IPs inside any 60 s window.

use std::collections::{BTreeSet, HashMap};

use super::{non_empty, sorted_groups};
use crate::logic::anomaly::{risk_from_exceedance, scaled_risk, AnomalyBuilder, AnomalyCategory, AnomalyRecord, AnomalyType};
use crate::logic::detection::cancel::CancellationToken;
use crate::logic::detection::types::DetectionError;
use crate::logic::detection::window::{self, peak_distinct, sort_chronologically};
use crate::logic::detection::Detector;
use crate::logic::packet::{is_private_ip, PacketRecord};

// ============================================================================
// CONSTANTS
// ============================================================================

pub const NAME: &str = "iot-security";

/// Minimum packets in the profile half
pub const MIN_PROFILE_PACKETS: usize = 20;

/// Devices speak few protocols
pub const MAX_PROFILE_PROTOCOLS: usize = 3;

/// Share of later packets using unseen protocols
pub const DEVIATION_RATIO: f64 = 0.2;

/// Distinct destinations inside `MASS_SCAN_WINDOW_SECS`
pub const MASS_SCAN_DISTINCT_HOSTS: usize = 50;

const MASS_SCAN_WINDOW_SECS: i64 = 60;

const DEVIATION_BASE_RISK: f64 = 0.4;
const DEVIATION_RISK_CEILING: f64 = 0.75;
const MASS_SCAN_BASE_RISK: f64 = 0.55;

// ============================================================================
// DETECTOR
// ============================================================================

pub struct IotDetector;

impl Detector for IotDetector {
    fn name(&self) -> &str {
        NAME
    }

    fn category(&self) -> AnomalyCategory {
        AnomalyCategory::Iot
    }

    fn detect(&self, packets: &[PacketRecord], cancel: &CancellationToken) -> Result<Vec<AnomalyRecord>, DetectionError> {
        let mut devices: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, packet) in packets.iter().enumerate() {
            cancel.poll(i)?;
            if let Some(src) = non_empty(&packet.src_ip) {
                if is_private_ip(src) {
                    devices.entry(src).or_default().push(i);
                }
            }
        }

        let mut anomalies = Vec::new();
        for (device, mut indices) in sorted_groups(devices) {
            cancel.check()?;
            sort_chronologically(&mut indices, packets);
            anomalies.extend(check_fingerprint(device, &indices, packets));
            anomalies.extend(check_mass_scan(device, &indices, packets));
        }

        log::debug!("{}: {} anomalies from {} packets", NAME, anomalies.len(), packets.len());
        Ok(anomalies)
    }
}

fn check_fingerprint(device: &str, indices: &[usize], packets: &[PacketRecord]) -> Option<AnomalyRecord> {
    let split = indices.len() / 2;
    if split < MIN_PROFILE_PACKETS {
        return None;
    }
    let (profile_half, later_half) = indices.split_at(split);

    let profile: BTreeSet<String> = profile_half.iter().map(|&i| packets[i].effective_protocol()).collect();
    if profile.len() > MAX_PROFILE_PROTOCOLS {
        return None;
    }

    let novel: Vec<(usize, String)> = later_half
        .iter()
        .map(|&i| (i, packets[i].effective_protocol()))
        .filter(|(_, protocol)| !profile.contains(protocol))
        .collect();
    let ratio = novel.len() as f64 / later_half.len() as f64;
    if ratio < DEVIATION_RATIO {
        return None;
    }

    let new_protocols: BTreeSet<&str> = novel.iter().map(|(_, p)| p.as_str()).collect();
    let profile_list = profile.iter().map(String::as_str).collect::<Vec<_>>().join(", ");
    let new_list = new_protocols.iter().copied().collect::<Vec<_>>().join(", ");
    let risk = scaled_risk(DEVIATION_BASE_RISK, DEVIATION_RISK_CEILING, ratio, DEVIATION_RATIO);

    let mut builder = AnomalyBuilder::new(AnomalyType::DeviceFingerprintDeviation, NAME)
        .risk(risk)
        .ip(device)
        .description(format!("{} changed behaviour ({} new protocol(s))", device, new_protocols.len()))
        .detailed_analysis(format!(
            "{} established a narrow profile [{}] over its first {} packets, then {:.0}% of the next {} \
             packets used [{}]. A device suddenly speaking new protocols may be compromised.",
            device,
            profile_list,
            profile_half.len(),
            ratio * 100.0,
            later_half.len(),
            new_list
        ))
        .meta("profile_protocols", profile_list.clone())
        .meta("new_protocols", new_list.clone())
        .meta("deviation_ratio", ratio);

    for (i, _) in &novel {
        builder.record_packet(&packets[*i]);
        builder.add_ip(&packets[*i].dst_ip);
        builder.add_port(packets[*i].dst_port);
    }
    builder.build()
}

fn check_mass_scan(device: &str, indices: &[usize], packets: &[PacketRecord]) -> Option<AnomalyRecord> {
    if indices.len() < MASS_SCAN_DISTINCT_HOSTS {
        return None;
    }
    let peak = peak_distinct(indices, packets, window::secs(MASS_SCAN_WINDOW_SECS), |p| non_empty(&p.dst_ip));
    let distinct = peak.value as usize;
    if distinct < MASS_SCAN_DISTINCT_HOSTS {
        return None;
    }

    let outbound: Vec<usize> = indices.iter().copied().filter(|&i| non_empty(&packets[i].dst_ip).is_some()).collect();
    let ports: BTreeSet<u16> = outbound.iter().map(|&i| packets[i].dst_port).filter(|&p| p != 0).collect();
    let risk = risk_from_exceedance(MASS_SCAN_BASE_RISK, distinct as f64, MASS_SCAN_DISTINCT_HOSTS as f64);

    let mut builder = AnomalyBuilder::new(AnomalyType::IotMassScan, NAME)
        .risk(risk)
        .ip(device)
        .description(format!("{} contacted {} hosts within {}s", device, distinct, MASS_SCAN_WINDOW_SECS))
        .detailed_analysis(format!(
            "Local device {} reached {} distinct destinations inside {}s (threshold {}), across {} \
             destination port(s). Botnet-infected devices sweep address space like this.",
            device,
            distinct,
            MASS_SCAN_WINDOW_SECS,
            MASS_SCAN_DISTINCT_HOSTS,
            ports.len()
        ))
        .meta("distinct_destinations", distinct)
        .meta("window_packets", peak.len())
        .meta("window_secs", MASS_SCAN_WINDOW_SECS);

    for &i in &outbound {
        builder.record_packet(&packets[i]);
    }
    for port in ports {
        builder.add_port(port);
    }
    builder.build()
}
