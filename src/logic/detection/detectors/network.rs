//! Network Layer Detector
//!
//! Rules (fixed thresholds):
//! - SYN flood: TCP SYN (no ACK) grouped by destination IP. Flag when the peak
//!   1-second rate is >= 100 SYN/s AND SYN-ACKs sent back by the target are
//!   fewer than half of the SYNs (ratio < 0.5).
//! - ICMP flood: ICMP grouped by destination IP, peak rate >= 50 packets/s.
//! - ARP spoofing: packets labelled ARP grouped by destination IP; flag when
//!   more than one distinct source MAC claims it.
//! - Port scan: connection probes (TCP SYN, or UDP client -> lower port) grouped
//!   by (source, destination); >= 50 distinct destination ports within 60 s.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::{non_empty, sorted_groups};
use crate::logic::anomaly::{risk_from_exceedance, AnomalyBuilder, AnomalyCategory, AnomalyRecord, AnomalyType};
use crate::logic::detection::cancel::CancellationToken;
use crate::logic::detection::types::DetectionError;
use crate::logic::detection::window::{self, peak_count, peak_distinct, rate_per_sec, sort_chronologically};
use crate::logic::detection::Detector;
use crate::logic::packet::PacketRecord;

// ============================================================================
// CONSTANTS
// ============================================================================

pub const NAME: &str = "network-layer";

/// Sliding window used for every rate rule
const RATE_WINDOW_SECS: i64 = 1;

/// SYN/sec toward one destination
pub const SYN_FLOOD_RATE: f64 = 100.0;

/// SYN-ACK / SYN below this = handshakes are not completing
pub const SYN_ACK_RATIO_MAX: f64 = 0.5;

/// ICMP packets/sec toward one destination
pub const ICMP_FLOOD_RATE: f64 = 50.0;

/// More MACs than this for one IP = spoofing
pub const ARP_MAX_MACS_PER_IP: usize = 1;

/// Distinct destination ports from one source to one host
pub const PORT_SCAN_DISTINCT_PORTS: usize = 50;

const PORT_SCAN_WINDOW_SECS: i64 = 60;

const SYN_FLOOD_BASE_RISK: f64 = 0.6;
const ICMP_FLOOD_BASE_RISK: f64 = 0.5;
const ARP_SPOOF_BASE_RISK: f64 = 0.65;
const PORT_SCAN_BASE_RISK: f64 = 0.45;

// ============================================================================
// DETECTOR
// ============================================================================

pub struct NetworkLayerDetector;

impl Detector for NetworkLayerDetector {
    fn name(&self) -> &str {
        NAME
    }

    fn category(&self) -> AnomalyCategory {
        AnomalyCategory::Network
    }

    fn detect(&self, packets: &[PacketRecord], cancel: &CancellationToken) -> Result<Vec<AnomalyRecord>, DetectionError> {
        let mut anomalies = Vec::new();
        anomalies.extend(detect_syn_flood(packets, cancel)?);
        anomalies.extend(detect_icmp_flood(packets, cancel)?);
        anomalies.extend(detect_arp_spoofing(packets, cancel)?);
        anomalies.extend(detect_port_scan(packets, cancel)?);
        log::debug!("{}: {} anomalies from {} packets", NAME, anomalies.len(), packets.len());
        Ok(anomalies)
    }
}

// ============================================================================
// SYN FLOOD
// ============================================================================

fn detect_syn_flood(packets: &[PacketRecord], cancel: &CancellationToken) -> Result<Vec<AnomalyRecord>, DetectionError> {
    let mut syns: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut syn_acks_from: HashMap<&str, usize> = HashMap::new();

    for (i, packet) in packets.iter().enumerate() {
        cancel.poll(i)?;
        if !packet.is_tcp() {
            continue;
        }
        let flags = match packet.tcp_flags {
            Some(flags) => flags,
            None => continue,
        };
        if flags.is_syn_only() {
            if let Some(dst) = non_empty(&packet.dst_ip) {
                syns.entry(dst).or_default().push(i);
            }
        } else if flags.is_syn_ack() {
            if let Some(src) = non_empty(&packet.src_ip) {
                *syn_acks_from.entry(src).or_insert(0) += 1;
            }
        }
    }

    let window_micros = window::secs(RATE_WINDOW_SECS);
    let mut anomalies = Vec::new();

    for (target, mut indices) in sorted_groups(syns) {
        cancel.check()?;
        sort_chronologically(&mut indices, packets);

        let peak = peak_count(&indices, packets, window_micros);
        let rate = rate_per_sec(peak.value, window_micros);
        if rate < SYN_FLOOD_RATE {
            continue;
        }

        let syn_count = indices.len();
        let syn_acks = syn_acks_from.get(target).copied().unwrap_or(0);
        let ratio = syn_acks as f64 / syn_count as f64;
        if ratio >= SYN_ACK_RATIO_MAX {
            continue;
        }

        let sources: BTreeSet<&str> = indices.iter().filter_map(|&i| non_empty(&packets[i].src_ip)).collect();
        let risk = risk_from_exceedance(SYN_FLOOD_BASE_RISK, rate, SYN_FLOOD_RATE);

        let mut builder = AnomalyBuilder::new(AnomalyType::SynFlood, NAME)
            .risk(risk)
            .ip(target)
            .description(format!("SYN flood toward {} ({:.0} SYN/s)", target, rate))
            .detailed_analysis(format!(
                "{} SYN packets without ACK targeted {} from {} source address(es). Peak rate {:.1} SYN/s \
                 (threshold {:.0}/s); SYN-ACK/SYN ratio {:.3} (< {:.1}) indicates half-open connections \
                 exhausting the target's backlog.",
                syn_count, target, sources.len(), rate, SYN_FLOOD_RATE, ratio, SYN_ACK_RATIO_MAX
            ))
            .meta("peak_rate_per_sec", rate)
            .meta("syn_count", syn_count)
            .meta("syn_ack_count", syn_acks)
            .meta("syn_ack_ratio", ratio)
            .meta("source_count", sources.len());

        for &i in &indices {
            builder.record_packet(&packets[i]);
            builder.add_port(packets[i].dst_port);
        }
        for source in sources {
            builder.add_ip(source);
        }
        anomalies.extend(builder.build());
    }
    Ok(anomalies)
}

// ============================================================================
// ICMP FLOOD
// ============================================================================

fn detect_icmp_flood(packets: &[PacketRecord], cancel: &CancellationToken) -> Result<Vec<AnomalyRecord>, DetectionError> {
    let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, packet) in packets.iter().enumerate() {
        cancel.poll(i)?;
        if !packet.is_icmp() {
            continue;
        }
        if let Some(dst) = non_empty(&packet.dst_ip) {
            groups.entry(dst).or_default().push(i);
        }
    }

    let window_micros = window::secs(RATE_WINDOW_SECS);
    let mut anomalies = Vec::new();

    for (target, mut indices) in sorted_groups(groups) {
        cancel.check()?;
        sort_chronologically(&mut indices, packets);

        let peak = peak_count(&indices, packets, window_micros);
        let rate = rate_per_sec(peak.value, window_micros);
        if rate < ICMP_FLOOD_RATE {
            continue;
        }

        let sources: BTreeSet<&str> = indices.iter().filter_map(|&i| non_empty(&packets[i].src_ip)).collect();
        let risk = risk_from_exceedance(ICMP_FLOOD_BASE_RISK, rate, ICMP_FLOOD_RATE);

        let mut builder = AnomalyBuilder::new(AnomalyType::IcmpFlood, NAME)
            .risk(risk)
            .ip(target)
            .description(format!("ICMP flood toward {} ({:.0} packets/s)", target, rate))
            .detailed_analysis(format!(
                "{} ICMP packets reached {} from {} source(s); peak {:.1} packets/s over a {}s window \
                 (threshold {:.0}/s).",
                indices.len(), target, sources.len(), rate, RATE_WINDOW_SECS, ICMP_FLOOD_RATE
            ))
            .meta("peak_rate_per_sec", rate)
            .meta("icmp_count", indices.len())
            .meta("source_count", sources.len());

        builder.record_packets(indices.iter().map(|&i| &packets[i]));
        for source in sources {
            builder.add_ip(source);
        }
        anomalies.extend(builder.build());
    }
    Ok(anomalies)
}

// ============================================================================
// ARP SPOOFING
// ============================================================================

struct ArpClaims {
    indices: Vec<usize>,
    macs: HashSet<String>,
}

fn detect_arp_spoofing(packets: &[PacketRecord], cancel: &CancellationToken) -> Result<Vec<AnomalyRecord>, DetectionError> {
    let mut groups: HashMap<&str, ArpClaims> = HashMap::new();
    for (i, packet) in packets.iter().enumerate() {
        cancel.poll(i)?;
        if !packet.has_protocol("ARP") {
            continue;
        }
        let dst = match non_empty(&packet.dst_ip) {
            Some(dst) => dst,
            None => continue,
        };
        let mac = match packet.src_mac.as_deref().and_then(non_empty) {
            Some(mac) => mac.to_ascii_lowercase(),
            None => continue,
        };
        let claims = groups.entry(dst).or_insert_with(|| ArpClaims { indices: Vec::new(), macs: HashSet::new() });
        claims.indices.push(i);
        claims.macs.insert(mac);
    }

    let mut anomalies = Vec::new();
    for (ip, mut claims) in sorted_groups(groups) {
        cancel.check()?;
        if claims.macs.len() <= ARP_MAX_MACS_PER_IP {
            continue;
        }
        sort_chronologically(&mut claims.indices, packets);

        let mut macs: Vec<&String> = claims.macs.iter().collect();
        macs.sort();
        let mac_list = macs.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ");
        let risk = risk_from_exceedance(ARP_SPOOF_BASE_RISK, macs.len() as f64, (ARP_MAX_MACS_PER_IP + 1) as f64);

        let mut builder = AnomalyBuilder::new(AnomalyType::ArpSpoofing, NAME)
            .risk(risk)
            .ip(ip)
            .description(format!("{} claimed by {} MAC addresses", ip, macs.len()))
            .detailed_analysis(format!(
                "ARP traffic maps {} to {} distinct hardware addresses ({}). A single IP should resolve to \
                 one MAC; multiple claimants indicate cache poisoning or a man-in-the-middle.",
                ip, macs.len(), mac_list
            ))
            .meta("mac_count", macs.len())
            .meta("macs", mac_list.clone());

        builder.record_packets(claims.indices.iter().map(|&i| &packets[i]));
        anomalies.extend(builder.build());
    }
    Ok(anomalies)
}

// ============================================================================
// PORT SCAN
// ============================================================================

/// TCP SYN, or UDP sent from a higher (client) port to a lower (service) port
fn is_scan_probe(packet: &PacketRecord) -> bool {
    if packet.dst_port == 0 {
        return false;
    }
    if packet.is_tcp() {
        return packet.flags().is_syn_only();
    }
    packet.is_udp() && packet.src_port > packet.dst_port
}

fn detect_port_scan(packets: &[PacketRecord], cancel: &CancellationToken) -> Result<Vec<AnomalyRecord>, DetectionError> {
    let mut groups: HashMap<(&str, &str), Vec<usize>> = HashMap::new();
    for (i, packet) in packets.iter().enumerate() {
        cancel.poll(i)?;
        if !is_scan_probe(packet) {
            continue;
        }
        if let (Some(src), Some(dst)) = (non_empty(&packet.src_ip), non_empty(&packet.dst_ip)) {
            groups.entry((src, dst)).or_default().push(i);
        }
    }

    let window_micros = window::secs(PORT_SCAN_WINDOW_SECS);
    let mut anomalies = Vec::new();

    for ((scanner, target), mut indices) in sorted_groups(groups) {
        cancel.check()?;
        if indices.len() < PORT_SCAN_DISTINCT_PORTS {
            continue;
        }
        sort_chronologically(&mut indices, packets);

        let peak = peak_distinct(&indices, packets, window_micros, |p| Some(p.dst_port));
        let distinct = peak.value as usize;
        if distinct < PORT_SCAN_DISTINCT_PORTS {
            continue;
        }

        let risk = risk_from_exceedance(PORT_SCAN_BASE_RISK, distinct as f64, PORT_SCAN_DISTINCT_PORTS as f64);

        let mut builder = AnomalyBuilder::new(AnomalyType::PortScan, NAME)
            .risk(risk)
            .ip(scanner)
            .ip(target)
            .description(format!("{} probed {} ports on {}", scanner, distinct, target))
            .detailed_analysis(format!(
                "{} sent connection probes to {} distinct ports on {} within {}s (threshold {}). \
                 {} of its {} probe packets fell inside the densest window.",
                scanner, distinct, target, PORT_SCAN_WINDOW_SECS, PORT_SCAN_DISTINCT_PORTS, peak.len(), indices.len()
            ))
            .meta("distinct_ports", distinct)
            .meta("window_packets", peak.len())
            .meta("window_secs", PORT_SCAN_WINDOW_SECS)
            .meta("scanner", scanner);

        for &i in &indices {
            builder.record_packet(&packets[i]);
            builder.add_port(packets[i].dst_port);
        }
        anomalies.extend(builder.build());
    }
    Ok(anomalies)
}
