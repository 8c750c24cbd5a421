//! TCP Analysis Detector
//!
//! Works from the dissector's expert markers in the info string plus the raw
//! flag bits. Rules (fixed thresholds):
//! - Retransmissions: per conversation, retransmitted / total TCP packets > 3%
//!   with at least 20 packets in the conversation.
//! - Duplicate-ACK burst: per conversation, >= 10 duplicate ACKs inside 1 s.
//! - Zero-window run: per conversation, >= 5 consecutive zero-window
//!   advertisements from the same endpoint.
//! - RST storm: RST packets grouped by source IP, peak rate >= 50 RST/s.

use std::collections::HashMap;

use super::{non_empty, sorted_groups};
use crate::logic::anomaly::{risk_from_exceedance, scaled_risk, AnomalyBuilder, AnomalyCategory, AnomalyRecord, AnomalyType};
use crate::logic::detection::cancel::CancellationToken;
use crate::logic::detection::types::DetectionError;
use crate::logic::detection::window::{self, peak_count, rate_per_sec, sort_chronologically};
use crate::logic::detection::Detector;
use crate::logic::packet::{conversation_key, ConversationKey, PacketRecord};

// ============================================================================
// CONSTANTS
// ============================================================================

pub const NAME: &str = "tcp-analysis";

/// Retransmitted share of a conversation's packets
pub const RETRANSMISSION_RATIO: f64 = 0.03;

/// Conversations smaller than this are not judged on ratio
pub const MIN_CONVERSATION_PACKETS: usize = 20;

/// Duplicate ACKs within `BURST_WINDOW_SECS`
pub const DUP_ACK_BURST: usize = 10;

/// Consecutive zero-window advertisements from one endpoint
pub const ZERO_WINDOW_RUN: usize = 5;

/// RST/sec from one source
pub const RST_STORM_RATE: f64 = 50.0;

const BURST_WINDOW_SECS: i64 = 1;

const RETRANSMISSION_MARKERS: &[&str] = &[
    "[TCP Retransmission]",
    "[TCP Fast Retransmission]",
    "[TCP Spurious Retransmission]",
];
const DUP_ACK_MARKER: &str = "[TCP Dup ACK";
const ZERO_WINDOW_MARKER: &str = "[TCP ZeroWindow]";

// Transport health issues top out below Critical
const RETRANSMISSION_BASE_RISK: f64 = 0.3;
const DUP_ACK_BASE_RISK: f64 = 0.35;
const ZERO_WINDOW_BASE_RISK: f64 = 0.35;
const HEALTH_RISK_CEILING: f64 = 0.7;
const RST_STORM_BASE_RISK: f64 = 0.5;

// ============================================================================
// DETECTOR
// ============================================================================

pub struct TcpAnalysisDetector;

impl Detector for TcpAnalysisDetector {
    fn name(&self) -> &str {
        NAME
    }

    fn category(&self) -> AnomalyCategory {
        AnomalyCategory::Tcp
    }

    fn detect(&self, packets: &[PacketRecord], cancel: &CancellationToken) -> Result<Vec<AnomalyRecord>, DetectionError> {
        let mut conversations: HashMap<ConversationKey, Vec<usize>> = HashMap::new();
        let mut resets: HashMap<&str, Vec<usize>> = HashMap::new();

        for (i, packet) in packets.iter().enumerate() {
            cancel.poll(i)?;
            if !packet.is_tcp() {
                continue;
            }
            if let Some(key) = conversation_key(packet) {
                conversations.entry(key).or_default().push(i);
            }
            if packet.flags().is_rst() {
                if let Some(src) = non_empty(&packet.src_ip) {
                    resets.entry(src).or_default().push(i);
                }
            }
        }

        let mut anomalies = Vec::new();
        for (key, mut indices) in sorted_groups(conversations) {
            cancel.check()?;
            sort_chronologically(&mut indices, packets);
            anomalies.extend(check_retransmissions(&key, &indices, packets));
            anomalies.extend(check_dup_ack_burst(&key, &indices, packets));
            anomalies.extend(check_zero_window_run(&key, &indices, packets));
        }
        anomalies.extend(detect_rst_storm(resets, packets, cancel)?);

        log::debug!("{}: {} anomalies from {} packets", NAME, anomalies.len(), packets.len());
        Ok(anomalies)
    }
}

fn is_retransmission(packet: &PacketRecord) -> bool {
    let info = packet.info_str();
    RETRANSMISSION_MARKERS.iter().any(|m| info.contains(m))
}

fn is_dup_ack(packet: &PacketRecord) -> bool {
    packet.info_str().contains(DUP_ACK_MARKER)
}

fn is_zero_window(packet: &PacketRecord) -> bool {
    packet.info_str().contains(ZERO_WINDOW_MARKER)
}

fn conversation_builder(anomaly_type: AnomalyType, key: &ConversationKey, risk: f64) -> AnomalyBuilder {
    AnomalyBuilder::new(anomaly_type, NAME)
        .risk(risk)
        .ip(&key.a.0)
        .ip(&key.b.0)
        .port(key.a.1)
        .port(key.b.1)
        .meta("conversation", key.label())
}

// ============================================================================
// PER-CONVERSATION RULES
// ============================================================================

fn check_retransmissions(key: &ConversationKey, indices: &[usize], packets: &[PacketRecord]) -> Option<AnomalyRecord> {
    let total = indices.len();
    if total < MIN_CONVERSATION_PACKETS {
        return None;
    }
    let retransmitted: Vec<usize> = indices.iter().copied().filter(|&i| is_retransmission(&packets[i])).collect();
    let ratio = retransmitted.len() as f64 / total as f64;
    if ratio <= RETRANSMISSION_RATIO {
        return None;
    }

    let risk = scaled_risk(RETRANSMISSION_BASE_RISK, HEALTH_RISK_CEILING, ratio, RETRANSMISSION_RATIO);
    let mut builder = conversation_builder(AnomalyType::TcpRetransmissions, key, risk)
        .description(format!("{:.1}% retransmissions on {}", ratio * 100.0, key.label()))
        .detailed_analysis(format!(
            "{} of {} TCP segments in {} were retransmissions ({:.2}%, threshold {:.0}%). \
             Sustained loss or congestion on this path.",
            retransmitted.len(), total, key.label(), ratio * 100.0, RETRANSMISSION_RATIO * 100.0
        ))
        .meta("retransmissions", retransmitted.len())
        .meta("total_packets", total)
        .meta("retransmission_ratio", ratio);
    builder.record_packets(retransmitted.iter().map(|&i| &packets[i]));
    builder.build()
}

fn check_dup_ack_burst(key: &ConversationKey, indices: &[usize], packets: &[PacketRecord]) -> Option<AnomalyRecord> {
    let dup_acks: Vec<usize> = indices.iter().copied().filter(|&i| is_dup_ack(&packets[i])).collect();
    if dup_acks.len() < DUP_ACK_BURST {
        return None;
    }
    let peak = peak_count(&dup_acks, packets, window::secs(BURST_WINDOW_SECS));
    let burst = peak.value as usize;
    if burst < DUP_ACK_BURST {
        return None;
    }

    let risk = scaled_risk(DUP_ACK_BASE_RISK, HEALTH_RISK_CEILING, burst as f64, DUP_ACK_BURST as f64);
    let mut builder = conversation_builder(AnomalyType::DuplicateAckBurst, key, risk)
        .description(format!("{} duplicate ACKs within {}s on {}", burst, BURST_WINDOW_SECS, key.label()))
        .detailed_analysis(format!(
            "Peak of {} duplicate ACKs inside {}s (threshold {}), {} in total. The receiver keeps \
             signalling a gap in the byte stream.",
            burst, BURST_WINDOW_SECS, DUP_ACK_BURST, dup_acks.len()
        ))
        .meta("peak_dup_acks", burst)
        .meta("total_dup_acks", dup_acks.len());
    builder.record_packets(dup_acks.iter().map(|&i| &packets[i]));
    builder.build()
}

fn check_zero_window_run(key: &ConversationKey, indices: &[usize], packets: &[PacketRecord]) -> Option<AnomalyRecord> {
    // run length per advertising endpoint (false = side a, true = side b)
    let mut runs: [usize; 2] = [0, 0];
    let mut longest = 0usize;
    let mut zero_window: Vec<usize> = Vec::new();

    for &i in indices {
        let packet = &packets[i];
        let side = usize::from(packet.src_ip.trim() != key.a.0 || packet.src_port != key.a.1);
        if is_zero_window(packet) {
            runs[side] += 1;
            longest = longest.max(runs[side]);
            zero_window.push(i);
        } else {
            runs[side] = 0;
        }
    }

    if longest < ZERO_WINDOW_RUN {
        return None;
    }

    let risk = scaled_risk(ZERO_WINDOW_BASE_RISK, HEALTH_RISK_CEILING, longest as f64, ZERO_WINDOW_RUN as f64);
    let mut builder = conversation_builder(AnomalyType::ZeroWindowRun, key, risk)
        .description(format!("{} consecutive zero-window advertisements on {}", longest, key.label()))
        .detailed_analysis(format!(
            "An endpoint of {} advertised a zero receive window {} times in a row (threshold {}); \
             {} zero-window segments overall. The receiving application is not draining its buffer.",
            key.label(), longest, ZERO_WINDOW_RUN, zero_window.len()
        ))
        .meta("longest_run", longest)
        .meta("zero_window_packets", zero_window.len());
    builder.record_packets(zero_window.iter().map(|&i| &packets[i]));
    builder.build()
}

// ============================================================================
// RST STORM
// ============================================================================

fn detect_rst_storm(
    resets: HashMap<&str, Vec<usize>>,
    packets: &[PacketRecord],
    cancel: &CancellationToken,
) -> Result<Vec<AnomalyRecord>, DetectionError> {
    let window_micros = window::secs(BURST_WINDOW_SECS);
    let mut anomalies = Vec::new();

    for (source, mut indices) in sorted_groups(resets) {
        cancel.check()?;
        sort_chronologically(&mut indices, packets);

        let peak = peak_count(&indices, packets, window_micros);
        let rate = rate_per_sec(peak.value, window_micros);
        if rate < RST_STORM_RATE {
            continue;
        }

        let risk = risk_from_exceedance(RST_STORM_BASE_RISK, rate, RST_STORM_RATE);
        let mut builder = AnomalyBuilder::new(AnomalyType::RstStorm, NAME)
            .risk(risk)
            .ip(source)
            .description(format!("RST storm from {} ({:.0} RST/s)", source, rate))
            .detailed_analysis(format!(
                "{} sent {} RST segments, peaking at {:.1}/s (threshold {:.0}/s). Typical of connection \
                 teardown attacks or a host rejecting a scan.",
                source, indices.len(), rate, RST_STORM_RATE
            ))
            .meta("peak_rate_per_sec", rate)
            .meta("rst_count", indices.len());

        for &i in &indices {
            builder.record_packet(&packets[i]);
            builder.add_ip(&packets[i].dst_ip);
        }
        anomalies.extend(builder.build());
    }
    Ok(anomalies)
}
