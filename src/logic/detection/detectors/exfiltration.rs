//! Data Exfiltration Detector
//!
//! Rules (fixed thresholds):
//! - Large transfer: (source, non-private destination) moving >= 500 MiB of
//!   payload inside any 300 s window.
//! - DNS tunnelling, grouped by querying source:
//!   - volume: >= 1000 queries inside any 60 s window
//!   - entropy: subdomain of >= 10 alphanumeric symbols at >= 3.5 bits
//!
//! Entropy uses one `EntropyScratch` per invocation; scoring a query name
//! does not allocate.

use std::collections::HashMap;

use super::{non_empty, sorted_groups};
use crate::logic::anomaly::{combine_risk, risk_from_exceedance, scaled_risk, AnomalyBuilder, AnomalyCategory, AnomalyRecord, AnomalyType};
use crate::logic::detection::cancel::CancellationToken;
use crate::logic::detection::entropy::{subdomain_portion, EntropyScratch};
use crate::logic::detection::types::DetectionError;
use crate::logic::detection::window::{self, peak_count, peak_sum, sort_chronologically};
use crate::logic::detection::Detector;
use crate::logic::packet::{is_private_ip, parse_ip, PacketRecord};

// ============================================================================
// CONSTANTS
// ============================================================================

pub const NAME: &str = "data-exfiltration";

/// 500 MiB
pub const LARGE_TRANSFER_BYTES: u64 = 500 * 1024 * 1024;

const LARGE_TRANSFER_WINDOW_SECS: i64 = 300;

/// DNS queries from one source inside `DNS_VOLUME_WINDOW_SECS`
pub const DNS_QUERY_VOLUME: u64 = 1000;

const DNS_VOLUME_WINDOW_SECS: i64 = 60;

/// Shannon bits over the alphanumeric subdomain
pub const DNS_ENTROPY_BITS: f64 = 3.5;

/// Shorter subdomains carry too few symbols for entropy to mean anything
pub const DNS_MIN_SUBDOMAIN_SYMBOLS: usize = 10;

const DNS_PORT: u16 = 53;

const LARGE_TRANSFER_BASE_RISK: f64 = 0.6;
const DNS_VOLUME_BASE_RISK: f64 = 0.6;
const DNS_ENTROPY_BASE_RISK: f64 = 0.55;
const DNS_ENTROPY_RISK_CEILING: f64 = 0.85;

// ============================================================================
// DETECTOR
// ============================================================================

pub struct ExfiltrationDetector;

impl Detector for ExfiltrationDetector {
    fn name(&self) -> &str {
        NAME
    }

    fn category(&self) -> AnomalyCategory {
        AnomalyCategory::Exfiltration
    }

    fn detect(&self, packets: &[PacketRecord], cancel: &CancellationToken) -> Result<Vec<AnomalyRecord>, DetectionError> {
        let mut anomalies = Vec::new();
        anomalies.extend(detect_large_transfers(packets, cancel)?);
        anomalies.extend(detect_dns_tunnelling(packets, cancel)?);
        log::debug!("{}: {} anomalies from {} packets", NAME, anomalies.len(), packets.len());
        Ok(anomalies)
    }
}

// ============================================================================
// LARGE TRANSFER
// ============================================================================

/// Parseable, public destination
fn is_external(ip: &str) -> bool {
    parse_ip(ip).is_some() && !is_private_ip(ip)
}

fn detect_large_transfers(packets: &[PacketRecord], cancel: &CancellationToken) -> Result<Vec<AnomalyRecord>, DetectionError> {
    let mut flows: HashMap<(&str, &str), Vec<usize>> = HashMap::new();
    for (i, packet) in packets.iter().enumerate() {
        cancel.poll(i)?;
        if packet.payload_len == 0 {
            continue;
        }
        if let (Some(src), Some(dst)) = (non_empty(&packet.src_ip), non_empty(&packet.dst_ip)) {
            if is_external(dst) {
                flows.entry((src, dst)).or_default().push(i);
            }
        }
    }

    let window_micros = window::secs(LARGE_TRANSFER_WINDOW_SECS);
    let mut anomalies = Vec::new();

    for ((source, destination), mut indices) in sorted_groups(flows) {
        cancel.check()?;
        let total: u64 = indices.iter().map(|&i| packets[i].payload_len).sum();
        if total < LARGE_TRANSFER_BYTES {
            continue;
        }
        sort_chronologically(&mut indices, packets);

        let peak = peak_sum(&indices, packets, window_micros, |p| p.payload_len);
        if peak.value < LARGE_TRANSFER_BYTES {
            continue;
        }

        let mib = peak.value as f64 / (1024.0 * 1024.0);
        let risk = risk_from_exceedance(LARGE_TRANSFER_BASE_RISK, peak.value as f64, LARGE_TRANSFER_BYTES as f64);

        let mut builder = AnomalyBuilder::new(AnomalyType::LargeDataTransfer, NAME)
            .risk(risk)
            .ip(source)
            .ip(destination)
            .description(format!("{:.0} MiB sent from {} to {} within {}s", mib, source, destination, LARGE_TRANSFER_WINDOW_SECS))
            .detailed_analysis(format!(
                "{} uploaded {:.1} MiB to external host {} inside a {}s window (threshold {} MiB); \
                 {} of {} packets carried the burst.",
                source,
                mib,
                destination,
                LARGE_TRANSFER_WINDOW_SECS,
                LARGE_TRANSFER_BYTES / (1024 * 1024),
                peak.len(),
                indices.len()
            ))
            .meta("peak_window_bytes", peak.value)
            .meta("window_packets", peak.len())
            .meta("total_bytes", total)
            .meta("window_secs", LARGE_TRANSFER_WINDOW_SECS);

        for &i in &indices {
            builder.record_packet(&packets[i]);
            builder.add_port(packets[i].dst_port);
        }
        anomalies.extend(builder.build());
    }
    Ok(anomalies)
}

// ============================================================================
// DNS TUNNELLING
// ============================================================================

/// Outbound DNS request; responses and server-originated traffic are skipped
fn is_dns_query(packet: &PacketRecord) -> bool {
    let labelled = packet.has_protocol("DNS");
    let to_resolver = (packet.is_udp() || packet.is_tcp()) && packet.dst_port == DNS_PORT;
    if !labelled && !to_resolver {
        return false;
    }
    if packet.src_port == DNS_PORT {
        return false;
    }
    !packet.info_str().to_ascii_lowercase().contains("response")
}

/// Longest dotted token with a letter in it ("Standard query 0x1f A a.b.com" -> "a.b.com")
fn query_name(info: &str) -> Option<&str> {
    info.split_whitespace()
        .filter(|token| token.contains('.') && !token.starts_with("0x"))
        .filter(|token| token.bytes().any(|b| b.is_ascii_alphabetic()))
        .max_by_key(|token| token.len())
}

#[derive(Default)]
struct DnsActivity {
    queries: Vec<usize>,
    high_entropy: Vec<usize>,
    max_bits: f64,
}

fn detect_dns_tunnelling(packets: &[PacketRecord], cancel: &CancellationToken) -> Result<Vec<AnomalyRecord>, DetectionError> {
    let mut scratch = EntropyScratch::new();
    let mut sources: HashMap<&str, DnsActivity> = HashMap::new();

    for (i, packet) in packets.iter().enumerate() {
        cancel.poll(i)?;
        if !is_dns_query(packet) {
            continue;
        }
        let src = match non_empty(&packet.src_ip) {
            Some(src) => src,
            None => continue,
        };
        let activity = sources.entry(src).or_default();
        activity.queries.push(i);

        if let Some(name) = query_name(packet.info_str()) {
            let (bits, symbols) = scratch.shannon_bits(subdomain_portion(name));
            if symbols >= DNS_MIN_SUBDOMAIN_SYMBOLS && bits >= DNS_ENTROPY_BITS {
                activity.high_entropy.push(i);
                activity.max_bits = activity.max_bits.max(bits);
            }
        }
    }

    let window_micros = window::secs(DNS_VOLUME_WINDOW_SECS);
    let mut anomalies = Vec::new();

    for (source, mut activity) in sorted_groups(sources) {
        cancel.check()?;
        sort_chronologically(&mut activity.queries, packets);
        sort_chronologically(&mut activity.high_entropy, packets);

        let peak_queries = if activity.queries.len() as u64 >= DNS_QUERY_VOLUME {
            peak_count(&activity.queries, packets, window_micros).value
        } else {
            0
        };
        let volume_hit = peak_queries >= DNS_QUERY_VOLUME;
        let entropy_hit = !activity.high_entropy.is_empty();
        if !volume_hit && !entropy_hit {
            continue;
        }

        let mut risk = 0.0;
        if volume_hit {
            risk = combine_risk(risk, risk_from_exceedance(DNS_VOLUME_BASE_RISK, peak_queries as f64, DNS_QUERY_VOLUME as f64));
        }
        if entropy_hit {
            risk = combine_risk(
                risk,
                scaled_risk(DNS_ENTROPY_BASE_RISK, DNS_ENTROPY_RISK_CEILING, activity.high_entropy.len() as f64, 1.0),
            );
        }

        let evidence = if volume_hit { &activity.queries } else { &activity.high_entropy };
        let mut builder = AnomalyBuilder::new(AnomalyType::DnsExfiltration, NAME)
            .risk(risk)
            .ip(source)
            .description(format!("Possible DNS tunnelling from {}", source))
            .detailed_analysis(format!(
                "{} issued {} DNS queries (peak {} per {}s, threshold {}); {} carried high-entropy \
                 subdomains (max {:.2} bits, threshold {:.1}). Encoded data in query names is a \
                 common covert channel.",
                source,
                activity.queries.len(),
                peak_queries,
                DNS_VOLUME_WINDOW_SECS,
                DNS_QUERY_VOLUME,
                activity.high_entropy.len(),
                activity.max_bits,
                DNS_ENTROPY_BITS
            ))
            .meta("query_count", activity.queries.len())
            .meta("high_entropy_queries", activity.high_entropy.len())
            .meta("max_entropy_bits", activity.max_bits)
            .meta("volume_rule", volume_hit)
            .meta("entropy_rule", entropy_hit);

        for &i in evidence {
            builder.record_packet(&packets[i]);
            builder.add_ip(&packets[i].dst_ip);
            builder.add_port(packets[i].dst_port);
        }
        anomalies.extend(builder.build());
    }
    Ok(anomalies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::detection::detectors::fixtures::{at_ms, tcp, udp};
    use crate::logic::packet::TcpFlags;

    fn run(packets: &[PacketRecord]) -> Vec<AnomalyRecord> {
        ExfiltrationDetector.detect(packets, &CancellationToken::new()).unwrap()
    }

    fn dns_query(frame: u64, ms: i64, src: &str, name: &str) -> PacketRecord {
        udp(frame, ms, src, 50000 + (frame % 1000) as u16, "10.0.0.1", 53)
            .with_protocol("DNS")
            .with_info(&format!("Standard query 0x{:04x} A {}", frame, name))
    }

    fn upload(frame: u64, ms: i64, dst: &str, bytes: u64) -> PacketRecord {
        tcp(frame, ms, "10.0.0.20", 50500, dst, 443, TcpFlags::PSH | TcpFlags::ACK).with_payload_len(bytes)
    }

    #[test]
    fn test_large_upload_to_public_host() {
        // 520 x 1 MiB over 52 seconds
        let packets: Vec<PacketRecord> = (0..520u64).map(|i| upload(i + 1, (i * 100) as i64, "203.0.113.50", 1024 * 1024)).collect();
        let anomalies = run(&packets);
        assert_eq!(anomalies.len(), 1);
        let record = &anomalies[0];
        assert_eq!(record.anomaly_type, AnomalyType::LargeDataTransfer);
        assert_eq!(record.occurrence_count, 520);
        assert!(record.affected_ips.contains("203.0.113.50"));
    }

    #[test]
    fn test_large_upload_counts_every_packet_to_the_host() {
        let mut packets: Vec<PacketRecord> = (0..520u64).map(|i| upload(i + 1, (i * 100) as i64, "203.0.113.50", 1024 * 1024)).collect();
        // trickle well after the burst window closes
        packets.extend((0..100u64).map(|i| upload(i + 521, 1_000_000 + (i * 100) as i64, "203.0.113.50", 1024)));

        let anomalies = run(&packets);
        assert_eq!(anomalies.len(), 1);
        let record = &anomalies[0];
        assert_eq!(record.occurrence_count, 620);
        assert_eq!(record.metadata_value("window_packets").and_then(|v| v.as_i64()), Some(520));
        assert!(record.last_seen >= at_ms(1_000_000));
    }

    #[test]
    fn test_large_upload_to_private_host_is_fine() {
        let packets: Vec<PacketRecord> = (0..520u64).map(|i| upload(i + 1, (i * 100) as i64, "10.0.0.99", 1024 * 1024)).collect();
        assert!(run(&packets).is_empty());
    }

    #[test]
    fn test_slow_upload_never_fills_window() {
        // 1 MiB every 2 s: at most 150 MiB in any 300 s window
        let packets: Vec<PacketRecord> = (0..600u64).map(|i| upload(i + 1, (i * 2000) as i64, "203.0.113.50", 1024 * 1024)).collect();
        assert!(run(&packets).is_empty());
    }

    #[test]
    fn test_query_name_extraction() {
        assert_eq!(query_name("Standard query 0x1a2b A www.example.com"), Some("www.example.com"));
        assert_eq!(query_name("Standard query 0x1a2b AAAA a1.b2.example.org OPT"), Some("a1.b2.example.org"));
        assert_eq!(query_name("no names here"), None);
    }

    #[test]
    fn test_normal_lookups_are_quiet() {
        let names = ["www.example.com", "mail.example.com", "api.github.com", "cdn.jsdelivr.net"];
        let packets: Vec<PacketRecord> = (0..40u64)
            .map(|i| dns_query(i + 1, (i * 50) as i64, "10.0.0.60", names[i as usize % names.len()]))
            .collect();
        assert!(run(&packets).is_empty());
    }

    #[test]
    fn test_high_volume_dns() {
        let packets: Vec<PacketRecord> = (0..1200u64).map(|i| dns_query(i + 1, (i * 20) as i64, "10.0.0.61", "www.example.com")).collect();
        let anomalies = run(&packets);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].anomaly_type, AnomalyType::DnsExfiltration);
        assert_eq!(anomalies[0].occurrence_count, 1200);
        assert_eq!(anomalies[0].metadata_value("volume_rule").and_then(|v| v.as_bool()), Some(true));
    }

    #[test]
    fn test_responses_are_not_counted() {
        let packets: Vec<PacketRecord> = (0..5u64)
            .map(|i| {
                udp(i + 1, i as i64, "10.0.0.1", 53, "10.0.0.62", 50000)
                    .with_protocol("DNS")
                    .with_info("Standard query response 0x0001 A x9f3kq7z2m4w8p1v6.example.com")
            })
            .collect();
        assert!(run(&packets).is_empty());
    }
}
