//! Application Layer Detector
//!
//! Rules (fixed thresholds):
//! - Protocol/port mismatch: a dissected protocol whose well-known port set
//!   contains neither endpoint port. Grouped by (protocol, service port), where
//!   the service port is the lower non-zero port; >= 5 packets.
//! - Malformed markers: dissector complaints in the info string, grouped by
//!   protocol; any occurrence counts.
//! - Cleartext credentials: USER/PASS commands (FTP, POP, IMAP, Telnet), SMTP
//!   AUTH LOGIN/PLAIN or HTTP Basic auth, grouped by (client, server). The
//!   secret itself is never stored.

use std::collections::{BTreeSet, HashMap};

use super::{contains_any_ignore_case, non_empty, sorted_groups};
use crate::logic::anomaly::{scaled_risk, AnomalyBuilder, AnomalyCategory, AnomalyRecord, AnomalyType};
use crate::logic::detection::cancel::CancellationToken;
use crate::logic::detection::types::DetectionError;
use crate::logic::detection::window::sort_chronologically;
use crate::logic::detection::Detector;
use crate::logic::packet::PacketRecord;

// ============================================================================
// CONSTANTS
// ============================================================================

pub const NAME: &str = "application-layer";

/// Packets on an unexpected port before a protocol/port pair is flagged
pub const MISMATCH_MIN_PACKETS: usize = 5;

/// Malformed packets per protocol before flagging
pub const MALFORMED_MIN_PACKETS: usize = 1;

/// Well-known ports per protocol family
const WELL_KNOWN_PORTS: &[(&str, &[u16])] = &[
    ("HTTP", &[80, 443]),
    ("TLS", &[443, 8443, 465, 993, 995, 636, 989, 990, 5061]),
    ("DNS", &[53, 5353, 5355]),
    ("SSH", &[22]),
    ("FTP", &[20, 21]),
    ("SMTP", &[25, 465, 587]),
    ("POP", &[110, 995]),
    ("IMAP", &[143, 993]),
    ("TELNET", &[23]),
    ("SNMP", &[161, 162]),
    ("NTP", &[123]),
    ("DHCP", &[67, 68]),
    ("SMB", &[139, 445]),
    ("RDP", &[3389]),
    ("MYSQL", &[3306]),
    ("SIP", &[5060, 5061]),
];

const MALFORMED_MARKERS: &[&str] = &["malformed", "[unreassembled packet", "bogus", "[illegal"];

/// Command-oriented protocols where USER/PASS open a line
const COMMAND_PROTOCOLS: &[&str] = &["FTP", "POP", "IMAP", "TELNET"];

/// Lowercase command prefixes and the credential kind they reveal
const COMMAND_CREDENTIALS: &[(&str, &str)] = &[("user ", "username"), ("pass ", "password")];

const SMTP_CREDENTIALS: &[(&str, &str)] = &[("auth login", "smtp-auth-login"), ("auth plain", "smtp-auth-plain")];

const HTTP_CREDENTIALS: &[(&str, &str)] = &[("authorization: basic", "http-basic")];

const MISMATCH_BASE_RISK: f64 = 0.3;
const MALFORMED_BASE_RISK: f64 = 0.35;
const CLEARTEXT_BASE_RISK: f64 = 0.55;
const APPLICATION_RISK_CEILING: f64 = 0.7;
const CLEARTEXT_RISK_CEILING: f64 = 0.85;

// ============================================================================
// DETECTOR
// ============================================================================

pub struct ApplicationLayerDetector;

impl Detector for ApplicationLayerDetector {
    fn name(&self) -> &str {
        NAME
    }

    fn category(&self) -> AnomalyCategory {
        AnomalyCategory::Application
    }

    fn detect(&self, packets: &[PacketRecord], cancel: &CancellationToken) -> Result<Vec<AnomalyRecord>, DetectionError> {
        let mut mismatches: HashMap<(&'static str, u16), Vec<usize>> = HashMap::new();
        let mut malformed: HashMap<String, Vec<usize>> = HashMap::new();
        let mut credentials: HashMap<(&str, &str), Vec<usize>> = HashMap::new();

        for (i, packet) in packets.iter().enumerate() {
            cancel.poll(i)?;
            let family = packet.protocol_label().and_then(protocol_family);
            let info_lower = packet.info_str().to_ascii_lowercase();

            if let Some((name, ports)) = family {
                if let Some(service_port) = service_port(packet) {
                    if !ports.contains(&packet.src_port) && !ports.contains(&packet.dst_port) {
                        mismatches.entry((name, service_port)).or_default().push(i);
                    }
                }
            }

            if contains_any_ignore_case(&info_lower, MALFORMED_MARKERS) {
                malformed.entry(packet.effective_protocol()).or_default().push(i);
            }

            if family.and_then(|(name, _)| credential_kind(name, &info_lower)).is_some() {
                if let (Some(client), Some(server)) = (non_empty(&packet.src_ip), non_empty(&packet.dst_ip)) {
                    credentials.entry((client, server)).or_default().push(i);
                }
            }
        }

        let mut anomalies = Vec::new();
        anomalies.extend(check_mismatches(mismatches, packets, cancel)?);
        anomalies.extend(check_malformed(malformed, packets, cancel)?);
        anomalies.extend(check_cleartext_credentials(credentials, packets, cancel)?);

        log::debug!("{}: {} anomalies from {} packets", NAME, anomalies.len(), packets.len());
        Ok(anomalies)
    }
}

/// Map a dissector label ("TLSv1.3", "HTTP/JSON", "SSHv2") to its port-table entry
fn protocol_family(label: &str) -> Option<(&'static str, &'static [u16])> {
    let upper = label.trim().to_ascii_uppercase();
    let family = if upper.starts_with("TLS") || upper.starts_with("SSL") {
        "TLS"
    } else if upper.starts_with("SSH") {
        "SSH"
    } else if upper == "HTTP" || upper.starts_with("HTTP/") {
        "HTTP"
    } else {
        upper.as_str()
    };
    WELL_KNOWN_PORTS.iter().find(|(name, _)| *name == family).map(|(name, ports)| (*name, *ports))
}

/// Lower non-zero port of the pair; None when either side has no port
fn service_port(packet: &PacketRecord) -> Option<u16> {
    if packet.src_port == 0 || packet.dst_port == 0 {
        return None;
    }
    Some(packet.src_port.min(packet.dst_port))
}

/// Credential kind revealed by one packet of a cleartext protocol family
fn credential_kind(family: &str, info_lower: &str) -> Option<&'static str> {
    match family {
        "HTTP" => find_marker(info_lower, HTTP_CREDENTIALS),
        "SMTP" => find_marker(info_lower, SMTP_CREDENTIALS),
        _ if COMMAND_PROTOCOLS.contains(&family) => command_credential(info_lower),
        _ => None,
    }
}

fn packet_credential_kind(packet: &PacketRecord) -> Option<&'static str> {
    let (family, _) = packet.protocol_label().and_then(protocol_family)?;
    credential_kind(family, &packet.info_str().to_ascii_lowercase())
}

fn find_marker(info_lower: &str, markers: &[(&str, &'static str)]) -> Option<&'static str> {
    markers.iter().find(|(marker, _)| info_lower.contains(marker)).map(|(_, kind)| *kind)
}

/// USER/PASS only count at the start of a line, optionally after "Request: "
fn command_credential(info_lower: &str) -> Option<&'static str> {
    info_lower.lines().find_map(|line| {
        let line = line.trim_start();
        let command = line.strip_prefix("request:").map(str::trim_start).unwrap_or(line);
        COMMAND_CREDENTIALS
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix))
            .map(|(_, kind)| *kind)
    })
}

// ============================================================================
// RULES
// ============================================================================

fn check_mismatches(
    groups: HashMap<(&'static str, u16), Vec<usize>>,
    packets: &[PacketRecord],
    cancel: &CancellationToken,
) -> Result<Vec<AnomalyRecord>, DetectionError> {
    let mut anomalies = Vec::new();
    for ((protocol, port), mut indices) in sorted_groups(groups) {
        cancel.check()?;
        if indices.len() < MISMATCH_MIN_PACKETS {
            continue;
        }
        sort_chronologically(&mut indices, packets);

        let expected = WELL_KNOWN_PORTS
            .iter()
            .find(|(name, _)| *name == protocol)
            .map(|(_, ports)| ports.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        let risk = scaled_risk(MISMATCH_BASE_RISK, APPLICATION_RISK_CEILING, indices.len() as f64, MISMATCH_MIN_PACKETS as f64);

        let mut builder = AnomalyBuilder::new(AnomalyType::ProtocolPortMismatch, NAME)
            .risk(risk)
            .port(port)
            .description(format!("{} on non-standard port {}", protocol, port))
            .detailed_analysis(format!(
                "{} packets were dissected as {} on port {}; expected one of [{}]. Services on \
                 unexpected ports are a common way to slip past port-based filtering.",
                indices.len(), protocol, port, expected
            ))
            .meta("protocol", protocol)
            .meta("port", port)
            .meta("expected_ports", expected);

        for &i in &indices {
            builder.record_packet(&packets[i]);
            builder.add_ip(&packets[i].src_ip);
            builder.add_ip(&packets[i].dst_ip);
        }
        anomalies.extend(builder.build());
    }
    Ok(anomalies)
}

fn check_malformed(
    groups: HashMap<String, Vec<usize>>,
    packets: &[PacketRecord],
    cancel: &CancellationToken,
) -> Result<Vec<AnomalyRecord>, DetectionError> {
    let mut anomalies = Vec::new();
    for (protocol, mut indices) in sorted_groups(groups) {
        cancel.check()?;
        if indices.len() < MALFORMED_MIN_PACKETS {
            continue;
        }
        sort_chronologically(&mut indices, packets);

        let risk = scaled_risk(MALFORMED_BASE_RISK, APPLICATION_RISK_CEILING, indices.len() as f64, MALFORMED_MIN_PACKETS as f64);
        let mut builder = AnomalyBuilder::new(AnomalyType::MalformedProtocol, NAME)
            .risk(risk)
            .description(format!("{} malformed {} packet(s)", indices.len(), protocol))
            .detailed_analysis(format!(
                "The dissector reported {} {} packet(s) as malformed, bogus or unreassembled. \
                 Crafted packets like these are used for fuzzing and parser exploits.",
                indices.len(), protocol
            ))
            .meta("protocol", protocol.as_str());

        for &i in &indices {
            builder.record_packet(&packets[i]);
            builder.add_ip(&packets[i].src_ip);
            builder.add_ip(&packets[i].dst_ip);
        }
        anomalies.extend(builder.build());
    }
    Ok(anomalies)
}

fn check_cleartext_credentials(
    groups: HashMap<(&str, &str), Vec<usize>>,
    packets: &[PacketRecord],
    cancel: &CancellationToken,
) -> Result<Vec<AnomalyRecord>, DetectionError> {
    let mut anomalies = Vec::new();
    for ((client, server), mut indices) in sorted_groups(groups) {
        cancel.check()?;
        sort_chronologically(&mut indices, packets);

        let mut kinds: BTreeSet<&str> = BTreeSet::new();
        let mut protocols: BTreeSet<String> = BTreeSet::new();
        for &i in &indices {
            if let Some(kind) = packet_credential_kind(&packets[i]) {
                kinds.insert(kind);
            }
            protocols.insert(packets[i].effective_protocol());
        }
        let kind_list = kinds.iter().copied().collect::<Vec<_>>().join(", ");
        let protocol_list = protocols.iter().map(String::as_str).collect::<Vec<_>>().join(", ");

        let risk = scaled_risk(CLEARTEXT_BASE_RISK, CLEARTEXT_RISK_CEILING, indices.len() as f64, 1.0);
        let mut builder = AnomalyBuilder::new(AnomalyType::CleartextCredentials, NAME)
            .risk(risk)
            .ip(client)
            .ip(server)
            .description(format!("Cleartext credentials from {} to {}", client, server))
            .detailed_analysis(format!(
                "{} packet(s) from {} to {} over {} carry login material ({}) without encryption. \
                 Anyone on the path can read them.",
                indices.len(), client, server, protocol_list, kind_list
            ))
            .meta("credential_kinds", kind_list.clone())
            .meta("protocols", protocol_list.clone());

        for &i in &indices {
            builder.record_packet(&packets[i]);
            builder.add_port(packets[i].dst_port);
        }
        anomalies.extend(builder.build());
    }
    Ok(anomalies)
}
