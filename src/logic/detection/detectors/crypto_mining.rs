//! Crypto-Mining Detector
//!
//! Grouped by source IP, one record per source. Two independent indicators:
//! - Stratum protocol: JSON-RPC mining verbs or stratum URLs in the info string.
//! - Pool fan-out: connections to >= 6 distinct destination IPs that look like
//!   mining pools (pool port table or pool domain hints).
//!
//! Either indicator alone flags the source; when both trip the risks combine.

use std::collections::{BTreeSet, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;

use super::{contains_any_ignore_case, non_empty, sorted_groups};
use crate::logic::anomaly::{combine_risk, risk_from_exceedance, AnomalyBuilder, AnomalyCategory, AnomalyRecord, AnomalyType};
use crate::logic::detection::cancel::CancellationToken;
use crate::logic::detection::types::DetectionError;
use crate::logic::detection::window::sort_chronologically;
use crate::logic::detection::Detector;
use crate::logic::packet::PacketRecord;

// ============================================================================
// CONSTANTS
// ============================================================================

pub const NAME: &str = "crypto-mining";

/// Distinct pool-looking destinations from one source
pub const POOL_DISTINCT_DESTINATIONS: usize = 6;

const STRATUM_MARKERS: &[&str] = &[
    "mining.subscribe",
    "mining.authorize",
    "mining.submit",
    "mining.notify",
    "mining.set_difficulty",
    "stratum+tcp://",
    "stratum+ssl://",
];

/// Ports commonly served by public mining pools
const POOL_PORTS: &[u16] = &[3333, 3334, 3357, 4444, 5555, 7777, 14433, 14444, 45560, 45700];

const POOL_DOMAIN_HINTS: &[&str] = &[
    "nanopool.org",
    "2miners.com",
    "f2pool.com",
    "supportxmr.com",
    "moneroocean.stream",
    "hashvault.pro",
    "ethermine.org",
    "nicehash.com",
    "minexmr.com",
    "antpool.com",
    "viabtc.com",
];

/// XMRig-style JSON-RPC ("method":"login")
static JSON_RPC_METHOD: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#""method"\s*:\s*"(login|submit|getjob|keepalived)""#).ok());

const STRATUM_BASE_RISK: f64 = 0.7;
const POOL_BASE_RISK: f64 = 0.55;

// ============================================================================
// DETECTOR
// ============================================================================

#[derive(Default)]
struct MinerEvidence<'a> {
    stratum: Vec<usize>,
    pool: Vec<usize>,
    pool_destinations: BTreeSet<&'a str>,
}

pub struct CryptoMiningDetector;

impl Detector for CryptoMiningDetector {
    fn name(&self) -> &str {
        NAME
    }

    fn category(&self) -> AnomalyCategory {
        AnomalyCategory::CryptoMining
    }

    fn detect(&self, packets: &[PacketRecord], cancel: &CancellationToken) -> Result<Vec<AnomalyRecord>, DetectionError> {
        let mut sources: HashMap<&str, MinerEvidence> = HashMap::new();

        for (i, packet) in packets.iter().enumerate() {
            cancel.poll(i)?;
            let src = match non_empty(&packet.src_ip) {
                Some(src) => src,
                None => continue,
            };
            let info_lower = packet.info_str().to_ascii_lowercase();

            if is_stratum(&info_lower) {
                sources.entry(src).or_default().stratum.push(i);
            }
            if is_pool_connection(packet, &info_lower) {
                if let Some(dst) = non_empty(&packet.dst_ip) {
                    let evidence = sources.entry(src).or_default();
                    evidence.pool.push(i);
                    evidence.pool_destinations.insert(dst);
                }
            }
        }

        let mut anomalies = Vec::new();
        for (source, evidence) in sorted_groups(sources) {
            cancel.check()?;
            anomalies.extend(evaluate_source(source, evidence, packets));
        }

        log::debug!("{}: {} anomalies from {} packets", NAME, anomalies.len(), packets.len());
        Ok(anomalies)
    }
}

fn is_stratum(info_lower: &str) -> bool {
    if contains_any_ignore_case(info_lower, STRATUM_MARKERS) {
        return true;
    }
    JSON_RPC_METHOD.as_ref().map_or(false, |re| re.is_match(info_lower))
}

fn is_pool_connection(packet: &PacketRecord, info_lower: &str) -> bool {
    POOL_PORTS.contains(&packet.dst_port) || contains_any_ignore_case(info_lower, POOL_DOMAIN_HINTS)
}

fn evaluate_source(source: &str, evidence: MinerEvidence, packets: &[PacketRecord]) -> Option<AnomalyRecord> {
    let stratum_hit = !evidence.stratum.is_empty();
    let distinct_pools = evidence.pool_destinations.len();
    let pool_hit = distinct_pools >= POOL_DISTINCT_DESTINATIONS;
    if !stratum_hit && !pool_hit {
        return None;
    }

    let mut risk = 0.0;
    let mut indicators = Vec::new();
    let mut matched: Vec<usize> = Vec::new();
    if stratum_hit {
        risk = combine_risk(risk, STRATUM_BASE_RISK);
        indicators.push("stratum-protocol");
        matched.extend(&evidence.stratum);
    }
    if pool_hit {
        risk = combine_risk(
            risk,
            risk_from_exceedance(POOL_BASE_RISK, distinct_pools as f64, POOL_DISTINCT_DESTINATIONS as f64),
        );
        indicators.push("pool-fan-out");
        matched.extend(&evidence.pool);
    }
    matched.sort_unstable();
    matched.dedup();
    sort_chronologically(&mut matched, packets);

    let indicator_list = indicators.join(", ");
    let mut builder = AnomalyBuilder::new(AnomalyType::CryptoMining, NAME)
        .risk(risk)
        .ip(source)
        .description(format!("Crypto-mining activity from {}", source))
        .detailed_analysis(format!(
            "{} shows mining indicators ({}): {} stratum message(s), connections to {} pool-like \
             destination(s) (threshold {}).",
            source, indicator_list, evidence.stratum.len(), distinct_pools, POOL_DISTINCT_DESTINATIONS
        ))
        .meta("indicators", indicator_list.clone())
        .meta("stratum_messages", evidence.stratum.len())
        .meta("distinct_pool_destinations", distinct_pools);

    for &i in &matched {
        let packet = &packets[i];
        builder.record_packet(packet);
        builder.add_ip(&packet.dst_ip);
        builder.add_port(packet.dst_port);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::anomaly::Severity;
    use crate::logic::detection::detectors::fixtures::tcp;
    use crate::logic::packet::TcpFlags;

    const PSH_ACK: u16 = TcpFlags::PSH | TcpFlags::ACK;

    fn run(packets: &[PacketRecord]) -> Vec<AnomalyRecord> {
        CryptoMiningDetector.detect(packets, &CancellationToken::new()).unwrap()
    }

    #[test]
    fn test_stratum_subscribe_flags_source() {
        let packets = vec![
            tcp(1, 0, "10.0.0.44", 51000, "198.51.100.80", 3333, PSH_ACK)
                .with_info(r#"{"id":1,"method":"mining.subscribe","params":["cpuminer/2.5"]}"#),
            tcp(2, 50, "10.0.0.44", 51000, "198.51.100.80", 3333, PSH_ACK)
                .with_info(r#"{"id":2,"method":"mining.authorize","params":["wallet.worker","x"]}"#),
        ];
        let anomalies = run(&packets);
        assert_eq!(anomalies.len(), 1);
        let record = &anomalies[0];
        assert_eq!(record.anomaly_type, AnomalyType::CryptoMining);
        assert_eq!(record.occurrence_count, 2);
        assert!(record.severity >= Severity::High);
        assert!(record.affected_ips.contains("10.0.0.44"));
    }

    #[test]
    fn test_xmrig_login_matches() {
        let packets = vec![tcp(1, 0, "10.0.0.45", 51000, "198.51.100.81", 443, PSH_ACK)
            .with_info(r#"{"id":1,"jsonrpc":"2.0","method": "login","params":{"agent":"XMRig/6.20"}}"#)];
        assert_eq!(run(&packets).len(), 1);
    }

    #[test]
    fn test_pool_fan_out_needs_six_destinations() {
        let five: Vec<PacketRecord> = (0..5u64)
            .map(|i| tcp(i + 1, (i * 100) as i64, "10.0.0.46", 52000, &format!("203.0.113.{}", i + 1), 4444, PSH_ACK))
            .collect();
        assert!(run(&five).is_empty());

        let six: Vec<PacketRecord> = (0..6u64)
            .map(|i| tcp(i + 1, (i * 100) as i64, "10.0.0.46", 52000, &format!("203.0.113.{}", i + 1), 4444, PSH_ACK))
            .collect();
        let anomalies = run(&six);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].metadata_value("distinct_pool_destinations").and_then(|v| v.as_i64()), Some(6));
    }

    #[test]
    fn test_both_indicators_score_higher_than_either() {
        let mut packets: Vec<PacketRecord> = (0..6u64)
            .map(|i| tcp(i + 1, (i * 100) as i64, "10.0.0.47", 52000, &format!("203.0.113.{}", i + 1), 14444, PSH_ACK))
            .collect();
        let pool_only = run(&packets)[0].severity_score;

        packets.push(tcp(7, 700, "10.0.0.47", 52000, "203.0.113.1", 14444, PSH_ACK).with_info("mining.submit"));
        let combined = run(&packets)[0].severity_score;
        assert!(combined > pool_only);
        assert!(combined > STRATUM_BASE_RISK);
    }

    #[test]
    fn test_ordinary_web_traffic_is_quiet() {
        let packets: Vec<PacketRecord> = (0..20u64)
            .map(|i| tcp(i + 1, (i * 10) as i64, "10.0.0.48", 53000, &format!("93.184.216.{}", i), 443, PSH_ACK).with_info("Application Data"))
            .collect();
        assert!(run(&packets).is_empty());
    }
}
