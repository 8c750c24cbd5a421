//! End-to-end: packets in, ranked anomalies and highlighted frames out.

use chrono::{DateTime, Duration, TimeZone, Utc};
use net_anomaly_core::{
    AnalysisConfig, AnalysisSession, AnomalyCategory, AnomalyFilter, AnomalyType, CancellationToken, PacketRecord,
    Severity, TcpFlags, TransportProtocol,
};

fn init_logging() {
    let _ = env_logger::Builder::from_default_env().is_test(true).try_init();
}

fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::milliseconds(ms)
}

/// SYN flood (frames 1..=600), an ICMP flood (1001..=1100) and an FTP login (2001, 2002)
fn capture() -> Vec<PacketRecord> {
    let mut packets = Vec::new();
    for i in 0..600u64 {
        packets.push(
            PacketRecord::new(i + 1, at(i as i64 * 2))
                .with_endpoints(&format!("203.0.113.{}", i % 100), 40000 + i as u16, "192.168.1.100", 443)
                .with_tcp_flags(TcpFlags::SYN),
        );
    }
    for i in 0..100u64 {
        packets.push(
            PacketRecord::new(1001 + i, at(i as i64 * 10))
                .with_endpoints("198.51.100.77", 0, "192.168.1.1", 0)
                .with_transport(TransportProtocol::Icmp)
                .with_protocol("ICMP")
                .with_info("Echo (ping) request"),
        );
    }
    for (n, info) in ["Request: USER ops", "Request: PASS not-in-output"].iter().enumerate() {
        packets.push(
            PacketRecord::new(2001 + n as u64, at(3000 + n as i64 * 10))
                .with_endpoints("10.1.1.5", 51515, "198.51.100.21", 21)
                .with_tcp_flags(TcpFlags::PSH | TcpFlags::ACK)
                .with_protocol("FTP")
                .with_info(info),
        );
    }
    packets
}

#[test]
fn analysis_ranks_and_indexes_findings() {
    init_logging();
    let mut session = AnalysisSession::new(&AnalysisConfig::default());
    let anomalies = session.analyze(&capture(), &CancellationToken::new()).unwrap();

    let types: Vec<AnomalyType> = anomalies.iter().map(|a| a.anomaly_type).collect();
    assert!(types.contains(&AnomalyType::SynFlood));
    assert!(types.contains(&AnomalyType::IcmpFlood));
    assert!(types.contains(&AnomalyType::CleartextCredentials));

    for pair in anomalies.windows(2) {
        assert!(pair[0].severity_score >= pair[1].severity_score);
    }
    for record in anomalies.iter() {
        assert!(record.sample_frames.len() <= 100);
        assert!(record.occurrence_count >= record.sample_frames.len() as u64);
        assert!(record.last_seen >= record.first_seen);
        assert!((0.0..=1.0).contains(&record.severity_score));
    }

    let index = session.index();
    let names = index.detector_names().unwrap();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);

    let network = index
        .frames_matching_filters(&AnomalyFilter::new().with_categories([AnomalyCategory::Network]))
        .unwrap();
    assert!(network.contains(&1));
    assert!(network.contains(&1001));
    assert!(!network.contains(&2001));

    let application = AnomalyFilter::new().with_detectors(["application-layer"]);
    assert_eq!(index.frames_matching_filters(&application).unwrap().into_iter().collect::<Vec<_>>(), vec![2001, 2002]);
    assert!(index.anomalies_for_frame(2002).unwrap().iter().any(|a| a.anomaly_type == AnomalyType::CleartextCredentials));

    assert!(index.frames_matching_filters(&AnomalyFilter::new()).unwrap().is_empty());
}

#[test]
fn exported_records_are_plain_data() {
    init_logging();
    let mut session = AnalysisSession::new(&AnalysisConfig::sequential());
    session.analyze(&capture(), &CancellationToken::new()).unwrap();

    let json = serde_json::to_string(session.anomalies()).unwrap();
    assert!(json.contains("\"detector_name\":\"network-layer\""));
    assert!(!json.contains("not-in-output"));

    let stats = session.index().stats().unwrap();
    let stats_json = serde_json::to_value(&stats).unwrap();
    assert!(stats_json["by_detector"]["network-layer"].as_u64().unwrap() >= 2);
    assert!(stats.by_severity.keys().all(|s| Severity::ALL.contains(s)));
}

#[test]
fn session_survives_a_cancelled_rerun() {
    init_logging();
    let mut session = AnalysisSession::new(&AnalysisConfig::default());
    session.analyze(&capture(), &CancellationToken::new()).unwrap();
    let before: Vec<AnomalyType> = session.anomalies().iter().map(|a| a.anomaly_type).collect();

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(session.analyze(&capture(), &cancel).unwrap_err().is_cancelled());

    let after: Vec<AnomalyType> = session.anomalies().iter().map(|a| a.anomaly_type).collect();
    assert_eq!(before, after);
    assert!(session.index().is_built());
}
