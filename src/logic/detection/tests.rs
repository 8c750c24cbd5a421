//! Scenario Tests for the Detection Pipeline
//!
//! Kiểm tra engine + detectors chạy cùng nhau trên capture tổng hợp.

#[cfg(test)]
mod integration_tests {
    use crate::config::AnalysisConfig;
    use crate::logic::anomaly::{AnomalyCategory, AnomalyRecord, AnomalyType, Severity};
    use crate::logic::detection::detectors::fixtures::{syn, tcp, udp};
    use crate::logic::detection::{
        CancellationToken, DetectionEngine, DetectionError, Detector, ExfiltrationDetector, NetworkLayerDetector,
    };
    use crate::logic::packet::{PacketRecord, TcpFlags};

    // ========================================================================
    // FIXTURES
    // ========================================================================

    const ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz0123456789";

    /// 72 alphanumerics in two labels, rotated per query
    fn encoded_label(n: usize) -> String {
        let rotated = format!("{}{}", &ALPHABET[n % 36..], &ALPHABET[..n % 36]);
        format!("{}.{}", rotated, rotated.chars().rev().collect::<String>())
    }

    fn dns_tunnel_queries(first_frame: u64) -> Vec<PacketRecord> {
        (0..20u64)
            .map(|i| {
                let name = format!("{}.exfil.example.com", encoded_label(i as usize));
                udp(first_frame + i, (i * 100) as i64, "10.0.0.50", 51000 + i as u16, "10.0.0.1", 53)
                    .with_protocol("DNS")
                    .with_info(&format!("Standard query 0x{:04x} TXT {}", i, name))
            })
            .collect()
    }

    fn syn_flood(first_frame: u64) -> Vec<PacketRecord> {
        (0..1000u64)
            .map(|i| syn(first_frame + i, (i * 3) as i64, &format!("203.0.113.{}", i % 200), "192.168.1.100"))
            .collect()
    }

    fn cleartext_ftp(first_frame: u64) -> Vec<PacketRecord> {
        let psh_ack = TcpFlags::PSH | TcpFlags::ACK;
        vec![
            tcp(first_frame, 500, "10.0.0.7", 50500, "198.51.100.21", 21, psh_ack).with_protocol("FTP").with_info("Request: USER alice"),
            tcp(first_frame + 1, 520, "10.0.0.7", 50500, "198.51.100.21", 21, psh_ack).with_protocol("FTP").with_info("Request: PASS s3cret"),
        ]
    }

    fn mixed_capture() -> Vec<PacketRecord> {
        let mut packets = syn_flood(1);
        packets.extend(dns_tunnel_queries(2001));
        packets.extend(cleartext_ftp(3001));
        packets
    }

    /// Everything except the random id
    fn fingerprint(records: &[AnomalyRecord]) -> Vec<(AnomalyType, u64, u64, Vec<u64>, String)> {
        records
            .iter()
            .map(|r| (r.anomaly_type, r.severity_score.to_bits(), r.occurrence_count, r.sample_frames.clone(), r.detector_name.clone()))
            .collect()
    }

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn name(&self) -> &str {
            "always-fails"
        }

        fn category(&self) -> AnomalyCategory {
            AnomalyCategory::Network
        }

        fn detect(&self, _: &[PacketRecord], _: &CancellationToken) -> Result<Vec<AnomalyRecord>, DetectionError> {
            Err(DetectionError::Failed { detector: "always-fails".to_string(), reason: "synthetic".to_string() })
        }
    }

    struct PanickingDetector;

    impl Detector for PanickingDetector {
        fn name(&self) -> &str {
            "always-panics"
        }

        fn category(&self) -> AnomalyCategory {
            AnomalyCategory::Tcp
        }

        fn detect(&self, _: &[PacketRecord], _: &CancellationToken) -> Result<Vec<AnomalyRecord>, DetectionError> {
            panic!("synthetic detector panic");
        }
    }

    /// Cancels the shared token partway through its own run
    struct CancellingDetector;

    impl Detector for CancellingDetector {
        fn name(&self) -> &str {
            "cancels"
        }

        fn category(&self) -> AnomalyCategory {
            AnomalyCategory::Network
        }

        fn detect(&self, _: &[PacketRecord], cancel: &CancellationToken) -> Result<Vec<AnomalyRecord>, DetectionError> {
            cancel.cancel();
            cancel.check()?;
            Ok(Vec::new())
        }
    }

    // ========================================================================
    // SCENARIOS
    // ========================================================================

    #[test]
    fn test_syn_flood_through_engine() {
        let engine = DetectionEngine::new(&AnalysisConfig::default());
        let anomalies = engine.detect_all(&syn_flood(1), &CancellationToken::new()).unwrap();

        let floods: Vec<&AnomalyRecord> = anomalies.iter().filter(|a| a.anomaly_type == AnomalyType::SynFlood).collect();
        assert_eq!(floods.len(), 1);
        assert_eq!(floods[0].category, AnomalyCategory::Network);
        assert!(floods[0].severity >= Severity::High);
        assert_eq!(floods[0].occurrence_count, 1000);
        assert_eq!(floods[0].sample_frames.len(), 100);
    }

    #[test]
    fn test_dns_tunnel_single_record() {
        let engine = DetectionEngine::new(&AnalysisConfig::default());
        let anomalies = engine.detect_all(&dns_tunnel_queries(1), &CancellationToken::new()).unwrap();

        assert_eq!(anomalies.len(), 1, "unexpected: {:?}", fingerprint(&anomalies));
        let record = &anomalies[0];
        assert_eq!(record.category, AnomalyCategory::Exfiltration);
        assert_eq!(record.anomaly_type, AnomalyType::DnsExfiltration);
        assert_eq!(record.occurrence_count, 20);
        assert!(record.affected_ips.contains("10.0.0.50"));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let packets = mixed_capture();
        let parallel = DetectionEngine::new(&AnalysisConfig::default())
            .detect_all(&packets, &CancellationToken::new())
            .unwrap();
        let sequential = DetectionEngine::new(&AnalysisConfig::sequential())
            .detect_all(&packets, &CancellationToken::new())
            .unwrap();

        assert!(parallel.len() >= 3);
        assert_eq!(fingerprint(&parallel), fingerprint(&sequential));
    }

    #[test]
    fn test_output_is_ranked() {
        let anomalies = DetectionEngine::new(&AnalysisConfig::default())
            .detect_all(&mixed_capture(), &CancellationToken::new())
            .unwrap();
        for pair in anomalies.windows(2) {
            assert!(pair[0].severity_score >= pair[1].severity_score);
            if pair[0].severity_score == pair[1].severity_score {
                assert!(pair[0].occurrence_count >= pair[1].occurrence_count);
            }
        }
    }

    #[test]
    fn test_failing_detectors_do_not_change_the_rest() {
        let packets = mixed_capture();
        for parallel in [true, false] {
            let clean = DetectionEngine::with_detectors(vec![Box::new(NetworkLayerDetector), Box::new(ExfiltrationDetector)], parallel)
                .run(&packets, &CancellationToken::new())
                .unwrap();
            let noisy = DetectionEngine::with_detectors(
                vec![
                    Box::new(NetworkLayerDetector),
                    Box::new(FailingDetector),
                    Box::new(PanickingDetector),
                    Box::new(ExfiltrationDetector),
                ],
                parallel,
            )
            .run(&packets, &CancellationToken::new())
            .unwrap();

            assert_eq!(fingerprint(&clean.anomalies), fingerprint(&noisy.anomalies));
            assert!(noisy.is_partial());
            assert_eq!(noisy.failed_detectors(), vec!["always-fails", "always-panics"]);
            assert_eq!(noisy.outcomes.len(), 4);

            let panicked = &noisy.outcomes[2];
            assert_eq!(panicked.category, AnomalyCategory::Tcp);
            let message = panicked.error.as_deref().unwrap_or_default();
            assert!(message.starts_with("detector 'always-panics' failed: panicked"));
            assert!(message.contains("synthetic detector panic"));
        }
    }

    #[test]
    fn test_cancellation_is_an_error_not_an_empty_list() {
        let packets = mixed_capture();
        for parallel in [true, false] {
            let engine = DetectionEngine::with_detectors(vec![Box::new(NetworkLayerDetector), Box::new(CancellingDetector)], parallel);
            assert_eq!(engine.detect_all(&packets, &CancellationToken::new()), Err(DetectionError::Cancelled));
        }
    }

    #[test]
    fn test_detectors_observe_cancelled_token() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let packets = mixed_capture();
        assert_eq!(NetworkLayerDetector.detect(&packets, &cancel), Err(DetectionError::Cancelled));
        assert_eq!(ExfiltrationDetector.detect(&packets, &cancel), Err(DetectionError::Cancelled));
    }

    #[test]
    fn test_targeted_rescan() {
        let engine = DetectionEngine::new(&AnalysisConfig::default());
        let anomalies = engine
            .detect_with(&["application-layer"], &mixed_capture(), &CancellationToken::new())
            .unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].anomaly_type, AnomalyType::CleartextCredentials);
    }

    #[test]
    fn test_detection_is_idempotent() {
        let packets = mixed_capture();
        let engine = DetectionEngine::new(&AnalysisConfig::default());
        let first = engine.detect_all(&packets, &CancellationToken::new()).unwrap();
        let second = engine.detect_all(&packets, &CancellationToken::new()).unwrap();
        assert_eq!(fingerprint(&first), fingerprint(&second));
    }
}
