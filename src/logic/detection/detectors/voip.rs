//! VoIP Quality Detector
//!
//! RTP streams keyed by (source ip:port, destination ip:port, SSRC). Header
//! fields come from the dissector's info string ("PT=..., SSRC=0x..,
//! Seq=.., Time=..").
//!
//! Per stream:
//! - RFC 3550 interarrival jitter (gain 1/16) in RTP clock units
//! - extended sequence numbers across 16-bit wrap
//! - every 50 packets an interval closes with loss% and current jitter, which
//!   feed a simplified E-model: R -> MOS
//!
//! A stream is flagged when an interval's MOS falls >= 0.5 below the mean of
//! the intervals before it and lands below 3.5.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{non_empty, sorted_groups};
use crate::logic::anomaly::{scaled_risk, AnomalyBuilder, AnomalyCategory, AnomalyRecord, AnomalyType};
use crate::logic::detection::cancel::CancellationToken;
use crate::logic::detection::types::DetectionError;
use crate::logic::detection::window::{sort_chronologically, MICROS_PER_SEC};
use crate::logic::detection::Detector;
use crate::logic::packet::PacketRecord;

// ============================================================================
// CONSTANTS
// ============================================================================

pub const NAME: &str = "voip-quality";

/// Packets per MOS interval
pub const INTERVAL_PACKETS: usize = 50;

/// Drop against the running mean that counts as degradation
pub const MOS_DROP: f64 = 0.5;

/// Degraded intervals must also be below this
pub const MOS_POOR: f64 = 3.5;

/// Trailing intervals shorter than this are not scored
const MIN_INTERVAL_PACKETS: usize = INTERVAL_PACKETS / 2;

const DEFAULT_CLOCK_RATE: u32 = 8000;
const WIDEBAND_CLOCK_RATE: u32 = 48000;
const VIDEO_CLOCK_RATE: u32 = 90000;

const JITTER_GAIN: f64 = 1.0 / 16.0;

// E-model
const R_BASE: f64 = 93.2;
const CODEC_DELAY_MS: f64 = 10.0;
const LATENCY_KNEE_MS: f64 = 160.0;
const LOSS_PENALTY_PER_PCT: f64 = 2.5;
const MOS_MIN: f64 = 1.0;
const MOS_MAX: f64 = 4.5;

const DEGRADATION_BASE_RISK: f64 = 0.4;
const DEGRADATION_RISK_CEILING: f64 = 0.85;

static SSRC_FIELD: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"SSRC=0x([0-9A-Fa-f]{1,8})").ok());
static SEQ_FIELD: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"Seq=(\d+)").ok());
static TIME_FIELD: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"Time=(\d+)").ok());
static PT_FIELD: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"PT=([^,]+)").ok());

// ============================================================================
// RTP HEADER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct RtpHeader {
    ssrc: u32,
    seq: u16,
    timestamp: u32,
    clock_rate: u32,
}

fn capture<'t>(pattern: &Lazy<Option<Regex>>, text: &'t str) -> Option<&'t str> {
    let re = pattern.as_ref()?;
    re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Static payload-type names mapped to their RTP clock
fn clock_rate(payload_type: Option<&str>) -> u32 {
    let pt = match payload_type {
        Some(pt) => pt.to_ascii_lowercase(),
        None => return DEFAULT_CLOCK_RATE,
    };
    if pt.contains("opus") {
        WIDEBAND_CLOCK_RATE
    } else if ["h264", "h263", "h261", "vp8", "mpv", "jpeg", "video"].iter().any(|v| pt.contains(v)) {
        VIDEO_CLOCK_RATE
    } else {
        DEFAULT_CLOCK_RATE
    }
}

fn parse_rtp(info: &str) -> Option<RtpHeader> {
    let ssrc = u32::from_str_radix(capture(&SSRC_FIELD, info)?, 16).ok()?;
    let seq = capture(&SEQ_FIELD, info)?.parse::<u16>().ok()?;
    let timestamp = capture(&TIME_FIELD, info)?.parse::<u32>().ok()?;
    Some(RtpHeader { ssrc, seq, timestamp, clock_rate: clock_rate(capture(&PT_FIELD, info)) })
}

// ============================================================================
// STREAM METRICS
// ============================================================================

/// Per-packet state after processing it
#[derive(Debug, Clone, Copy)]
struct StreamSample {
    extended_seq: i64,
    jitter_ms: f64,
}

/// Running RFC 3550 receiver state
struct StreamTracker {
    clock_rate: f64,
    last_seq: Option<(u16, i64)>,
    last_ts: Option<(u32, i64)>,
    last_transit: Option<f64>,
    jitter: f64,
}

impl StreamTracker {
    fn new(clock_rate: u32) -> Self {
        Self {
            clock_rate: clock_rate as f64,
            last_seq: None,
            last_ts: None,
            last_transit: None,
            jitter: 0.0,
        }
    }

    fn observe(&mut self, header: &RtpHeader, arrival_micros: i64) -> StreamSample {
        let extended_seq = match self.last_seq {
            Some((seq, ext)) => ext + i64::from(header.seq.wrapping_sub(seq) as i16),
            None => i64::from(header.seq),
        };
        self.last_seq = Some((header.seq, extended_seq));

        let extended_ts = match self.last_ts {
            Some((ts, ext)) => ext + i64::from(header.timestamp.wrapping_sub(ts) as i32),
            None => i64::from(header.timestamp),
        };
        self.last_ts = Some((header.timestamp, extended_ts));

        let arrival = arrival_micros as f64 * self.clock_rate / MICROS_PER_SEC as f64;
        let transit = arrival - extended_ts as f64;
        if let Some(previous) = self.last_transit {
            let d = (transit - previous).abs();
            self.jitter += (d - self.jitter) * JITTER_GAIN;
        }
        self.last_transit = Some(transit);

        StreamSample { extended_seq, jitter_ms: self.jitter / self.clock_rate * 1000.0 }
    }
}

/// Simplified E-model
pub fn mos_score(jitter_ms: f64, loss_pct: f64) -> f64 {
    let effective_latency = 2.0 * jitter_ms + CODEC_DELAY_MS;
    let latency_penalty = if effective_latency < LATENCY_KNEE_MS {
        effective_latency / 40.0
    } else {
        (effective_latency - 120.0) / 10.0
    };
    let r = (R_BASE - latency_penalty - LOSS_PENALTY_PER_PCT * loss_pct).clamp(0.0, 100.0);
    let mos = 1.0 + 0.035 * r + 7e-6 * r * (r - 60.0) * (100.0 - r);
    mos.clamp(MOS_MIN, MOS_MAX)
}

#[derive(Debug, Clone, PartialEq)]
struct IntervalScore {
    /// Positions into the stream's sorted packet list
    start: usize,
    end: usize,
    loss_pct: f64,
    jitter_ms: f64,
    mos: f64,
}

fn score_intervals(samples: &[StreamSample]) -> Vec<IntervalScore> {
    let mut scores = Vec::new();
    let mut previous_max: Option<i64> = None;

    for (n, chunk) in samples.chunks(INTERVAL_PACKETS).enumerate() {
        if chunk.len() < MIN_INTERVAL_PACKETS {
            break;
        }
        let max_seq = chunk.iter().map(|s| s.extended_seq).max().unwrap_or(0);
        let expected = match previous_max {
            Some(prev) => max_seq - prev,
            None => max_seq - chunk.iter().map(|s| s.extended_seq).min().unwrap_or(max_seq) + 1,
        };
        previous_max = Some(previous_max.map_or(max_seq, |p| p.max(max_seq)));

        let received = chunk.len() as i64;
        let loss_pct = if expected > 0 {
            ((expected - received).max(0) as f64 / expected as f64) * 100.0
        } else {
            0.0
        };
        let jitter_ms = chunk.last().map(|s| s.jitter_ms).unwrap_or(0.0);

        let start = n * INTERVAL_PACKETS;
        scores.push(IntervalScore {
            start,
            end: start + chunk.len(),
            loss_pct,
            jitter_ms,
            mos: mos_score(jitter_ms, loss_pct),
        });
    }
    scores
}

/// Intervals degraded against the running mean, with the size of each drop
fn degraded_intervals(scores: &[IntervalScore]) -> Vec<(&IntervalScore, f64)> {
    let mut degraded = Vec::new();
    let mut sum = 0.0;
    for (n, score) in scores.iter().enumerate() {
        if n > 0 {
            let mean = sum / n as f64;
            let drop = mean - score.mos;
            if drop >= MOS_DROP && score.mos < MOS_POOR {
                degraded.push((score, drop));
            }
        }
        sum += score.mos;
    }
    degraded
}

// ============================================================================
// DETECTOR
// ============================================================================

type StreamKey<'a> = (&'a str, u16, &'a str, u16, u32);

pub struct VoipQualityDetector;

impl Detector for VoipQualityDetector {
    fn name(&self) -> &str {
        NAME
    }

    fn category(&self) -> AnomalyCategory {
        AnomalyCategory::Voip
    }

    fn detect(&self, packets: &[PacketRecord], cancel: &CancellationToken) -> Result<Vec<AnomalyRecord>, DetectionError> {
        let mut streams: HashMap<StreamKey, Vec<(usize, RtpHeader)>> = HashMap::new();
        for (i, packet) in packets.iter().enumerate() {
            cancel.poll(i)?;
            if !packet.has_protocol("RTP") {
                continue;
            }
            let header = match parse_rtp(packet.info_str()) {
                Some(header) => header,
                None => continue,
            };
            if let (Some(src), Some(dst)) = (non_empty(&packet.src_ip), non_empty(&packet.dst_ip)) {
                let key = (src, packet.src_port, dst, packet.dst_port, header.ssrc);
                streams.entry(key).or_default().push((i, header));
            }
        }

        let mut anomalies = Vec::new();
        for (key, stream) in sorted_groups(streams) {
            cancel.check()?;
            anomalies.extend(evaluate_stream(key, stream, packets));
        }

        log::debug!("{}: {} anomalies from {} packets", NAME, anomalies.len(), packets.len());
        Ok(anomalies)
    }
}

fn evaluate_stream(key: StreamKey, stream: Vec<(usize, RtpHeader)>, packets: &[PacketRecord]) -> Option<AnomalyRecord> {
    let (src, src_port, dst, dst_port, ssrc) = key;
    if stream.len() < INTERVAL_PACKETS + MIN_INTERVAL_PACKETS {
        return None;
    }

    let headers: HashMap<usize, RtpHeader> = stream.iter().copied().collect();
    let mut order: Vec<usize> = stream.iter().map(|(i, _)| *i).collect();
    sort_chronologically(&mut order, packets);

    let clock = stream.first().map(|(_, h)| h.clock_rate).unwrap_or(DEFAULT_CLOCK_RATE);
    let mut tracker = StreamTracker::new(clock);
    let samples: Vec<StreamSample> = order
        .iter()
        .filter_map(|i| headers.get(i).map(|h| tracker.observe(h, packets[*i].micros())))
        .collect();

    let scores = score_intervals(&samples);
    let degraded = degraded_intervals(&scores);
    if degraded.is_empty() {
        return None;
    }

    let worst_drop = degraded.iter().map(|(_, d)| *d).fold(0.0, f64::max);
    let worst_mos = degraded.iter().map(|(s, _)| s.mos).fold(MOS_MAX, f64::min);
    let baseline_mos = scores.first().map(|s| s.mos).unwrap_or(MOS_MAX);
    let max_loss = degraded.iter().map(|(s, _)| s.loss_pct).fold(0.0, f64::max);
    let max_jitter = degraded.iter().map(|(s, _)| s.jitter_ms).fold(0.0, f64::max);
    let risk = scaled_risk(DEGRADATION_BASE_RISK, DEGRADATION_RISK_CEILING, worst_drop, MOS_DROP);

    let stream_label = format!("{}:{} -> {}:{} (SSRC 0x{:08x})", src, src_port, dst, dst_port, ssrc);
    let mut builder = AnomalyBuilder::new(AnomalyType::VoipQualityDegradation, NAME)
        .risk(risk)
        .ip(src)
        .ip(dst)
        .port(src_port)
        .port(dst_port)
        .description(format!("Call quality dropped to MOS {:.2} on {}", worst_mos, stream_label))
        .detailed_analysis(format!(
            "RTP stream {} started at MOS {:.2}; {} of {} intervals degraded by up to {:.2} below the \
             running mean (threshold {:.1}, poor < {:.1}). Worst interval: {:.1}% loss, {:.1} ms jitter.",
            stream_label,
            baseline_mos,
            degraded.len(),
            scores.len(),
            worst_drop,
            MOS_DROP,
            MOS_POOR,
            max_loss,
            max_jitter
        ))
        .meta("ssrc", format!("0x{:08x}", ssrc))
        .meta("clock_rate", i64::from(clock))
        .meta("min_mos", worst_mos)
        .meta("max_mos_drop", worst_drop)
        .meta("max_loss_pct", max_loss)
        .meta("max_jitter_ms", max_jitter)
        .meta("degraded_intervals", degraded.len());

    for (score, _) in &degraded {
        for &i in &order[score.start..score.end] {
            builder.record_packet(&packets[i]);
        }
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::detection::detectors::fixtures::udp;

    fn rtp(frame: u64, ms: i64, seq: u16, time: u32) -> PacketRecord {
        udp(frame, ms, "10.0.0.30", 16384, "10.0.0.31", 16386)
            .with_protocol("RTP")
            .with_info(&format!("PT=ITU-T G.711 PCMU, SSRC=0x1A2B3C4D, Seq={}, Time={}", seq, time))
    }

    fn run(packets: &[PacketRecord]) -> Vec<AnomalyRecord> {
        VoipQualityDetector.detect(packets, &CancellationToken::new()).unwrap()
    }

    #[test]
    fn test_parse_rtp_info() {
        let header = parse_rtp("PT=ITU-T G.711 PCMU, SSRC=0xDEADBEEF, Seq=65535, Time=160, Mark").unwrap();
        assert_eq!(header.ssrc, 0xDEAD_BEEF);
        assert_eq!(header.seq, 65535);
        assert_eq!(header.timestamp, 160);
        assert_eq!(header.clock_rate, 8000);

        let opus = parse_rtp("PT=DynamicRTP-Type-111 opus, SSRC=0x1, Seq=1, Time=960").unwrap();
        assert_eq!(opus.clock_rate, 48000);
        assert!(parse_rtp("Continuation").is_none());
    }

    #[test]
    fn test_mos_bounds() {
        let clean = mos_score(0.0, 0.0);
        assert!(clean > 4.3 && clean <= MOS_MAX);
        assert_eq!(mos_score(0.0, 100.0), MOS_MIN);
        assert!(mos_score(80.0, 0.0) < clean);
    }

    #[test]
    fn test_extended_sequence_survives_wrap() {
        let mut tracker = StreamTracker::new(8000);
        let mut last = 0;
        for (n, seq) in [65533u16, 65534, 65535, 0, 1, 2].iter().enumerate() {
            let header = RtpHeader { ssrc: 1, seq: *seq, timestamp: n as u32 * 160, clock_rate: 8000 };
            last = tracker.observe(&header, n as i64 * 20_000).extended_seq;
        }
        assert_eq!(last, 65538);
    }

    #[test]
    fn test_steady_stream_has_no_jitter() {
        let mut tracker = StreamTracker::new(8000);
        let mut jitter = f64::MAX;
        for n in 0..100u32 {
            let header = RtpHeader { ssrc: 1, seq: n as u16, timestamp: n * 160, clock_rate: 8000 };
            jitter = tracker.observe(&header, i64::from(n) * 20_000).jitter_ms;
        }
        assert!(jitter.abs() < 1e-6);
    }

    #[test]
    fn test_healthy_call_is_quiet() {
        let packets: Vec<PacketRecord> = (0..200u64).map(|i| rtp(i + 1, (i * 20) as i64, i as u16, i as u32 * 160)).collect();
        assert!(run(&packets).is_empty());
    }

    #[test]
    fn test_loss_burst_degrades_call() {
        // 100 clean packets, then 100 packets with every other sequence number missing
        let mut packets: Vec<PacketRecord> = (0..100u64).map(|i| rtp(i + 1, (i * 20) as i64, i as u16, i as u32 * 160)).collect();
        for i in 100..200u64 {
            let seq = 100 + (i - 100) * 2;
            packets.push(rtp(i + 1, (i * 20) as i64, seq as u16, seq as u32 * 160));
        }

        let anomalies = run(&packets);
        assert_eq!(anomalies.len(), 1);
        let record = &anomalies[0];
        assert_eq!(record.anomaly_type, AnomalyType::VoipQualityDegradation);
        assert_eq!(record.occurrence_count, 100);
        assert!(record.sample_frames.iter().all(|&f| f > 100));
        assert!(record.metadata_value("min_mos").and_then(|v| v.as_f64()).unwrap() < MOS_POOR);
        assert!(record.affected_ports.contains(&16386));
    }

    #[test]
    fn test_short_streams_are_not_scored() {
        let packets: Vec<PacketRecord> = (0..60u64).map(|i| rtp(i + 1, (i * 20) as i64, (i * 3) as u16, i as u32 * 160)).collect();
        assert!(run(&packets).is_empty());
    }
}
