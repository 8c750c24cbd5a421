//! Sliding Time-Window Helpers
//!
//! Two-pointer scans over a group's chronologically sorted packet indices.
//! A window covers `[t, t + window)`. All scans are O(n) after sorting.

use std::collections::HashMap;
use std::hash::Hash;

use crate::logic::packet::PacketRecord;

pub const MICROS_PER_SEC: i64 = 1_000_000;

pub fn secs(n: i64) -> i64 {
    n * MICROS_PER_SEC
}

/// Sort indices by timestamp; frame number breaks ties
pub fn sort_chronologically(indices: &mut [usize], packets: &[PacketRecord]) {
    indices.sort_by_key(|&i| (packets[i].micros(), packets[i].frame_number));
}

/// Densest window found by a scan; `start..end` indexes the sorted slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowPeak {
    pub value: u64,
    pub start: usize,
    pub end: usize,
}

impl WindowPeak {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Max number of packets inside any window
pub fn peak_count(sorted: &[usize], packets: &[PacketRecord], window_micros: i64) -> WindowPeak {
    peak_sum(sorted, packets, window_micros, |_| 1)
}

/// Max sum of `value(packet)` inside any window
pub fn peak_sum<F>(sorted: &[usize], packets: &[PacketRecord], window_micros: i64, value: F) -> WindowPeak
where
    F: Fn(&PacketRecord) -> u64,
{
    let mut best = WindowPeak::default();
    let mut left = 0usize;
    let mut running: u64 = 0;

    for right in 0..sorted.len() {
        let t_right = packets[sorted[right]].micros();
        running = running.saturating_add(value(&packets[sorted[right]]));

        while t_right - packets[sorted[left]].micros() >= window_micros {
            running = running.saturating_sub(value(&packets[sorted[left]]));
            left += 1;
        }

        if running > best.value {
            best = WindowPeak { value: running, start: left, end: right + 1 };
        }
    }
    best
}

/// Max number of distinct keys inside any window; packets without a key are ignored
pub fn peak_distinct<'a, K, F>(
    sorted: &[usize],
    packets: &'a [PacketRecord],
    window_micros: i64,
    key: F,
) -> WindowPeak
where
    K: Hash + Eq,
    F: Fn(&'a PacketRecord) -> Option<K>,
{
    let mut best = WindowPeak::default();
    let mut counts: HashMap<K, usize> = HashMap::new();
    let mut left = 0usize;

    for right in 0..sorted.len() {
        let t_right = packets[sorted[right]].micros();
        if let Some(k) = key(&packets[sorted[right]]) {
            *counts.entry(k).or_insert(0) += 1;
        }

        while t_right - packets[sorted[left]].micros() >= window_micros {
            if let Some(k) = key(&packets[sorted[left]]) {
                if let Some(n) = counts.get_mut(&k) {
                    *n -= 1;
                    if *n == 0 {
                        counts.remove(&k);
                    }
                }
            }
            left += 1;
        }

        let distinct = counts.len() as u64;
        if distinct > best.value {
            best = WindowPeak { value: distinct, start: left, end: right + 1 };
        }
    }
    best
}

/// Events per second for a peak measured over `window_micros`
pub fn rate_per_sec(count: u64, window_micros: i64) -> f64 {
    if window_micros <= 0 {
        return 0.0;
    }
    count as f64 / (window_micros as f64 / MICROS_PER_SEC as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn packets_at(offsets_ms: &[i64]) -> Vec<PacketRecord> {
        let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        offsets_ms
            .iter()
            .enumerate()
            .map(|(i, ms)| PacketRecord::new(i as u64 + 1, base + Duration::milliseconds(*ms)).with_payload_len(10))
            .collect()
    }

    #[test]
    fn test_peak_count_finds_densest_second() {
        let packets = packets_at(&[0, 100, 1500, 1600, 1700, 1800, 5000]);
        let sorted: Vec<usize> = (0..packets.len()).collect();
        let peak = peak_count(&sorted, &packets, secs(1));
        assert_eq!(peak.value, 4);
        assert_eq!(&sorted[peak.start..peak.end], &[2, 3, 4, 5]);
    }

    #[test]
    fn test_window_end_is_exclusive() {
        let packets = packets_at(&[0, 1000]);
        let sorted = vec![0, 1];
        assert_eq!(peak_count(&sorted, &packets, secs(1)).value, 1);
        assert_eq!(peak_count(&sorted, &packets, secs(2)).value, 2);
    }

    #[test]
    fn test_peak_sum_and_sorting() {
        let packets = packets_at(&[3000, 0, 200, 2900]);
        let mut sorted: Vec<usize> = (0..packets.len()).collect();
        sort_chronologically(&mut sorted, &packets);
        assert_eq!(sorted, vec![1, 2, 3, 0]);

        let peak = peak_sum(&sorted, &packets, secs(1), |p| p.payload_len);
        assert_eq!(peak.value, 20);
    }

    #[test]
    fn test_peak_distinct_counts_keys() {
        let mut packets = packets_at(&[0, 10, 20, 30, 5000]);
        for (i, port) in [80u16, 80, 443, 22, 8080].iter().enumerate() {
            packets[i].dst_port = *port;
        }
        let sorted: Vec<usize> = (0..packets.len()).collect();
        let peak = peak_distinct(&sorted, &packets, secs(1), |p| Some(p.dst_port));
        assert_eq!(peak.value, 3);
        assert_eq!(peak.len(), 4);
    }

    #[test]
    fn test_empty_group() {
        let packets: Vec<PacketRecord> = Vec::new();
        let peak = peak_count(&[], &packets, secs(1));
        assert!(peak.is_empty());
        assert_eq!(rate_per_sec(peak.value, secs(1)), 0.0);
    }
}
