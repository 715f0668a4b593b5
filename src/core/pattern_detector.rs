//! Statistical heuristics for scripted traffic.
//!
//! Two independent signals: near-constant inter-arrival times at a rate no
//! person produces (regularity), and a raw request count in a short
//! sub-window above a fixed size (burst).

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::ledger::IdentityLog;

/// Tuning knobs for the detector
#[derive(Debug, Clone, PartialEq)]
pub struct PatternConfig {
    /// Minimum recent events before any verdict is reached
    pub min_events: usize,
    /// Lookback for the regularity sample
    pub lookback: Duration,
    /// Most recent events used for the interval statistics
    pub sample_size: usize,
    /// Interval variance (seconds squared) below which traffic is "regular"
    pub variance_epsilon: f64,
    /// Mean interval (seconds) below which regular traffic is implausible for a person
    pub max_mean_interval: f64,
    /// Sub-window for the burst count
    pub burst_window: Duration,
    /// Events inside `burst_window` above which traffic is a burst
    pub burst_size: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            min_events: 10,
            lookback: Duration::from_secs(300),
            sample_size: 20,
            variance_epsilon: 0.01,
            max_mean_interval: 1.0,
            burst_window: Duration::from_secs(60),
            burst_size: 50,
        }
    }
}

/// Which heuristic fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Regular,
    Burst,
    RegularBurst,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternKind::Regular => write!(f, "regular_intervals"),
            PatternKind::Burst => write!(f, "burst"),
            PatternKind::RegularBurst => write!(f, "regular_burst"),
        }
    }
}

/// Positive detection with its audit details
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub kind: PatternKind,
    /// Informational 1-10 score
    pub severity: u8,
    /// Events inside the lookback when the verdict was made
    pub recent_events: usize,
    pub mean_interval: f64,
    pub interval_variance: f64,
}

/// Mean and population variance of consecutive gaps, in seconds
fn interval_stats(sample: &[Instant]) -> Option<(f64, f64)> {
    if sample.len() < 2 {
        return None;
    }
    let intervals: Vec<f64> = sample
        .windows(2)
        .map(|pair| pair[1].duration_since(pair[0]).as_secs_f64())
        .collect();
    let n = intervals.len() as f64;
    let mean = intervals.iter().sum::<f64>() / n;
    let variance = intervals.iter().map(|gap| (gap - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance))
}

#[derive(Debug, Clone, Default)]
pub struct PatternDetector {
    config: PatternConfig,
}

impl PatternDetector {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PatternConfig {
        &self.config
    }

    /// Inspect the identity's log; `None` means nothing suspicious or not
    /// enough evidence yet
    pub fn detect(&self, log: &IdentityLog, now: Instant) -> Option<PatternMatch> {
        let recent: Vec<Instant> = log.within(now, self.config.lookback).copied().collect();
        if recent.len() < self.config.min_events {
            return None;
        }

        let sample_start = recent.len().saturating_sub(self.config.sample_size.max(2));
        let (mean, variance) = interval_stats(&recent[sample_start..])?;

        let regular =
            variance < self.config.variance_epsilon && mean < self.config.max_mean_interval;
        let burst_count = log.count_within(now, self.config.burst_window);
        let burst = burst_count > self.config.burst_size;

        let kind = match (regular, burst) {
            (true, true) => PatternKind::RegularBurst,
            (true, false) => PatternKind::Regular,
            (false, true) => PatternKind::Burst,
            (false, false) => return None,
        };

        let severity = match kind {
            PatternKind::Regular => 7,
            PatternKind::Burst if burst_count > self.config.burst_size * 2 => 9,
            PatternKind::Burst => 8,
            PatternKind::RegularBurst => 10,
        };

        Some(PatternMatch {
            kind,
            severity,
            recent_events: recent.len(),
            mean_interval: mean,
            interval_variance: variance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spaced_log(start: Instant, gaps_ms: &[u64]) -> (IdentityLog, Instant) {
        let mut log = IdentityLog::default();
        let mut at = start;
        log.record(at);
        for gap in gaps_ms {
            at += Duration::from_millis(*gap);
            log.record(at);
        }
        (log, at)
    }

    #[test]
    fn too_few_events_is_never_suspicious() {
        let detector = PatternDetector::default();
        let (log, now) = spaced_log(Instant::now(), &[50; 8]);
        assert_eq!(log.len(), 9);
        assert!(detector.detect(&log, now).is_none());
    }

    #[test]
    fn uniform_fast_intervals_are_flagged() {
        let detector = PatternDetector::default();
        let (log, now) = spaced_log(Instant::now(), &[50; 9]);

        let found = detector.detect(&log, now).unwrap();
        assert_eq!(found.kind, PatternKind::Regular);
        assert_eq!(found.severity, 7);
        assert!((found.mean_interval - 0.05).abs() < 1e-9);
        assert!(found.interval_variance < 1e-9);
    }

    #[test]
    fn uniform_slow_intervals_look_human() {
        let detector = PatternDetector::default();
        let (log, now) = spaced_log(Instant::now(), &[2_000; 12]);
        assert!(detector.detect(&log, now).is_none());
    }

    #[test]
    fn jittery_intervals_are_not_regular() {
        let detector = PatternDetector::default();
        let gaps = [100, 900, 150, 850, 50, 950, 200, 700, 120, 880, 60];
        let (log, now) = spaced_log(Instant::now(), &gaps);
        assert!(detector.detect(&log, now).is_none());
    }

    #[test]
    fn burst_fires_regardless_of_regularity() {
        let detector = PatternDetector::new(PatternConfig {
            burst_size: 20,
            ..PatternConfig::default()
        });
        let gaps: Vec<u64> = (0..25).map(|i| if i % 2 == 0 { 50 } else { 1_900 }).collect();
        let (log, now) = spaced_log(Instant::now(), &gaps);

        let found = detector.detect(&log, now).unwrap();
        assert_eq!(found.kind, PatternKind::Burst);
        assert_eq!(found.severity, 8);
    }

    #[test]
    fn old_events_fall_out_of_the_lookback() {
        let detector = PatternDetector::default();
        let (log, last) = spaced_log(Instant::now(), &[50; 12]);
        let later = last + Duration::from_secs(301);
        assert!(detector.detect(&log, later).is_none());
    }
}
