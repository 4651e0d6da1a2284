//! Tap tempo
//!
//! Turns a sequence of taps into a tempo: the mean of the last few
//! intervals, rounded to a whole BPM and clamped to the supported range.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::model::{clamp_tempo, MetronomeConfig, MAX_TEMPO};

/// Intervals averaged into the estimate
pub const TAP_WINDOW: usize = 4;

/// Gap after which a tap starts a new session
pub const TAP_TIMEOUT: Duration = Duration::from_millis(2000);

/// Intervals needed before a tempo is reported
const MIN_INTERVALS: usize = 2;

/// Tap tempo estimator
#[derive(Debug, Clone, Default)]
pub struct TapTempo {
    intervals: VecDeque<Duration>,
    last_tap: Option<Instant>,
}

impl TapTempo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tap now
    pub fn tap(&mut self) -> Option<f64> {
        self.tap_at(Instant::now())
    }

    /// Register a tap at `now`
    ///
    /// Returns the estimated tempo once enough intervals are buffered. The
    /// first tap, and any tap more than [`TAP_TIMEOUT`] after the previous
    /// one, starts a new session and returns `None`.
    pub fn tap_at(&mut self, now: Instant) -> Option<f64> {
        let previous = self.last_tap.replace(now);

        let delta = match previous {
            Some(previous) => now.saturating_duration_since(previous),
            None => return None,
        };

        if delta > TAP_TIMEOUT {
            debug!("Tap gap {:?}, starting over", delta);
            self.intervals.clear();
            return None;
        }

        if self.intervals.len() == TAP_WINDOW {
            self.intervals.pop_front();
        }
        self.intervals.push_back(delta);

        self.tempo()
    }

    /// Current estimate, if enough intervals are buffered
    pub fn tempo(&self) -> Option<f64> {
        if self.intervals.len() < MIN_INTERVALS {
            return None;
        }

        let total: Duration = self.intervals.iter().sum();
        let mean_ms = total.as_secs_f64() * 1000.0 / self.intervals.len() as f64;
        if mean_ms <= 0.0 {
            return Some(MAX_TEMPO);
        }

        Some(clamp_tempo((60_000.0 / mean_ms).round()))
    }

    /// Tap now and return `config` with the estimated tempo
    pub fn apply_to(&mut self, config: &MetronomeConfig) -> Option<MetronomeConfig> {
        self.tap().map(|bpm| config.with_tempo(bpm))
    }

    /// Buffered intervals, oldest first
    pub fn intervals(&self) -> impl Iterator<Item = Duration> + '_ {
        self.intervals.iter().copied()
    }

    /// Forget every tap
    pub fn reset(&mut self) {
        self.intervals.clear();
        self.last_tap = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taps(offsets_ms: &[u64]) -> Vec<Option<f64>> {
        let start = Instant::now();
        let mut tap = TapTempo::new();
        offsets_ms
            .iter()
            .map(|ms| tap.tap_at(start + Duration::from_millis(*ms)))
            .collect()
    }

    #[test]
    fn test_steady_taps_at_120() {
        let results = taps(&[0, 500, 1000, 1500]);
        assert_eq!(results, vec![None, None, Some(120.0), Some(120.0)]);
    }

    #[test]
    fn test_long_gap_starts_new_session() {
        let results = taps(&[0, 3000]);
        assert_eq!(results, vec![None, None]);

        let results = taps(&[0, 500, 1000, 4000, 4500]);
        assert_eq!(results[3], None);
        assert_eq!(results[4], None);
    }

    #[test]
    fn test_gap_at_timeout_is_kept() {
        let results = taps(&[0, 2000, 4000]);
        assert_eq!(results[2], Some(30.0));
    }

    #[test]
    fn test_rounding() {
        // mean 700ms -> 85.71 BPM
        let results = taps(&[0, 700, 1400]);
        assert_eq!(results[2], Some(86.0));
    }

    #[test]
    fn test_window_keeps_last_four() {
        let start = Instant::now();
        let mut tap = TapTempo::new();
        let mut at = start;
        tap.tap_at(at);
        for _ in 0..4 {
            at += Duration::from_millis(1000);
            tap.tap_at(at);
        }
        for _ in 0..4 {
            at += Duration::from_millis(500);
            tap.tap_at(at);
        }

        assert_eq!(tap.intervals().count(), TAP_WINDOW);
        assert!(tap.intervals().all(|i| i == Duration::from_millis(500)));
        assert_eq!(tap.tempo(), Some(120.0));
    }

    #[test]
    fn test_clamped() {
        let fast = taps(&[0, 50, 100]);
        assert_eq!(fast[2], Some(400.0));

        let slow = taps(&[0, 1900, 3800, 5700]);
        assert_eq!(slow[3], Some(32.0));
    }

    #[test]
    fn test_simultaneous_taps() {
        let results = taps(&[0, 0, 0]);
        assert_eq!(results, vec![None, None, Some(MAX_TEMPO)]);
    }

    #[test]
    fn test_reset() {
        let start = Instant::now();
        let mut tap = TapTempo::new();
        tap.tap_at(start);
        tap.tap_at(start + Duration::from_millis(500));
        tap.reset();

        assert_eq!(tap.intervals().count(), 0);
        assert_eq!(tap.tap_at(start + Duration::from_millis(1000)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_to_config() {
        let mut tap = TapTempo::new();
        let config = MetronomeConfig::default();

        assert!(tap.apply_to(&config).is_none());
        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(tap.apply_to(&config).is_none());
        tokio::time::advance(Duration::from_millis(400)).await;

        let updated = tap.apply_to(&config).unwrap();
        assert_eq!(updated.tempo, 150.0);
        assert_eq!(updated.time_signature, config.time_signature);
    }
}
