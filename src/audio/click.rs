//! Click synthesis

use std::collections::HashMap;
use std::f32::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Decay rate of the click envelope (per second)
const DECAY: f32 = 30.0;

/// Render one click: a sine wave with exponential decay
pub fn synthesize_click(sample_rate: u32, frequency: f32, gain: f32, duration: Duration) -> Vec<f32> {
    let num_samples = (duration.as_secs_f64() * sample_rate as f64).round() as usize;
    let gain = gain.clamp(0.0, 1.0);

    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let envelope = (-t * DECAY).exp();
            (2.0 * PI * frequency * t).sin() * envelope * gain
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ClickKey {
    frequency: u32,
    gain: u32,
    duration_us: u64,
}

/// Synthesized clicks, reused across ticks
///
/// A metronome only ever plays a handful of distinct clicks, so each is
/// rendered once per sample rate.
#[derive(Debug)]
pub struct ClickCache {
    sample_rate: u32,
    clicks: Mutex<HashMap<ClickKey, Arc<[f32]>>>,
}

impl ClickCache {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            clicks: Mutex::new(HashMap::new()),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples for the given click, synthesized on first use
    pub fn get(&self, frequency: f32, gain: f32, duration: Duration) -> Arc<[f32]> {
        let key = ClickKey {
            frequency: frequency.to_bits(),
            gain: gain.to_bits(),
            duration_us: duration.as_micros() as u64,
        };

        self.clicks
            .lock()
            .entry(key)
            .or_insert_with(|| synthesize_click(self.sample_rate, frequency, gain, duration).into())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.clicks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click_length() {
        let samples = synthesize_click(48000, 1000.0, 0.5, Duration::from_millis(50));
        assert_eq!(samples.len(), 2400);
    }

    #[test]
    fn test_click_is_audible_then_decays() {
        let samples = synthesize_click(48000, 1000.0, 0.5, Duration::from_millis(50));

        assert!(samples.iter().take(100).any(|&s| s.abs() > 0.01));
        let head = samples[..240].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        let tail = samples[2160..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(tail < head);
        assert!(samples.iter().all(|s| s.abs() <= 0.5));
    }

    #[test]
    fn test_cache_reuses_samples() {
        let cache = ClickCache::new(48000);
        let first = cache.get(800.0, 0.6, Duration::from_millis(30));
        let second = cache.get(800.0, 0.6, Duration::from_millis(30));
        let accent = cache.get(1000.0, 0.8, Duration::from_millis(30));

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &accent));
        assert_eq!(cache.len(), 2);
    }
}
