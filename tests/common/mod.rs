//! Shared test helpers
//!
//! A recording output device that logs every effect it renders, and can be
//! told to fail for a given source.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use tempokit::output::{DeviceError, DeviceSet, Effect, OutputDevice, OutputSourceConfig};

/// One rendered effect
#[derive(Debug, Clone)]
pub struct Render {
    pub source: String,
    pub effect: Effect,
    /// Time the device was asked to render
    pub at: Instant,
}

#[derive(Default)]
struct Log {
    renders: Vec<Render>,
    prepares: Vec<(String, Instant)>,
    render_failures: HashMap<String, DeviceError>,
    open_failures: HashSet<String>,
    open_delays: HashMap<String, Duration>,
}

/// Shared log of every recording device it builds
#[derive(Clone, Default)]
pub struct Recorder {
    log: Arc<Mutex<Log>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device set building a recording device for every kind
    pub fn devices(&self) -> DeviceSet {
        let audio = self.clone();
        let visual = self.clone();
        let haptic = self.clone();
        DeviceSet::new()
            .with_audio(move |config| audio.device(config))
            .with_visual(move |config| visual.device(config))
            .with_haptic(move |config| haptic.device(config))
    }

    fn device(&self, config: &OutputSourceConfig) -> Box<dyn OutputDevice> {
        Box::new(RecordingDevice {
            id: config.id.clone(),
            log: self.log.clone(),
        })
    }

    /// Make every render of `source` fail with `error`
    pub fn fail_render(&self, source: &str, error: DeviceError) {
        self.log
            .lock()
            .render_failures
            .insert(source.to_string(), error);
    }

    /// Make opening the device of `source` fail
    pub fn fail_open(&self, source: &str) {
        self.log.lock().open_failures.insert(source.to_string());
    }

    /// Make opening the device of `source` block the calling thread
    pub fn slow_open(&self, source: &str, delay: Duration) {
        self.log
            .lock()
            .open_delays
            .insert(source.to_string(), delay);
    }

    pub fn renders(&self) -> Vec<Render> {
        self.log.lock().renders.clone()
    }

    pub fn renders_of(&self, source: &str) -> Vec<Render> {
        self.log
            .lock()
            .renders
            .iter()
            .filter(|render| render.source == source)
            .cloned()
            .collect()
    }

    pub fn prepares_of(&self, source: &str) -> Vec<Instant> {
        self.log
            .lock()
            .prepares
            .iter()
            .filter(|(id, _)| id == source)
            .map(|(_, at)| *at)
            .collect()
    }
}

struct RecordingDevice {
    id: String,
    log: Arc<Mutex<Log>>,
}

impl OutputDevice for RecordingDevice {
    fn name(&self) -> &str {
        &self.id
    }

    fn open(&self) -> Result<(), DeviceError> {
        let delay = {
            let log = self.log.lock();
            if log.open_failures.contains(&self.id) {
                return Err(DeviceError::Unavailable(format!("{} has no device", self.id)));
            }
            log.open_delays.get(&self.id).copied()
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        Ok(())
    }

    fn prepare(&self, at: Instant) -> Result<(), DeviceError> {
        self.log.lock().prepares.push((self.id.clone(), at));
        Ok(())
    }

    fn render(&self, effect: &Effect) -> Result<(), DeviceError> {
        let mut log = self.log.lock();
        if let Some(error) = log.render_failures.get(&self.id) {
            return Err(error.clone());
        }
        log.renders.push(Render {
            source: self.id.clone(),
            effect: effect.clone(),
            at: Instant::now(),
        });
        Ok(())
    }

    fn close(&self) {}
}

/// Scheduled start of a click effect
pub fn click_time(effect: &Effect) -> Option<Instant> {
    match effect {
        Effect::Click { at, .. } => Some(*at),
        _ => None,
    }
}

/// Whether an effect marks an accented beat
pub fn is_accented(effect: &Effect) -> bool {
    match effect {
        Effect::Click { frequency, .. } => *frequency >= 1000.0,
        Effect::Flash { accent, .. } => *accent,
        Effect::Pulse { intensity, .. } => *intensity >= 0.7,
    }
}
