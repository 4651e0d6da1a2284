//! Metronome configuration snapshot
//!
//! A `MetronomeConfig` is always replaced as a whole. Readers hold an
//! immutable snapshot, so a fan-out in progress never sees a half-applied
//! change.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::output::SourceKind;

/// Slowest supported tempo in BPM
pub const MIN_TEMPO: f64 = 20.0;

/// Fastest supported tempo in BPM
pub const MAX_TEMPO: f64 = 400.0;

/// Maximum ticks per beat
pub const MAX_SUBDIVISIONS: u32 = 8;

/// Clamp a tempo into the supported range
pub fn clamp_tempo(bpm: f64) -> f64 {
    if bpm.is_nan() {
        return MIN_TEMPO;
    }
    bpm.clamp(MIN_TEMPO, MAX_TEMPO)
}

/// Time signature (beats per bar over beat unit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    /// Numerator: beats in one bar
    pub beats_per_bar: u32,
    /// Denominator: note value that gets one beat
    pub beat_unit: u32,
}

impl TimeSignature {
    /// Create a validated time signature
    pub fn new(beats_per_bar: u32, beat_unit: u32) -> Result<Self, ConfigError> {
        let signature = Self {
            beats_per_bar,
            beat_unit,
        };
        signature.validate()?;
        Ok(signature)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.beats_per_bar == 0 {
            return Err(ConfigError::InvalidTimeSignature(format!(
                "{self}: a bar needs at least one beat"
            )));
        }
        if !matches!(self.beat_unit, 1 | 2 | 4 | 8 | 16 | 32) {
            return Err(ConfigError::InvalidTimeSignature(format!(
                "{self}: beat unit must be a power of two up to 32"
            )));
        }
        Ok(())
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            beats_per_bar: 4,
            beat_unit: 4,
        }
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.beats_per_bar, self.beat_unit)
    }
}

impl FromStr for TimeSignature {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidTimeSignature(s.to_string());
        let (beats, unit) = s.trim().split_once('/').ok_or_else(invalid)?;
        let beats_per_bar = beats.trim().parse().map_err(|_| invalid())?;
        let beat_unit = unit.trim().parse().map_err(|_| invalid())?;
        Self::new(beats_per_bar, beat_unit)
    }
}

/// Beat indices (within a bar) that are accented
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<u32>", into = "Vec<u32>")]
pub struct AccentPattern(Vec<u32>);

impl From<Vec<u32>> for AccentPattern {
    fn from(beats: Vec<u32>) -> Self {
        Self::new(beats)
    }
}

impl From<AccentPattern> for Vec<u32> {
    fn from(pattern: AccentPattern) -> Self {
        pattern.0
    }
}

impl AccentPattern {
    /// Accent the given beat indices
    pub fn new(mut beats: Vec<u32>) -> Self {
        beats.sort_unstable();
        beats.dedup();
        Self(beats)
    }

    /// Accent only the first beat of the bar
    pub fn downbeat() -> Self {
        Self(vec![0])
    }

    /// No accents at all
    pub fn none() -> Self {
        Self(Vec::new())
    }

    /// Whether the beat at `beat_in_bar` is accented
    pub fn is_accented(&self, beat_in_bar: u32) -> bool {
        self.0.binary_search(&beat_in_bar).is_ok()
    }

    /// Accented beat indices, ascending
    pub fn beats(&self) -> &[u32] {
        &self.0
    }
}

impl Default for AccentPattern {
    fn default() -> Self {
        Self::downbeat()
    }
}

/// Per-channel enable flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelFlags {
    pub audio: bool,
    pub visual: bool,
    pub haptic: bool,
}

impl ChannelFlags {
    /// Whether channels of the given kind may render
    pub fn is_enabled(&self, kind: SourceKind) -> bool {
        match kind {
            SourceKind::Audio => self.audio,
            SourceKind::Visual => self.visual,
            SourceKind::Haptic => self.haptic,
        }
    }

    /// Copy with one kind switched on or off
    pub fn with(mut self, kind: SourceKind, enabled: bool) -> Self {
        match kind {
            SourceKind::Audio => self.audio = enabled,
            SourceKind::Visual => self.visual = enabled,
            SourceKind::Haptic => self.haptic = enabled,
        }
        self
    }
}

impl Default for ChannelFlags {
    fn default() -> Self {
        Self {
            audio: true,
            visual: true,
            haptic: false,
        }
    }
}

/// Metronome configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeConfig {
    /// Beats per minute (fractional tempos allowed)
    pub tempo: f64,
    /// Time signature
    pub time_signature: TimeSignature,
    /// Accented beats within a bar
    pub accent_pattern: AccentPattern,
    /// Ticks per beat (1 = main beats only)
    pub subdivisions: u32,
    /// Which output kinds are active
    pub channels: ChannelFlags,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            tempo: 120.0,
            time_signature: TimeSignature::default(),
            accent_pattern: AccentPattern::default(),
            subdivisions: 1,
            channels: ChannelFlags::default(),
        }
    }
}

impl MetronomeConfig {
    /// Validate every field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tempo.is_finite() || !(MIN_TEMPO..=MAX_TEMPO).contains(&self.tempo) {
            return Err(ConfigError::TempoOutOfRange(self.tempo));
        }

        self.time_signature.validate()?;

        let beats_per_bar = self.time_signature.beats_per_bar;
        if let Some(&index) = self
            .accent_pattern
            .beats()
            .iter()
            .find(|&&beat| beat >= beats_per_bar)
        {
            return Err(ConfigError::AccentOutOfBar {
                index,
                beats_per_bar,
            });
        }

        if !(1..=MAX_SUBDIVISIONS).contains(&self.subdivisions) {
            return Err(ConfigError::InvalidSubdivisions(self.subdivisions));
        }

        Ok(())
    }

    /// Replacement config with a new (clamped) tempo
    pub fn with_tempo(&self, bpm: f64) -> Self {
        Self {
            tempo: clamp_tempo(bpm),
            ..self.clone()
        }
    }

    /// Replacement config with a new time signature
    ///
    /// Accents that no longer fit in the bar are dropped.
    pub fn with_time_signature(&self, time_signature: TimeSignature) -> Self {
        let accents = self
            .accent_pattern
            .beats()
            .iter()
            .copied()
            .filter(|&beat| beat < time_signature.beats_per_bar)
            .collect();
        Self {
            time_signature,
            accent_pattern: AccentPattern::new(accents),
            ..self.clone()
        }
    }

    /// Replacement config with new channel flags
    pub fn with_channels(&self, channels: ChannelFlags) -> Self {
        Self {
            channels,
            ..self.clone()
        }
    }

    /// Duration of one beat: `60 / BPM` seconds
    pub fn beat_interval(&self) -> Duration {
        Duration::from_secs_f64(60.0 / clamp_tempo(self.tempo))
    }

    /// Duration between consecutive ticks, subdivisions included
    pub fn tick_interval(&self) -> Duration {
        self.beat_interval() / self.subdivisions.max(1)
    }

    /// Whether the given beat is accented
    pub fn is_accent(&self, beat_index: u32) -> bool {
        let beats_per_bar = self.time_signature.beats_per_bar.max(1);
        self.accent_pattern.is_accented(beat_index % beats_per_bar)
    }
}
