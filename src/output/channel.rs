//! Channel variants
//!
//! The closed set of output kinds. Each variant turns a tick into the
//! effect its device renders and derives its timing from the metronome
//! config.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::device::Effect;
use super::source::{SourceKind, SourceSettings};
use crate::model::{MetronomeConfig, TickEvent};

/// Default flash color
pub const DEFAULT_COLOR: Rgb = Rgb {
    r: 0xff,
    g: 0xff,
    b: 0xff,
};

/// Default flash color on accented beats
pub const DEFAULT_ACCENT_COLOR: Rgb = Rgb {
    r: 0xff,
    g: 0x3b,
    b: 0x30,
};

/// Frequency of the accented click (Hz)
const ACCENT_FREQ: f32 = 1000.0;

/// Frequency of other beats click (Hz)
const BEAT_FREQ: f32 = 800.0;

/// Frequency of subdivision clicks (Hz)
const SUBDIVISION_FREQ: f32 = 600.0;

const MAX_CLICK: Duration = Duration::from_millis(50);
const MAX_FLASH: Duration = Duration::from_millis(100);
const MAX_PULSE: Duration = Duration::from_millis(40);

/// 24-bit color, written as `#rrggbb`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl FromStr for Rgb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.strip_prefix('#').unwrap_or(s);
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(format!("Invalid color: {s}"));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|_| format!("Invalid color: {s}"))
        };
        Ok(Rgb {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        })
    }
}

impl TryFrom<String> for Rgb {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rgb> for String {
    fn from(color: Rgb) -> Self {
        color.to_string()
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Effect length for a tick interval: half the interval, capped
fn effect_length(config: &MetronomeConfig, cap: Duration) -> Duration {
    (config.tick_interval() / 2).min(cap)
}

/// Relative weight of a tick: accent, plain beat, subdivision
fn emphasis(event: &TickEvent) -> f32 {
    if event.is_accent {
        1.0
    } else if event.is_subdivision {
        0.5
    } else {
        0.75
    }
}

pub(crate) struct AudioChannel {
    click: RwLock<Duration>,
}

pub(crate) struct VisualChannel {
    flash: RwLock<Duration>,
}

pub(crate) struct HapticChannel {
    pulse: RwLock<Duration>,
}

/// A source's channel variant
pub(crate) enum Channel {
    Audio(AudioChannel),
    Visual(VisualChannel),
    Haptic(HapticChannel),
}

impl Channel {
    pub(crate) fn new(kind: SourceKind, config: &MetronomeConfig) -> Self {
        match kind {
            SourceKind::Audio => Channel::Audio(AudioChannel {
                click: RwLock::new(effect_length(config, MAX_CLICK)),
            }),
            SourceKind::Visual => Channel::Visual(VisualChannel {
                flash: RwLock::new(effect_length(config, MAX_FLASH)),
            }),
            SourceKind::Haptic => Channel::Haptic(HapticChannel {
                pulse: RwLock::new(effect_length(config, MAX_PULSE)),
            }),
        }
    }

    pub(crate) fn kind(&self) -> SourceKind {
        match self {
            Channel::Audio(_) => SourceKind::Audio,
            Channel::Visual(_) => SourceKind::Visual,
            Channel::Haptic(_) => SourceKind::Haptic,
        }
    }

    /// Whether the effect is rendered at the tick's scheduled time
    ///
    /// Audio devices run their own clock and take the start time with the
    /// click; flashes and pulses show the moment they are rendered.
    pub(crate) fn renders_on_time(&self) -> bool {
        !matches!(self, Channel::Audio(_))
    }

    pub(crate) fn apply_config(&self, config: &MetronomeConfig) {
        match self {
            Channel::Audio(audio) => *audio.click.write() = effect_length(config, MAX_CLICK),
            Channel::Visual(visual) => *visual.flash.write() = effect_length(config, MAX_FLASH),
            Channel::Haptic(haptic) => *haptic.pulse.write() = effect_length(config, MAX_PULSE),
        }
    }

    pub(crate) fn effect_for(&self, event: &TickEvent, settings: &SourceSettings) -> Effect {
        match self {
            Channel::Audio(audio) => {
                let frequency = if event.is_accent {
                    ACCENT_FREQ
                } else if event.is_subdivision {
                    SUBDIVISION_FREQ
                } else {
                    BEAT_FREQ
                };
                Effect::Click {
                    frequency,
                    gain: settings.volume.clamp(0.0, 1.0) * emphasis(event),
                    duration: *audio.click.read(),
                    at: event.scheduled_time,
                }
            }
            Channel::Visual(visual) => Effect::Flash {
                color: if event.is_accent {
                    settings.accent_color
                } else {
                    settings.color
                },
                duration: *visual.flash.read(),
                accent: event.is_accent,
            },
            Channel::Haptic(haptic) => Effect::Pulse {
                duration: *haptic.pulse.read(),
                intensity: settings.intensity.clamp(0.0, 1.0) * emphasis(event),
            },
        }
    }
}
