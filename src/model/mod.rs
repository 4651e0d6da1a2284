//! Metronome data model
//!
//! Configuration snapshots and the tick events derived from them.

mod config;
mod error;
mod tick;

pub use config::{
    clamp_tempo, AccentPattern, ChannelFlags, MetronomeConfig, TimeSignature, MAX_SUBDIVISIONS,
    MAX_TEMPO, MIN_TEMPO,
};
pub use error::ConfigError;
pub use tick::{BeatPosition, TickEvent};
