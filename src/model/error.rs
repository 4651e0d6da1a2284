//! Configuration error types

use thiserror::Error;

/// Errors raised when a metronome configuration is rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Tempo out of range: {0} BPM (expected 20-400)")]
    TempoOutOfRange(f64),

    #[error("Invalid time signature: {0}")]
    InvalidTimeSignature(String),

    #[error("Accent index {index} outside a bar of {beats_per_bar} beats")]
    AccentOutOfBar { index: u32, beats_per_bar: u32 },

    #[error("Invalid subdivision count: {0} (expected 1-8)")]
    InvalidSubdivisions(u32),
}
