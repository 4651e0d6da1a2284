//! Lookahead transport
//!
//! Drives the beat clock and pushes tick events into the output registry
//! ahead of their scheduled time.

mod clock;
mod error;
mod scheduler;

pub use clock::BeatClock;
pub use error::TransportError;
pub use scheduler::{PlaybackSession, Transport, TransportSettings, TransportState};
