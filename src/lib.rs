//! tempokit - Tick-synchronized multi-channel metronome output
//!
//! This library schedules metronome ticks ahead of playback time and fans
//! each tick out to independent output channels (audio click, visual flash,
//! haptic pulse) without one channel's failure silencing the others.

pub mod audio;
pub mod model;
pub mod output;
pub mod tap;
pub mod transport;

pub use model::{MetronomeConfig, TickEvent, TimeSignature};
pub use output::{OutputSource, OutputSourceConfig, OutputSourceRegistry, SourceKind};
pub use tap::TapTempo;
pub use transport::{Transport, TransportSettings};
