//! Tick events

use tokio::time::Instant;

use super::config::MetronomeConfig;

/// Position of a tick within the bar structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BeatPosition {
    /// Bars elapsed since playback started
    pub bar: u64,
    /// Beat within the current bar (0-indexed)
    pub beat: u32,
    /// Subdivision within the current beat (0 = the beat itself)
    pub subdivision: u32,
}

impl BeatPosition {
    /// Position of the next tick under `config`
    pub fn advance(self, config: &MetronomeConfig) -> Self {
        let subdivisions = config.subdivisions.max(1);
        let beats_per_bar = config.time_signature.beats_per_bar.max(1);

        let mut next = self;
        next.subdivision += 1;
        if next.subdivision >= subdivisions {
            next.subdivision = 0;
            next.beat += 1;
            if next.beat >= beats_per_bar {
                next.beat = 0;
                next.bar += 1;
            }
        }
        next
    }

    /// Fit this position into a (possibly changed) bar and beat layout
    ///
    /// A position that no longer exists rolls forward to the next beat
    /// boundary that does.
    pub fn conform(self, config: &MetronomeConfig) -> Self {
        let subdivisions = config.subdivisions.max(1);
        let beats_per_bar = config.time_signature.beats_per_bar.max(1);

        let mut position = self;
        if position.subdivision >= subdivisions {
            position.subdivision = 0;
            position.beat += 1;
        }
        if position.beat >= beats_per_bar {
            position.beat = 0;
            position.bar += 1;
        }
        position
    }

    /// Whether this is a main beat rather than a subdivision
    pub fn is_main_beat(&self) -> bool {
        self.subdivision == 0
    }
}

/// One scheduled tick
///
/// Built once by the scheduler and never mutated. `scheduled_time` is the
/// moment the tick's effect must occur, independent of when the event is
/// delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct TickEvent {
    /// Beat index within the bar
    pub beat_index: u32,
    /// Bars elapsed since playback started
    pub bar: u64,
    /// Subdivision index within the beat (0 for main beats)
    pub subdivision: u32,
    /// Accented main beat
    pub is_accent: bool,
    /// Subdivision tick rather than a main beat
    pub is_subdivision: bool,
    /// Absolute time at which the tick must be heard/seen/felt
    pub scheduled_time: Instant,
    /// Tick counter within the playback session
    pub sequence: u64,
}

impl TickEvent {
    /// Build the event for `position`, deriving accent from `config`
    pub fn new(
        config: &MetronomeConfig,
        position: BeatPosition,
        scheduled_time: Instant,
        sequence: u64,
    ) -> Self {
        let is_subdivision = !position.is_main_beat();
        Self {
            beat_index: position.beat,
            bar: position.bar,
            subdivision: position.subdivision,
            is_accent: !is_subdivision && config.is_accent(position.beat),
            is_subdivision,
            scheduled_time,
            sequence,
        }
    }

    /// Bar/beat/subdivision of this event
    pub fn position(&self) -> BeatPosition {
        BeatPosition {
            bar: self.bar,
            beat: self.beat_index,
            subdivision: self.subdivision,
        }
    }
}
