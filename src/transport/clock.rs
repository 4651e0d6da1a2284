//! Beat clock
//!
//! Pure tick arithmetic: given the current time and a lookahead window it
//! yields the ticks due in that window, each carrying its own absolute
//! scheduled time. Timer jitter never shifts a tick; only the config does.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::model::{BeatPosition, MetronomeConfig, TickEvent};

/// Tick schedule for one playback session
#[derive(Debug, Clone)]
pub struct BeatClock {
    config: Arc<MetronomeConfig>,
    tick_interval: Duration,
    next_time: Instant,
    next_position: BeatPosition,
    last_scheduled: Option<Instant>,
    sequence: u64,
}

impl BeatClock {
    /// Clock whose first tick is `position`, due at `start_at`
    pub fn new(config: Arc<MetronomeConfig>, start_at: Instant, position: BeatPosition) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            next_position: position.conform(&config),
            config,
            next_time: start_at,
            last_scheduled: None,
            sequence: 0,
        }
    }

    /// Config the clock currently follows
    pub fn config(&self) -> &Arc<MetronomeConfig> {
        &self.config
    }

    /// Time between consecutive ticks
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Due time of the next unscheduled tick
    pub fn next_time(&self) -> Instant {
        self.next_time
    }

    /// Position of the next unscheduled tick (the resume point)
    pub fn position(&self) -> BeatPosition {
        self.next_position
    }

    /// Ticks scheduled so far
    pub fn scheduled(&self) -> u64 {
        self.sequence
    }

    /// Switch to a new config
    ///
    /// Ticks already scheduled keep their times. The next tick follows the
    /// last scheduled one by the new interval.
    pub fn apply_config(&mut self, config: Arc<MetronomeConfig>) {
        self.tick_interval = config.tick_interval();
        self.next_position = self.next_position.conform(&config);
        if let Some(last) = self.last_scheduled {
            self.next_time = last + self.tick_interval;
        }
        self.config = config;
    }

    /// Take every tick due before `now + lookahead`
    ///
    /// If the clock has fallen more than one lookahead window behind `now`
    /// (the host stalled), the missed ticks are skipped rather than played
    /// in a burst.
    pub fn schedule(&mut self, now: Instant, lookahead: Duration) -> Vec<TickEvent> {
        if self.next_time + lookahead < now {
            self.skip_to(now);
        }

        let horizon = now + lookahead;
        let mut events = Vec::new();

        while self.next_time < horizon {
            events.push(TickEvent::new(
                &self.config,
                self.next_position,
                self.next_time,
                self.sequence,
            ));
            self.last_scheduled = Some(self.next_time);
            self.sequence += 1;
            self.next_position = self.next_position.advance(&self.config);
            self.next_time += self.tick_interval;
        }

        events
    }

    fn skip_to(&mut self, now: Instant) {
        let behind = now - self.next_time;
        let missed = (behind.as_nanos() / self.tick_interval.as_nanos().max(1)) as u64;
        warn!(
            "Scheduler fell {:?} behind, skipping {} ticks",
            behind, missed
        );

        for _ in 0..missed {
            self.next_position = self.next_position.advance(&self.config);
            self.next_time += self.tick_interval;
        }
    }
}
