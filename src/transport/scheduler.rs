//! Transport: the timer-driven scheduling loop
//!
//! A single task wakes on a fixed interval, takes the ticks that fall into
//! the lookahead window from the [`BeatClock`] and dispatches each to the
//! registry. Dispatches run concurrently inside the task, so a slow channel
//! delays only its own tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::clock::BeatClock;
use super::error::TransportError;
use crate::model::{BeatPosition, MetronomeConfig, TickEvent};
use crate::output::{HandlerSet, OutputSourceRegistry, Subscription};

/// Scheduling parameters
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// How far ahead of their time ticks are dispatched
    pub lookahead: Duration,
    /// Timer period of the scheduling loop
    pub wake_interval: Duration,
    /// Delay between `start` and the first tick
    pub start_delay: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            lookahead: Duration::from_millis(100),
            wake_interval: Duration::from_millis(25),
            start_delay: Duration::from_millis(50),
        }
    }
}

/// Transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Scheduling,
}

/// Handle describing a started playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackSession {
    pub id: Uuid,
    /// Scheduled time of the session's first tick
    pub first_tick_at: Instant,
}

struct Running {
    session: PlaybackSession,
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<BeatPosition>,
}

/// Lookahead transport
pub struct Transport {
    registry: Arc<OutputSourceRegistry>,
    settings: TransportSettings,
    config_tx: watch::Sender<Arc<MetronomeConfig>>,
    running: Mutex<Option<Running>>,
    scheduling: AtomicBool,
    position: parking_lot::Mutex<BeatPosition>,
    tempo_handlers: HandlerSet<f64>,
}

impl Transport {
    /// Create a stopped transport feeding `registry`
    pub fn new(
        registry: Arc<OutputSourceRegistry>,
        config: MetronomeConfig,
        settings: TransportSettings,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        let (config_tx, _) = watch::channel(Arc::new(config));

        Ok(Self {
            registry,
            settings,
            config_tx,
            running: Mutex::new(None),
            scheduling: AtomicBool::new(false),
            position: parking_lot::Mutex::new(BeatPosition::default()),
            tempo_handlers: HandlerSet::new(),
        })
    }

    /// Registry the transport dispatches to
    pub fn registry(&self) -> &Arc<OutputSourceRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Current config snapshot
    pub fn config(&self) -> Arc<MetronomeConfig> {
        self.config_tx.borrow().clone()
    }

    /// Duration of one beat at the current tempo
    pub fn beat_interval(&self) -> Duration {
        self.config().beat_interval()
    }

    pub fn state(&self) -> TransportState {
        if self.scheduling.load(Ordering::SeqCst) {
            TransportState::Scheduling
        } else {
            TransportState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == TransportState::Scheduling
    }

    /// Position playback would resume from
    pub fn position(&self) -> BeatPosition {
        *self.position.lock()
    }

    /// Subscribe to tempo changes
    pub fn on_tempo_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&f64) + Send + Sync + 'static,
    {
        self.tempo_handlers.subscribe(handler)
    }

    /// Replace the config
    ///
    /// A running schedule picks up the new interval from the next
    /// unscheduled tick on. Source failures while applying it are reported
    /// to the registry's error handlers and do not fail this call.
    pub async fn update_config(&self, config: MetronomeConfig) -> Result<(), TransportError> {
        config.validate()?;

        let config = Arc::new(config);
        let previous = self.config_tx.send_replace(config.clone());

        if let Err(e) = self.registry.update_config(&config).await {
            debug!("Config update partially failed: {}", e);
        }

        if previous.tempo != config.tempo {
            info!("Tempo changed: {} -> {} BPM", previous.tempo, config.tempo);
            self.tempo_handlers.emit(&config.tempo);
        }
        if previous.time_signature != config.time_signature {
            info!("Time signature changed to {}", config.time_signature);
        }

        Ok(())
    }

    /// Start from the first beat
    pub async fn start(&self) -> Result<PlaybackSession, TransportError> {
        self.start_at(BeatPosition::default()).await
    }

    /// Start from where the last `stop` left off
    pub async fn resume(&self) -> Result<PlaybackSession, TransportError> {
        let position = self.position();
        self.start_at(position).await
    }

    /// Start with the first tick at `position`
    ///
    /// Sources that are not yet initialized are initialized first; any
    /// initialization failure aborts the start.
    pub async fn start_at(&self, position: BeatPosition) -> Result<PlaybackSession, TransportError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(TransportError::AlreadyRunning);
        }

        // Subscribe before awaiting so updates sent meanwhile are not lost
        let mut config_rx = self.config_tx.subscribe();
        let pushed = self.config();
        if let Err(e) = self.registry.update_config(&pushed).await {
            debug!("Config update partially failed: {}", e);
        }
        self.registry.initialize_all().await?;

        let config = config_rx.borrow_and_update().clone();
        if !Arc::ptr_eq(&config, &pushed) {
            debug!("Config changed while starting");
            if let Err(e) = self.registry.update_config(&config).await {
                debug!("Config update partially failed: {}", e);
            }
        }

        let session = PlaybackSession {
            id: Uuid::new_v4(),
            first_tick_at: Instant::now() + self.settings.start_delay,
        };
        let clock = BeatClock::new(config.clone(), session.first_tick_at, position);
        let (stop_tx, stop_rx) = oneshot::channel();

        let handle = tokio::spawn(run_schedule(
            self.registry.clone(),
            clock,
            config_rx,
            stop_rx,
            self.settings.clone(),
            session.id,
        ));

        *running = Some(Running {
            session,
            stop_tx,
            handle,
        });
        self.scheduling.store(true, Ordering::SeqCst);

        info!(
            "Playback {} started at {} BPM, {}",
            session.id, config.tempo, config.time_signature
        );
        Ok(session)
    }

    /// Stop scheduling
    ///
    /// No tick is dispatched after this returns. Dispatches already in
    /// flight are left to finish. Returns the position to resume from.
    pub async fn stop(&self) -> BeatPosition {
        let Some(running) = self.running.lock().await.take() else {
            return self.position();
        };
        self.scheduling.store(false, Ordering::SeqCst);

        let _ = running.stop_tx.send(());
        let position = match running.handle.await {
            Ok(position) => position,
            Err(e) => {
                warn!("Scheduling task ended abnormally: {}", e);
                self.position()
            }
        };

        *self.position.lock() = position;
        info!(
            "Playback {} stopped at bar {} beat {}",
            running.session.id, position.bar, position.beat
        );
        position
    }

    /// Session currently playing, if any
    pub async fn session(&self) -> Option<PlaybackSession> {
        self.running.lock().await.as_ref().map(|running| running.session)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            let _ = running.stop_tx.send(());
        }
    }
}

async fn run_schedule(
    registry: Arc<OutputSourceRegistry>,
    mut clock: BeatClock,
    mut config_rx: watch::Receiver<Arc<MetronomeConfig>>,
    mut stop_rx: oneshot::Receiver<()>,
    settings: TransportSettings,
    session: Uuid,
) -> BeatPosition {
    let mut ticker = interval(settings.wake_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight = FuturesUnordered::new();

    loop {
        tokio::select! {
            biased;

            _ = &mut stop_rx => break,

            changed = config_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let config = config_rx.borrow_and_update().clone();
                clock.apply_config(config);
                debug!(
                    "Playback {} now ticking every {:?}",
                    session,
                    clock.tick_interval()
                );
            }

            _ = ticker.tick() => {
                for event in clock.schedule(Instant::now(), settings.lookahead) {
                    in_flight.push(dispatch(registry.clone(), event));
                }
            }

            Some(()) = in_flight.next(), if !in_flight.is_empty() => {}
        }
    }

    if !in_flight.is_empty() {
        trace!("Leaving {} dispatches to finish", in_flight.len());
        tokio::spawn(async move { while in_flight.next().await.is_some() {} });
    }

    debug!("Playback {} scheduled {} ticks", session, clock.scheduled());
    clock.position()
}

/// Prepare then process one tick
///
/// Failures were already broadcast by the registry; playback carries on.
async fn dispatch(registry: Arc<OutputSourceRegistry>, event: TickEvent) {
    if let Err(e) = registry.prepare_next_tick(event.scheduled_time).await {
        debug!("Tick {} prepare failed: {}", event.sequence, e);
    }
    if let Err(e) = registry.process_tick(&event).await {
        debug!("Tick {} failed: {}", event.sequence, e);
    }
}
