//! Output sources
//!
//! An [`OutputSource`] is one registered channel: a variant from the closed
//! set of kinds, the device it renders through, and its lifecycle state.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::channel::{Channel, Rgb, DEFAULT_ACCENT_COLOR, DEFAULT_COLOR};
use super::device::OutputDevice;
use super::error::{DeviceError, Operation, OutputError};
use super::handlers::{HandlerSet, Subscription};
use crate::model::{ChannelFlags, MetronomeConfig, TickEvent};

/// Output modality of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Audio,
    Visual,
    Haptic,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Audio, SourceKind::Visual, SourceKind::Haptic];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Audio => "audio",
            SourceKind::Visual => "visual",
            SourceKind::Haptic => "haptic",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = OutputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "audio" => Ok(SourceKind::Audio),
            "visual" => Ok(SourceKind::Visual),
            "haptic" => Ok(SourceKind::Haptic),
            _ => Err(OutputError::UnsupportedSourceType(s.to_string())),
        }
    }
}

/// Source-specific settings
///
/// Each kind reads the fields it needs: audio uses `volume`, visual the two
/// colors, haptic `intensity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Click volume (0.0 - 1.0)
    pub volume: f32,
    /// Flash color for regular beats
    pub color: Rgb,
    /// Flash color for accented beats
    pub accent_color: Rgb,
    /// Vibration strength (0.0 - 1.0)
    pub intensity: f32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            volume: 0.8,
            color: DEFAULT_COLOR,
            accent_color: DEFAULT_ACCENT_COLOR,
            intensity: 0.7,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Registration request and materialized config of a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSourceConfig {
    /// Unique key within the registry
    pub id: String,
    /// Kind tag (`audio`, `visual`, `haptic`)
    #[serde(rename = "type")]
    pub source_type: String,
    /// Per-source enable flag
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub settings: SourceSettings,
}

impl OutputSourceConfig {
    /// Enabled source of `kind` with default settings
    pub fn new(id: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            id: id.into(),
            source_type: kind.as_str().to_string(),
            enabled: true,
            settings: SourceSettings::default(),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_settings(mut self, settings: SourceSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Lifecycle state of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Constructed, device not yet acquired
    Created,
    /// Device acquired, processing ticks
    Ready,
    /// Device could not be acquired
    Failed,
    /// Resources released
    Disposed,
}

/// Notification sent to state-change handlers
#[derive(Debug, Clone, PartialEq)]
pub struct SourceStateChange {
    pub source_id: String,
    pub state: SourceState,
    pub enabled: bool,
}

/// Render counters of a source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Ticks rendered
    pub rendered: u64,
    /// Operations degraded gracefully (effect skipped, error reported)
    pub degraded: u64,
    /// Operations that failed hard
    pub failed: u64,
}

/// A registered output channel
pub struct OutputSource {
    id: String,
    channel: Channel,
    device: Box<dyn OutputDevice>,
    config: RwLock<OutputSourceConfig>,
    state: RwLock<SourceState>,
    enabled: AtomicBool,
    channel_enabled: AtomicBool,
    rendered: AtomicU64,
    degraded: AtomicU64,
    failed: AtomicU64,
    error_handlers: HandlerSet<OutputError>,
    state_handlers: HandlerSet<SourceStateChange>,
}

impl OutputSource {
    pub(crate) fn new(
        config: OutputSourceConfig,
        kind: SourceKind,
        device: Box<dyn OutputDevice>,
        metronome: &MetronomeConfig,
    ) -> Self {
        Self {
            id: config.id.clone(),
            channel: Channel::new(kind, metronome),
            device,
            enabled: AtomicBool::new(config.enabled),
            channel_enabled: AtomicBool::new(metronome.channels.is_enabled(kind)),
            config: RwLock::new(config),
            state: RwLock::new(SourceState::Created),
            rendered: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            error_handlers: HandlerSet::new(),
            state_handlers: HandlerSet::new(),
        }
    }

    /// Source id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Source kind
    pub fn kind(&self) -> SourceKind {
        self.channel.kind()
    }

    /// Name of the device behind this source
    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SourceState {
        *self.state.read()
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == SourceState::Ready
    }

    /// Whether fan-out should reach this source
    ///
    /// Both the source's own flag and its kind's channel flag must be set.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst) && self.channel_enabled.load(Ordering::SeqCst)
    }

    /// Acquire the underlying device
    pub async fn initialize(&self) -> Result<(), OutputError> {
        match self.device.open() {
            Ok(()) => {
                info!("Source {} ({}) initialized", self.id, self.kind());
                self.set_state(SourceState::Ready);
                Ok(())
            }
            Err(e) => {
                warn!("Source {} failed to initialize: {}", self.id, e);
                self.set_state(SourceState::Failed);
                Err(OutputError::Initialization {
                    source_id: self.id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Render a tick
    ///
    /// Flashes and pulses wait until the tick's scheduled time; clicks are
    /// handed to the device immediately with their start time. A skipped
    /// effect is reported to this source's error handlers and returns `Ok`.
    pub async fn process_tick(&self, event: &TickEvent) -> Result<(), OutputError> {
        self.ensure_ready(Operation::ProcessTick)?;

        if self.channel.renders_on_time() {
            tokio::time::sleep_until(event.scheduled_time).await;
            if !self.is_enabled() {
                return Ok(());
            }
        }

        let effect = {
            let config = self.config.read();
            self.channel.effect_for(event, &config.settings)
        };

        let result = self.device.render(&effect);
        if result.is_ok() {
            self.rendered.fetch_add(1, Ordering::Relaxed);
        }
        self.settle(Operation::ProcessTick, result)
    }

    /// Lead-time hook for a tick due at `at`
    pub async fn prepare_next_tick(&self, at: Instant) -> Result<(), OutputError> {
        self.ensure_ready(Operation::PrepareNextTick)?;
        let result = self.device.prepare(at);
        self.settle(Operation::PrepareNextTick, result)
    }

    /// Apply tempo and time-signature derived settings
    pub async fn update_config(&self, config: &MetronomeConfig) -> Result<(), OutputError> {
        if self.state() == SourceState::Disposed {
            return Err(OutputError::processing(
                &self.id,
                Operation::UpdateConfig,
                "source disposed",
            ));
        }
        self.channel.apply_config(config);
        debug!("Source {} applied tempo {} BPM", self.id, config.tempo);
        Ok(())
    }

    /// Snapshot of the materialized config
    pub fn config(&self) -> OutputSourceConfig {
        let mut config = self.config.read().clone();
        config.enabled = self.enabled.load(Ordering::SeqCst);
        config
    }

    /// Replace the source-specific settings
    pub fn set_settings(&self, settings: SourceSettings) {
        self.config.write().settings = settings;
    }

    /// Toggle the per-source enable flag
    ///
    /// A disabled source stays initialized.
    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        self.config.write().enabled = enabled;
        if previous != enabled {
            debug!("Source {} {}", self.id, if enabled { "enabled" } else { "disabled" });
            self.notify_state(self.state());
        }
    }

    pub(crate) fn apply_channel_flags(&self, flags: &ChannelFlags) {
        let enabled = flags.is_enabled(self.kind());
        let previous = self.channel_enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            self.notify_state(self.state());
        }
    }

    /// Counters since creation or the last reset
    pub fn stats(&self) -> SourceStats {
        SourceStats {
            rendered: self.rendered.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Return to the created state so the source can be initialized again
    pub fn reset(&self) {
        if self.state() == SourceState::Ready {
            self.device.close();
        }
        self.rendered.store(0, Ordering::Relaxed);
        self.degraded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.set_state(SourceState::Created);
    }

    /// Release device resources
    ///
    /// Safe before `initialize` and when called more than once.
    pub async fn dispose(&self) {
        if self.state() == SourceState::Disposed {
            return;
        }
        self.device.close();
        self.set_state(SourceState::Disposed);
        self.error_handlers.clear();
        self.state_handlers.clear();
        debug!("Source {} disposed", self.id);
    }

    /// Subscribe to errors this source recovered from
    pub fn on_error<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&OutputError) + Send + Sync + 'static,
    {
        self.error_handlers.subscribe(handler)
    }

    /// Subscribe to lifecycle and enable-flag changes
    pub fn on_state_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SourceStateChange) + Send + Sync + 'static,
    {
        self.state_handlers.subscribe(handler)
    }

    fn ensure_ready(&self, operation: Operation) -> Result<(), OutputError> {
        match self.state() {
            SourceState::Ready => Ok(()),
            state => Err(OutputError::processing(
                &self.id,
                operation,
                format!("source is {state:?}"),
            )),
        }
    }

    fn settle(
        &self,
        operation: Operation,
        result: Result<(), DeviceError>,
    ) -> Result<(), OutputError> {
        match result {
            Ok(()) => Ok(()),
            Err(DeviceError::Dropped(reason)) => {
                self.degraded.fetch_add(1, Ordering::Relaxed);
                let error = OutputError::processing(&self.id, operation, reason);
                debug!("{}", error);
                self.error_handlers.emit(&error);
                Ok(())
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(OutputError::processing(&self.id, operation, e.to_string()))
            }
        }
    }

    fn set_state(&self, state: SourceState) {
        *self.state.write() = state;
        self.notify_state(state);
    }

    fn notify_state(&self, state: SourceState) {
        self.state_handlers.emit(&SourceStateChange {
            source_id: self.id.clone(),
            state,
            enabled: self.is_enabled(),
        });
    }
}

impl fmt::Debug for OutputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSource")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("state", &self.state())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::device::{Effect, TracingDevice};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct FlakyDevice {
        fail_with: Option<DeviceError>,
        open_fails: bool,
    }

    impl OutputDevice for FlakyDevice {
        fn name(&self) -> &str {
            "flaky"
        }

        fn open(&self) -> Result<(), DeviceError> {
            if self.open_fails {
                Err(DeviceError::Unavailable("no context".into()))
            } else {
                Ok(())
            }
        }

        fn render(&self, _effect: &Effect) -> Result<(), DeviceError> {
            match &self.fail_with {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }

        fn close(&self) {}
    }

    fn source(kind: SourceKind, device: Box<dyn OutputDevice>) -> OutputSource {
        OutputSource::new(
            OutputSourceConfig::new("test", kind),
            kind,
            device,
            &MetronomeConfig::default().with_channels(ChannelFlags {
                audio: true,
                visual: true,
                haptic: true,
            }),
        )
    }

    fn tick() -> TickEvent {
        TickEvent::new(
            &MetronomeConfig::default(),
            Default::default(),
            Instant::now(),
            0,
        )
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("Audio".parse::<SourceKind>().unwrap(), SourceKind::Audio);
        assert_eq!(
            "smell".parse::<SourceKind>(),
            Err(OutputError::UnsupportedSourceType("smell".into()))
        );
    }

    #[test]
    fn test_config_json() {
        let config: OutputSourceConfig =
            serde_json::from_str(r##"{"id": "flash", "type": "visual", "settings": {"color": "#00ff00"}}"##)
                .unwrap();
        assert_eq!(config.source_type, "visual");
        assert!(config.enabled);
        assert_eq!(config.settings.color, Rgb { r: 0, g: 255, b: 0 });
        assert_eq!(config.settings.volume, 0.8);
    }

    #[tokio::test]
    async fn test_lifecycle_states() {
        let source = source(SourceKind::Audio, Box::new(TracingDevice::new("t")));
        assert_eq!(source.state(), SourceState::Created);

        source.initialize().await.unwrap();
        assert!(source.is_initialized());

        source.reset();
        assert_eq!(source.state(), SourceState::Created);

        source.dispose().await;
        source.dispose().await;
        assert_eq!(source.state(), SourceState::Disposed);
    }

    #[tokio::test]
    async fn test_tick_before_initialize_fails() {
        let source = source(SourceKind::Audio, Box::new(TracingDevice::new("t")));
        let result = source.process_tick(&tick()).await;
        assert!(matches!(
            result,
            Err(OutputError::Processing {
                operation: Operation::ProcessTick,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_initialize_failure() {
        let source = source(
            SourceKind::Haptic,
            Box::new(FlakyDevice {
                fail_with: None,
                open_fails: true,
            }),
        );
        let result = source.initialize().await;
        assert!(matches!(result, Err(OutputError::Initialization { .. })));
        assert_eq!(source.state(), SourceState::Failed);
    }

    #[tokio::test]
    async fn test_dropped_effect_reports_and_continues() {
        let source = source(
            SourceKind::Audio,
            Box::new(FlakyDevice {
                fail_with: Some(DeviceError::Dropped("queue full".into())),
                open_fails: false,
            }),
        );
        source.initialize().await.unwrap();

        let reports = Arc::new(AtomicUsize::new(0));
        let reports_clone = reports.clone();
        source.on_error(move |_| {
            reports_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(source.process_tick(&tick()).await.is_ok());
        assert!(source.process_tick(&tick()).await.is_ok());
        assert_eq!(reports.load(Ordering::SeqCst), 2);
        assert_eq!(source.stats().degraded, 2);
        assert_eq!(source.stats().rendered, 0);
    }

    #[tokio::test]
    async fn test_lost_device_fails_hard() {
        let source = source(
            SourceKind::Audio,
            Box::new(FlakyDevice {
                fail_with: Some(DeviceError::Lost("unplugged".into())),
                open_fails: false,
            }),
        );
        source.initialize().await.unwrap();

        let result = source.process_tick(&tick()).await;
        assert_eq!(result.unwrap_err().source_id(), Some("test"));
        assert_eq!(source.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_enable_flags_and_state_notifications() {
        let source = source(SourceKind::Visual, Box::new(TracingDevice::new("t")));
        let changes = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let changes_clone = changes.clone();
        source.on_state_change(move |change| changes_clone.lock().push(change.clone()));

        source.initialize().await.unwrap();
        source.set_enabled(false);
        assert!(!source.is_enabled());
        assert!(source.is_initialized());
        assert!(!source.config().enabled);

        source.set_enabled(true);
        source.apply_channel_flags(&ChannelFlags {
            audio: true,
            visual: false,
            haptic: false,
        });
        assert!(!source.is_enabled());

        let changes = changes.lock();
        assert_eq!(changes.len(), 4);
        assert_eq!(changes[0].state, SourceState::Ready);
        assert!(!changes[1].enabled);
        assert!(changes[2].enabled);
        assert!(!changes[3].enabled);
    }
}
