//! Output source registry
//!
//! Owns every registered source and fans ticks and config updates out to
//! the enabled ones. All enabled sources are dispatched before any is
//! awaited; a failing source never keeps the others from running.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::device::DeviceSet;
use super::error::{Operation, OutputError};
use super::handlers::{HandlerSet, Subscription};
use super::source::{OutputSource, OutputSourceConfig, SourceKind};
use crate::model::{MetronomeConfig, TickEvent};

/// Registry of output sources
///
/// One registry serves one playback session. Fan-out operations hold the
/// collection for reading while their sources run, so `dispose` and `reset`
/// only proceed once in-flight fan-out has settled.
pub struct OutputSourceRegistry {
    devices: DeviceSet,
    defaults: Vec<OutputSourceConfig>,
    sources: RwLock<BTreeMap<String, Arc<OutputSource>>>,
    metronome: parking_lot::RwLock<Arc<MetronomeConfig>>,
    error_handlers: HandlerSet<OutputError>,
}

impl OutputSourceRegistry {
    /// Empty registry building devices from `devices`
    pub fn new(devices: DeviceSet) -> Self {
        Self::with_defaults(devices, Vec::new())
    }

    /// Registry whose `reset` re-creates the given mandatory sources
    pub fn with_defaults(devices: DeviceSet, defaults: Vec<OutputSourceConfig>) -> Self {
        Self {
            devices,
            defaults,
            sources: RwLock::new(BTreeMap::new()),
            metronome: parking_lot::RwLock::new(Arc::new(MetronomeConfig::default())),
            error_handlers: HandlerSet::new(),
        }
    }

    /// Construct and register the source described by `config`
    ///
    /// An existing source with the same id is replaced and then disposed.
    /// The new source receives ticks once it is initialized, either by
    /// [`initialize_all`](Self::initialize_all) or directly.
    pub async fn create_source(
        &self,
        config: OutputSourceConfig,
    ) -> Result<Arc<OutputSource>, OutputError> {
        let mut sources = self.sources.write().await;
        let source = self.build_source(config)?;

        let displaced = sources.insert(source.id().to_string(), source.clone());
        info!("Registered {} source {}", source.kind(), source.id());

        if let Some(displaced) = displaced {
            debug!("Disposing replaced source {}", displaced.id());
            displaced.dispose().await;
        }

        Ok(source)
    }

    fn build_source(&self, config: OutputSourceConfig) -> Result<Arc<OutputSource>, OutputError> {
        let kind: SourceKind = config.source_type.parse()?;
        let device = self.devices.build(kind, &config);
        let metronome = self.metronome.read().clone();
        let source = Arc::new(OutputSource::new(config, kind, device, &metronome));

        let handlers = self.error_handlers.clone();
        source.on_error(move |error| handlers.emit(error));

        Ok(source)
    }

    /// Look up a source by id
    pub async fn get_source(&self, id: &str) -> Option<Arc<OutputSource>> {
        self.sources.read().await.get(id).cloned()
    }

    /// All registered sources, ordered by id
    pub async fn sources(&self) -> Vec<Arc<OutputSource>> {
        self.sources.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sources.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sources.read().await.is_empty()
    }

    /// Initialize every source that is not yet initialized
    ///
    /// Sources switched off with [`OutputSource::set_enabled`] are skipped;
    /// sources muted only by their kind's channel flag are included.
    pub async fn initialize_all(&self) -> Result<(), OutputError> {
        let sources = self.sources.read().await;
        let pending: Vec<&Arc<OutputSource>> = sources
            .values()
            .filter(|source| !source.is_initialized() && source.config().enabled)
            .collect();

        let results = join_all(pending.iter().map(|source| source.initialize())).await;
        self.settle(Operation::Initialize, results)
    }

    /// Fan a tick out to every enabled, initialized source
    pub async fn process_tick(&self, event: &TickEvent) -> Result<(), OutputError> {
        let sources = self.sources.read().await;
        let active = playing(&sources);
        trace!(
            "Dispatching tick {} (bar {} beat {}) to {} sources",
            event.sequence,
            event.bar,
            event.beat_index,
            active.len()
        );

        let results = join_all(active.iter().map(|source| source.process_tick(event))).await;
        self.settle(Operation::ProcessTick, results)
    }

    /// Fan the lead-time hook out to every enabled, initialized source
    pub async fn prepare_next_tick(&self, at: Instant) -> Result<(), OutputError> {
        let sources = self.sources.read().await;
        let active = playing(&sources);

        let results = join_all(active.iter().map(|source| source.prepare_next_tick(at))).await;
        self.settle(Operation::PrepareNextTick, results)
    }

    /// Distribute a new metronome config
    ///
    /// Channel flags gate every source first; the config itself then goes
    /// to the sources that remain enabled.
    pub async fn update_config(&self, config: &MetronomeConfig) -> Result<(), OutputError> {
        let sources = self.sources.read().await;
        *self.metronome.write() = Arc::new(config.clone());

        for source in sources.values() {
            source.apply_channel_flags(&config.channels);
        }

        let active = enabled(&sources);
        let results = join_all(active.iter().map(|source| source.update_config(config))).await;
        self.settle(Operation::UpdateConfig, results)
    }

    /// Subscribe to failures of any source
    pub fn on_error<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&OutputError) + Send + Sync + 'static,
    {
        self.error_handlers.subscribe(handler)
    }

    /// Dispose every source, then clear the collection and error handlers
    ///
    /// The registry stays usable afterwards.
    pub async fn dispose(&self) {
        let mut sources = self.sources.write().await;
        join_all(sources.values().map(|source| source.dispose())).await;
        let count = sources.len();
        sources.clear();
        self.error_handlers.clear();

        if count > 0 {
            info!("Registry disposed {} sources", count);
        }
    }

    /// Drop every source without disposing it and re-create the defaults
    pub async fn reset(&self) -> Result<(), OutputError> {
        let mut sources = self.sources.write().await;
        sources.clear();

        for config in &self.defaults {
            let source = self.build_source(config.clone())?;
            sources.insert(source.id().to_string(), source);
        }

        debug!("Registry reset with {} default sources", sources.len());
        Ok(())
    }

    fn settle(
        &self,
        operation: Operation,
        results: Vec<Result<(), OutputError>>,
    ) -> Result<(), OutputError> {
        let mut failures: Vec<OutputError> =
            results.into_iter().filter_map(Result::err).collect();

        for failure in &failures {
            self.error_handlers.emit(failure);
        }

        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0)),
            count => {
                warn!("{} sources failed to {}", count, operation);
                Err(OutputError::Dispatch {
                    operation,
                    failures,
                })
            }
        }
    }
}

impl Default for OutputSourceRegistry {
    fn default() -> Self {
        Self::new(DeviceSet::default())
    }
}

fn enabled(sources: &BTreeMap<String, Arc<OutputSource>>) -> Vec<&Arc<OutputSource>> {
    sources
        .values()
        .filter(|source| source.is_enabled())
        .collect()
}

/// Enabled sources a tick can be rendered on
///
/// Sources that were never initialized are left out until they are.
fn playing(sources: &BTreeMap<String, Arc<OutputSource>>) -> Vec<&Arc<OutputSource>> {
    enabled(sources)
        .into_iter()
        .filter(|source| {
            let ready = source.is_initialized();
            if !ready {
                trace!("Skipping source {} ({:?})", source.id(), source.state());
            }
            ready
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BeatPosition, ChannelFlags};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tick() -> TickEvent {
        TickEvent::new(
            &MetronomeConfig::default(),
            BeatPosition::default(),
            Instant::now(),
            0,
        )
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = OutputSourceRegistry::default();
        let source = registry
            .create_source(OutputSourceConfig::new("click", SourceKind::Audio))
            .await
            .unwrap();

        let found = registry.get_source("click").await.unwrap();
        assert!(Arc::ptr_eq(&source, &found));
        assert!(registry.get_source("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_type_rejected() {
        let registry = OutputSourceRegistry::default();
        let config = OutputSourceConfig {
            source_type: "smell".into(),
            ..OutputSourceConfig::new("nose", SourceKind::Audio)
        };

        let result = registry.create_source(config).await;
        assert_eq!(
            result.unwrap_err(),
            OutputError::UnsupportedSourceType("smell".into())
        );
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_replacing_id_disposes_previous() {
        let registry = OutputSourceRegistry::default();
        let first = registry
            .create_source(OutputSourceConfig::new("main", SourceKind::Audio))
            .await
            .unwrap();
        let second = registry
            .create_source(OutputSourceConfig::new("main", SourceKind::Visual))
            .await
            .unwrap();

        assert_eq!(first.state(), crate::output::SourceState::Disposed);
        let found = registry.get_source("main").await.unwrap();
        assert!(Arc::ptr_eq(&second, &found));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_channel_flags_gate_sources() {
        let registry = OutputSourceRegistry::default();
        let haptic = registry
            .create_source(OutputSourceConfig::new("buzz", SourceKind::Haptic))
            .await
            .unwrap();
        assert!(!haptic.is_enabled());

        let config = MetronomeConfig::default().with_channels(ChannelFlags {
            audio: true,
            visual: true,
            haptic: true,
        });
        registry.update_config(&config).await.unwrap();
        assert!(haptic.is_enabled());
    }

    #[tokio::test]
    async fn test_reset_restores_defaults() {
        let registry = OutputSourceRegistry::with_defaults(
            DeviceSet::default(),
            vec![OutputSourceConfig::new("click", SourceKind::Audio)],
        );
        registry
            .create_source(OutputSourceConfig::new("flash", SourceKind::Visual))
            .await
            .unwrap();

        registry.reset().await.unwrap();
        assert_eq!(registry.len().await, 1);
        assert!(registry.get_source("click").await.is_some());
        assert!(registry.get_source("flash").await.is_none());
    }

    #[tokio::test]
    async fn test_uninitialized_source_is_skipped() {
        let registry = OutputSourceRegistry::default();
        let source = registry
            .create_source(OutputSourceConfig::new("click", SourceKind::Audio))
            .await
            .unwrap();
        let errors = Arc::new(AtomicUsize::new(0));
        let errors_clone = errors.clone();
        registry.on_error(move |_| {
            errors_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.process_tick(&tick()).await.is_ok());
        assert_eq!(source.stats().rendered, 0);
        assert_eq!(errors.load(Ordering::SeqCst), 0);

        registry.initialize_all().await.unwrap();
        assert!(registry.process_tick(&tick()).await.is_ok());
        assert_eq!(source.stats().rendered, 1);
    }

    #[tokio::test]
    async fn test_dispose_twice() {
        let registry = OutputSourceRegistry::default();
        registry
            .create_source(OutputSourceConfig::new("click", SourceKind::Audio))
            .await
            .unwrap();

        registry.dispose().await;
        registry.dispose().await;
        assert!(registry.is_empty().await);
    }
}
