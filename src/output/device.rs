//! Output device boundary
//!
//! Concrete sound, light and vibration hardware sits behind [`OutputDevice`].
//! Sources decide what to render and when; devices only render.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::channel::Rgb;
use super::error::DeviceError;
use super::source::{OutputSourceConfig, SourceKind};

/// A rendered effect
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Audible click starting at `at`
    Click {
        frequency: f32,
        gain: f32,
        duration: Duration,
        at: Instant,
    },
    /// Visual flash, shown when rendered
    Flash {
        color: Rgb,
        duration: Duration,
        accent: bool,
    },
    /// Vibration pulse, felt when rendered
    Pulse { duration: Duration, intensity: f32 },
}

/// Hardware (or stand-in) that renders effects
pub trait OutputDevice: Send + Sync {
    /// Human-readable device name
    fn name(&self) -> &str;

    /// Acquire the device
    fn open(&self) -> Result<(), DeviceError>;

    /// Get ready for an effect due at `at`
    fn prepare(&self, _at: Instant) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Render one effect
    fn render(&self, effect: &Effect) -> Result<(), DeviceError>;

    /// Release the device. Must be safe when `open` never succeeded.
    fn close(&self);
}

/// Device that only logs what it would render
#[derive(Debug, Clone)]
pub struct TracingDevice {
    name: String,
}

impl TracingDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl OutputDevice for TracingDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<(), DeviceError> {
        debug!("{} opened", self.name);
        Ok(())
    }

    fn render(&self, effect: &Effect) -> Result<(), DeviceError> {
        debug!("{} rendered {:?}", self.name, effect);
        Ok(())
    }

    fn close(&self) {
        debug!("{} closed", self.name);
    }
}

/// Visual device printing a beat marker to the terminal
#[derive(Debug, Default)]
pub struct TerminalFlashDevice;

impl OutputDevice for TerminalFlashDevice {
    fn name(&self) -> &str {
        "terminal"
    }

    fn open(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn render(&self, effect: &Effect) -> Result<(), DeviceError> {
        let Effect::Flash { color, accent, .. } = effect else {
            return Err(DeviceError::Dropped(format!(
                "terminal cannot render {effect:?}"
            )));
        };

        let marker = if *accent { "●" } else { "○" };
        let mut stdout = std::io::stdout().lock();
        writeln!(
            stdout,
            "\x1b[38;2;{};{};{}m{}\x1b[0m",
            color.r, color.g, color.b, marker
        )
        .and_then(|_| stdout.flush())
        .map_err(|e| DeviceError::Dropped(e.to_string()))
    }

    fn close(&self) {}
}

/// Builds the device for one source
pub type DeviceFactory =
    Arc<dyn Fn(&OutputSourceConfig) -> Box<dyn OutputDevice> + Send + Sync + 'static>;

/// Device factory for each source kind
///
/// Every source gets its own device instance, so disposing one source never
/// closes hardware another source still uses.
#[derive(Clone)]
pub struct DeviceSet {
    audio: DeviceFactory,
    visual: DeviceFactory,
    haptic: DeviceFactory,
}

fn tracing_factory() -> DeviceFactory {
    Arc::new(|config: &OutputSourceConfig| {
        Box::new(TracingDevice::new(config.id.clone())) as Box<dyn OutputDevice>
    })
}

impl Default for DeviceSet {
    fn default() -> Self {
        Self {
            audio: tracing_factory(),
            visual: tracing_factory(),
            haptic: tracing_factory(),
        }
    }
}

impl DeviceSet {
    /// Headless devices for every kind
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_audio<F>(mut self, factory: F) -> Self
    where
        F: Fn(&OutputSourceConfig) -> Box<dyn OutputDevice> + Send + Sync + 'static,
    {
        self.audio = Arc::new(factory);
        self
    }

    pub fn with_visual<F>(mut self, factory: F) -> Self
    where
        F: Fn(&OutputSourceConfig) -> Box<dyn OutputDevice> + Send + Sync + 'static,
    {
        self.visual = Arc::new(factory);
        self
    }

    pub fn with_haptic<F>(mut self, factory: F) -> Self
    where
        F: Fn(&OutputSourceConfig) -> Box<dyn OutputDevice> + Send + Sync + 'static,
    {
        self.haptic = Arc::new(factory);
        self
    }

    /// Build the device for a source of `kind`
    pub fn build(&self, kind: SourceKind, config: &OutputSourceConfig) -> Box<dyn OutputDevice> {
        match kind {
            SourceKind::Audio => (self.audio)(config),
            SourceKind::Visual => (self.visual)(config),
            SourceKind::Haptic => (self.haptic)(config),
        }
    }
}

impl std::fmt::Debug for DeviceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSet").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_set_is_headless() {
        let devices = DeviceSet::default();
        let config = OutputSourceConfig::new("click", SourceKind::Audio);
        let device = devices.build(SourceKind::Audio, &config);
        assert_eq!(device.name(), "click");
        assert!(device.open().is_ok());
    }

    #[test]
    fn test_override_factory() {
        let devices = DeviceSet::new().with_visual(|_| Box::new(TerminalFlashDevice));
        let config = OutputSourceConfig::new("flash", SourceKind::Visual);
        assert_eq!(devices.build(SourceKind::Visual, &config).name(), "terminal");
    }

    #[test]
    fn test_terminal_rejects_pulse() {
        let result = TerminalFlashDevice.render(&Effect::Pulse {
            duration: Duration::from_millis(10),
            intensity: 1.0,
        });
        assert!(matches!(result, Err(DeviceError::Dropped(_))));
    }
}
