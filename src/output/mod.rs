//! Output channels
//!
//! Registered sources (audio click, visual flash, haptic pulse) and the
//! registry that fans each tick out to them.

mod channel;
mod device;
mod error;
mod handlers;
mod registry;
mod source;

pub use channel::{Rgb, DEFAULT_ACCENT_COLOR, DEFAULT_COLOR};
pub use device::{
    DeviceFactory, DeviceSet, Effect, OutputDevice, TerminalFlashDevice, TracingDevice,
};
pub use error::{DeviceError, Operation, OutputError};
pub use handlers::{Handler, HandlerSet, Subscription};
pub use registry::OutputSourceRegistry;
pub use source::{
    OutputSource, OutputSourceConfig, SourceKind, SourceSettings, SourceState, SourceStateChange,
    SourceStats,
};
