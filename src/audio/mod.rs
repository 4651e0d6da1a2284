//! Audio click output
//!
//! A cpal output stream that plays metronome clicks at their scheduled
//! instants.

mod click;
mod device;
mod engine;
mod error;

pub use click::{synthesize_click, ClickCache};
pub use device::{list_output_devices, AudioDevice, DeviceId};
pub use engine::{ClickDevice, ClickDeviceConfig};
pub use error::AudioError;
