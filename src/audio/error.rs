//! Audio error types

use thiserror::Error;

use crate::output::DeviceError;

/// Errors that can occur in the audio subsystem
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),

    #[error("Stream error: {0}")]
    StreamError(String),
}

impl From<AudioError> for DeviceError {
    fn from(e: AudioError) -> Self {
        DeviceError::Unavailable(e.to_string())
    }
}
