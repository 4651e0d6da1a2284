//! Transport error types

use thiserror::Error;

use crate::model::ConfigError;
use crate::output::OutputError;

/// Errors that can occur while controlling playback
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Transport is already running")]
    AlreadyRunning,

    #[error("Invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),
}
