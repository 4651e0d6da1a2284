//! Output error types

use std::fmt;

use thiserror::Error;

/// Source operation that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Initialize,
    ProcessTick,
    PrepareNextTick,
    UpdateConfig,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Initialize => "initialize",
            Operation::ProcessTick => "process tick",
            Operation::PrepareNextTick => "prepare next tick",
            Operation::UpdateConfig => "update config",
        };
        f.write_str(name)
    }
}

/// Errors reported by output sources and the registry
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OutputError {
    #[error("Source '{source_id}' failed to initialize: {reason}")]
    Initialization { source_id: String, reason: String },

    #[error("Unsupported source type: {0}")]
    UnsupportedSourceType(String),

    #[error("Source '{source_id}' failed to {operation}: {reason}")]
    Processing {
        source_id: String,
        operation: Operation,
        reason: String,
    },

    #[error("{} sources failed to {operation}", failures.len())]
    Dispatch {
        operation: Operation,
        failures: Vec<OutputError>,
    },
}

impl OutputError {
    pub(crate) fn processing(
        source_id: &str,
        operation: Operation,
        reason: impl Into<String>,
    ) -> Self {
        OutputError::Processing {
            source_id: source_id.to_string(),
            operation,
            reason: reason.into(),
        }
    }

    /// Id of the failing source, if the error belongs to a single source
    pub fn source_id(&self) -> Option<&str> {
        match self {
            OutputError::Initialization { source_id, .. }
            | OutputError::Processing { source_id, .. } => Some(source_id),
            _ => None,
        }
    }

    /// Ids of every failing source, aggregates included
    pub fn failed_sources(&self) -> Vec<&str> {
        match self {
            OutputError::Dispatch { failures, .. } => {
                failures.iter().flat_map(|e| e.failed_sources()).collect()
            }
            other => other.source_id().into_iter().collect(),
        }
    }
}

/// Errors raised by an output device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device or context could not be acquired
    #[error("Device unavailable: {0}")]
    Unavailable(String),

    /// A single effect was skipped; the device keeps working
    #[error("Effect dropped: {0}")]
    Dropped(String),

    /// The device went away while in use
    #[error("Device lost: {0}")]
    Lost(String),
}
