//! Typed error hierarchy for the workflow director.
//!
//! - `StateError` covers reading and writing the persisted state document
//! - `DirectorError` is the single error value handed to the topmost caller

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors from loading, persisting, or building a workflow state document.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to read state file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse state file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write state file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported state value: {0}")]
    Unsupported(String),
}

/// Coarse classification of a `DirectorError` for the topmost caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing configuration, detected before any pass runs
    Configuration,
    /// A run started and failed
    RunFailure,
    /// The deadline elapsed; the worker's final outcome is unknown
    Timeout,
}

/// Errors surfaced by assembly and by a director run.
#[derive(Debug, Error)]
pub enum DirectorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown component type: {0}")]
    UnknownComponentType(String),

    #[error("Stage {stage} failed: {source}")]
    StateIo {
        stage: String,
        #[source]
        source: StateError,
    },

    #[error("Stage {stage} reported constraint violations: {}", violations.join("; "))]
    ConstraintViolation { stage: String, violations: Vec<String> },

    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Run timed out after {0:?}; outcome of in-flight work is unknown")]
    Timeout(Duration),

    #[error("Recovered from panic in workflow worker: {0}")]
    PanicRecovered(String),

    #[error("Iteration limit of {limit} reached before the workflow completed")]
    IterationLimit { limit: u32 },
}

impl DirectorError {
    /// Wrap a stage failure with the originating stage's name.
    pub fn stage(stage: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Stage {
            stage: stage.into(),
            source,
        }
    }

    /// Wrap a state load/save failure with the state manager's name.
    pub fn state_io(stage: impl Into<String>, source: StateError) -> Self {
        Self::StateIo {
            stage: stage.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::UnknownComponentType(_) => ErrorKind::Configuration,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::StateIo { .. }
            | Self::ConstraintViolation { .. }
            | Self::Stage { .. }
            | Self::PanicRecovered(_)
            | Self::IterationLimit { .. } => ErrorKind::RunFailure,
        }
    }
}

pub type DirectorResult<T> = std::result::Result<T, DirectorError>;
