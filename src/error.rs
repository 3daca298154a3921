//! Error types for the orchestration engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::workflow::state::RunState;
use crate::workflow::validator::ValidationError;

/// Result type for orchestration operations.
pub type FlowResult<T> = Result<T, FlowError>;

/// Errors returned to callers of the engine.
///
/// Step failures are not errors: they are reported outcomes recorded on the
/// run. Everything here is a caller mistake or a storage problem, and none
/// of them mutate run state.
#[derive(Debug, Error)]
pub enum FlowError {
    /// No template is registered under this name.
    #[error("Template '{0}' not found")]
    TemplateNotFound(String),

    /// The template failed run-start validation.
    #[error("Template '{template}' is not runnable: {source}")]
    InvalidTemplate {
        template: String,
        #[source]
        source: ValidationError,
    },

    /// A run is suspended and must be resolved or reset first.
    #[error("A run is already active (state: {0})")]
    RunActive(RunState),

    /// Approve/skip was requested but no step is waiting.
    #[error("No step is waiting for approval (run state: {0})")]
    NothingWaiting(RunState),

    /// Retry requested for a step that is not the failed step.
    #[error("Step '{step}' cannot be retried: {reason}")]
    InvalidRetry { step: String, reason: String },

    /// Rollback is not offered for this run.
    #[error("Rollback is not available: {0}")]
    RollbackUnavailable(String),

    /// Rollback target is not a valid checkpoint.
    #[error("Invalid rollback target '{target}': {reason}")]
    InvalidRollbackTarget { target: String, reason: String },

    /// Template file could not be read or written.
    #[error("Template file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Template file is not valid YAML for the template schema.
    #[error("Failed to parse templates: {0}")]
    Parse(#[from] serde_yaml::Error),
}
