//! Typed error hierarchy for the phase-gate workflow engine.
//!
//! Every guard violation in the transition controller is recovered into a
//! `WorkflowError` variant and returned to the caller — none are silently
//! swallowed. `http_status` gives the wire mapping used by the API layer.

use thiserror::Error;

use crate::models::PhaseStatus;

/// Errors from the workflow engine.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Phase instance {instance_id} is {current}; {requirement}")]
    InvalidState {
        instance_id: i64,
        current: PhaseStatus,
        requirement: String,
    },

    #[error(
        "Sequence violation: cannot transition from phase order {from_order} to {to_order}; \
         the target must be exactly next in sequence"
    )]
    SequenceViolation { from_order: i64, to_order: i64 },

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("No phase workflow initialized for project {project_id}")]
    ProjectNotFound { project_id: i64 },

    #[error("Phase instance {id} not found")]
    InstanceNotFound { id: i64 },

    #[error("Phase review {id} not found")]
    ReviewNotFound { id: i64 },

    #[error("Phase instance {instance_id} changed concurrently (expected status {expected}); re-read before retrying")]
    ConcurrencyConflict {
        instance_id: i64,
        expected: PhaseStatus,
    },

    #[error("Phase workflow already initialized for project {project_id}")]
    AlreadyInitialized { project_id: i64 },

    #[error("Review {review_id} was already completed with outcome {outcome}")]
    AlreadyCompleted { review_id: i64, outcome: String },

    #[error("Template configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkflowError {
    /// HTTP status code for this error, per the engine's wire contract.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::InvalidState { .. } | Self::SequenceViolation { .. } => 400,
            Self::Authorization(_) => 403,
            Self::ProjectNotFound { .. }
            | Self::InstanceNotFound { .. }
            | Self::ReviewNotFound { .. } => 404,
            Self::ConcurrencyConflict { .. }
            | Self::AlreadyInitialized { .. }
            | Self::AlreadyCompleted { .. } => 409,
            Self::Configuration(_) | Self::Database(_) | Self::LockPoisoned | Self::Other(_) => 500,
        }
    }
}
