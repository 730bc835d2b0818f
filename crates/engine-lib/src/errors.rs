//! Error taxonomy for the policy engine
//!
//! Every public operation returns `Result<T, EngineError>`. The variants map
//! one-to-one onto the retry/reporting policy each failure class gets:
//! caller errors are never retried, storage errors are retried with bounded
//! backoff, executor errors follow the action's own retry config.

use thiserror::Error;

/// Errors produced by the policy engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Structural violation of a request (missing field, bad format)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Referenced entity does not exist
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// Duplicate creation, concurrent update, or enforcement in progress
    #[error("conflict: {0}")]
    Conflict(String),

    /// Policy is not in the Active state
    #[error("policy {0} is not active")]
    PolicyInactive(String),

    /// Policy target selector rejects the workload
    #[error("policy {policy} not applicable to workload {workload}: {reason}")]
    PolicyNotApplicable {
        policy: String,
        workload: String,
        reason: String,
    },

    /// Expression failed to compile
    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    /// Expression failed at evaluation time (type mismatch, missing field)
    #[error("expression runtime error: {0}")]
    ExpressionRuntime(String),

    /// Storage backend I/O failure
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Downstream action execution failed
    #[error("executor failure: {0}")]
    ExecutorFailure(String),

    /// Decision type has no action mapping
    #[error("unsupported decision type: {0}")]
    UnsupportedDecision(String),

    /// Cooperative cancellation
    #[error("operation cancelled")]
    Cancelled,

    /// Unreachable or logic error
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether the error is a per-policy evaluation outcome rather than a
    /// hard failure. Callers surface these as results, not errors.
    pub fn is_evaluation_outcome(&self) -> bool {
        matches!(
            self,
            EngineError::PolicyInactive(_) | EngineError::PolicyNotApplicable { .. }
        )
    }

    /// Whether a retry with backoff is appropriate
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::StorageUnavailable(_) | EngineError::ExecutorFailure(_)
        )
    }
}

/// Convenience alias used throughout the library
pub type Result<T> = std::result::Result<T, EngineError>;
