//! Job failure taxonomy.
//!
//! The worker pool classifies every collaborator failure into one of these
//! before deciding retry vs. terminal; the façade only records what the
//! worker reported and never re-classifies.

use thiserror::Error;

use labtrace_versioning::tree::TreeError;

/// Classified execution failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Malformed input or parameters. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Temporary condition (storage contention, transient I/O). Retried per
    /// the backoff policy up to the attempt cap.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Unrecoverable processing failure (structurally invalid data, bad
    /// numeric condition). Goes straight to `Failed` even if attempts remain.
    #[error("terminal failure: {0}")]
    Terminal(String),

    /// Cooperative cancellation observed at a checkpoint.
    #[error("cancelled")]
    Cancelled,

    /// Internal fault (tree corruption). Aborts without partial writes and is
    /// logged for operator attention; never retried, never silently repaired.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl JobError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn terminal(msg: impl Into<String>) -> Self {
        Self::Terminal(msg.into())
    }

    /// Only transient failures are eligible for another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<TreeError> for JobError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::NotFound { .. } => JobError::Validation(err.to_string()),
            TreeError::Invariant(msg) => JobError::Invariant(msg),
            TreeError::Storage(msg) => JobError::Transient(msg),
        }
    }
}
