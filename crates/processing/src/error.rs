//! Processing failure classification.

use thiserror::Error;

use labtrace_jobs::JobError;

/// Calculator/parser failure.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Correction parameters are malformed or reference nothing in the data.
    #[error("bad parameters: {0}")]
    BadParams(String),

    /// The input or snapshot data is structurally unusable (bad payload
    /// shape, zero denominators). Retrying cannot help.
    #[error("bad data: {0}")]
    BadData(String),

    /// I/O against the staged input failed; worth another attempt.
    #[error("input i/o failed: {0}")]
    Io(String),
}

impl ProcessingError {
    pub fn bad_params(msg: impl Into<String>) -> Self {
        Self::BadParams(msg.into())
    }

    pub fn bad_data(msg: impl Into<String>) -> Self {
        Self::BadData(msg.into())
    }
}

impl From<ProcessingError> for JobError {
    fn from(err: ProcessingError) -> Self {
        match err {
            ProcessingError::BadParams(msg) => JobError::Validation(msg),
            ProcessingError::BadData(msg) => JobError::Terminal(msg),
            ProcessingError::Io(msg) => JobError::Transient(msg),
        }
    }
}
