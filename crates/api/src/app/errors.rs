use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use labtrace_core::{DomainError, ProcessingType};
use labtrace_jobs::{JobState, QueueError};
use labtrace_versioning::TreeError;

pub fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    match err {
        QueueError::Domain(e) => domain_error_to_response(e),
        QueueError::Storage(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg)
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DomainError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
    }
}

pub fn tree_error_to_response(err: TreeError) -> axum::response::Response {
    match err {
        TreeError::NotFound { .. } => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        TreeError::Invariant(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        TreeError::Storage(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_processing_type(s: &str) -> Result<ProcessingType, axum::response::Response> {
    s.parse().map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "invalid_processing_type",
            format!("unknown processing type: {s}"),
        )
    })
}

pub fn parse_job_state(s: &str) -> Result<JobState, axum::response::Response> {
    match s {
        "queued" => Ok(JobState::Queued),
        "running" => Ok(JobState::Running),
        "completed" => Ok(JobState::Completed),
        "failed" => Ok(JobState::Failed),
        "cancelled" => Ok(JobState::Cancelled),
        _ => Err(json_error(
            StatusCode::BAD_REQUEST,
            "invalid_state",
            "state must be one of: queued, running, completed, failed, cancelled",
        )),
    }
}
