use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use labtrace_core::{JobId, OperationId};
use labtrace_jobs::{CancelOutcome, ImportRequest};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

const DEFAULT_LIST_LIMIT: usize = 100;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_jobs))
        .route("/imports", post(submit_import))
        .route("/:id", get(get_job))
        .route("/:id/cancel", post(cancel_job))
}

/// Submit an import of a staged measurement file. Replays with the same
/// `operation_id` return the first writer's job with `created: false`.
pub async fn submit_import(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SubmitImportRequest>,
) -> axum::response::Response {
    let operation_id = match parse_operation_id(body.operation_id.as_deref()) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let outcome = match services
        .queue
        .enqueue_import(ImportRequest {
            project_name: body.project_name,
            temp_input_path: body.temp_input_path,
            operation_id,
        })
        .await
    {
        Ok(o) => o,
        Err(e) => return errors::queue_error_to_response(e),
    };

    let status = if outcome.created {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };

    (
        status,
        Json(serde_json::json!({
            "created": outcome.created,
            "job": dto::JobResponse::from(&outcome.record),
        })),
    )
        .into_response()
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"),
    };

    match services.queue.status(job_id).await {
        Ok(record) => Json(dto::JobResponse::from(&record)).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

/// Request cancellation. Queued jobs cancel immediately; running jobs honor
/// the request at their next checkpoint; terminal jobs report a conflict.
pub async fn cancel_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"),
    };

    let outcome = match services.queue.cancel(job_id).await {
        Ok(o) => o,
        Err(e) => return errors::queue_error_to_response(e),
    };

    match outcome {
        CancelOutcome::CancelledImmediately => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "cancelled" })),
        )
            .into_response(),
        CancelOutcome::FlagSet => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "cancel_requested" })),
        )
            .into_response(),
        CancelOutcome::AlreadyTerminal(state) => errors::json_error(
            StatusCode::CONFLICT,
            "already_terminal",
            format!("job is already {state}"),
        ),
    }
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListJobsQuery>,
) -> axum::response::Response {
    let state = match query.state.as_deref() {
        Some(s) => match errors::parse_job_state(s) {
            Ok(v) => Some(v),
            Err(resp) => return resp,
        },
        None => None,
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);

    match services.queue.list(state, limit).await {
        Ok(records) => Json(
            records
                .iter()
                .map(dto::JobResponse::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub(crate) fn parse_operation_id(
    raw: Option<&str>,
) -> Result<Option<OperationId>, axum::response::Response> {
    match raw {
        None => Ok(None),
        Some(s) => s.parse().map(Some).map_err(|_| {
            errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_id",
                "operation_id must be a UUID",
            )
        }),
    }
}
