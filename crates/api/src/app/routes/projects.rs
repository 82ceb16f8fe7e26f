use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use labtrace_core::ProjectId;
use labtrace_jobs::CorrectionRequest;
use labtrace_versioning::StateId;

use crate::app::routes::jobs::parse_operation_id;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/:id/corrections", post(submit_correction))
        .route("/:id/history", get(get_history))
        .route("/:id/tree", get(get_tree))
        .route("/:id/active", get(get_active))
        .route("/:id/checkout", post(checkout))
}

/// Submit a correction step against a project's active snapshot.
pub async fn submit_correction(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::SubmitCorrectionRequest>,
) -> axum::response::Response {
    let project_id: ProjectId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid project id")
        }
    };
    let processing_type = match errors::parse_processing_type(&body.processing_type) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let operation_id = match parse_operation_id(body.operation_id.as_deref()) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let outcome = match services
        .queue
        .enqueue_correction(CorrectionRequest {
            project_id,
            project_name: body.project_name,
            processing_type,
            params: body.params,
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

/// Ancestor path from the root to the active snapshot, oldest first.
pub async fn get_history(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let project_id: ProjectId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid project id")
        }
    };

    match services.tree.history(project_id).await {
        Ok(nodes) => Json(
            nodes
                .iter()
                .map(dto::SnapshotSummary::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => errors::tree_error_to_response(e),
    }
}

/// Every snapshot node of the project, enough to render the branch graph.
pub async fn get_tree(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let project_id: ProjectId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid project id")
        }
    };

    match services.tree.list(project_id).await {
        Ok(nodes) => Json(
            nodes
                .iter()
                .map(dto::SnapshotSummary::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => errors::tree_error_to_response(e),
    }
}

/// The active snapshot with its full data payload.
pub async fn get_active(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let project_id: ProjectId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid project id")
        }
    };

    match services.tree.active(project_id).await {
        Ok(Some(node)) => Json(dto::SnapshotDetail::from(node)).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("project {project_id} has no snapshots"),
        ),
        Err(e) => errors::tree_error_to_response(e),
    }
}

/// Make an existing snapshot the active one; the next correction branches
/// from it.
pub async fn checkout(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::CheckoutRequest>,
) -> axum::response::Response {
    let project_id: ProjectId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid project id")
        }
    };

    match services
        .tree
        .checkout(project_id, StateId(body.state_id))
        .await
    {
        Ok(node) => Json(dto::SnapshotSummary::from(&node)).into_response(),
        Err(e) => errors::tree_error_to_response(e),
    }
}
