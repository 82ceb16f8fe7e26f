use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use labtrace_jobs::JobRecord;
use labtrace_versioning::ProjectStateNode;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitImportRequest {
    pub project_name: String,
    /// Staged input handle produced by the upload collaborator.
    pub temp_input_path: String,
    /// Idempotency key (UUID); omit to opt out of deduplication.
    pub operation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitCorrectionRequest {
    pub project_name: String,
    pub processing_type: String,
    pub params: JsonValue,
    pub operation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub state_id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub state: Option<String>,
    pub limit: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: String,
    pub state: String,
    pub processing_type: String,
    pub project_id: Option<String>,
    pub project_name: String,
    pub percent: u8,
    pub total_rows: u64,
    pub processed_rows: u64,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub result_project_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobResponse {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.job_id.to_string(),
            state: record.state.to_string(),
            processing_type: record.processing_type.to_string(),
            project_id: record.project_id.map(|id| id.to_string()),
            project_name: record.project_name.clone(),
            percent: record.percent,
            total_rows: record.total_rows,
            processed_rows: record.processed_rows,
            attempts: record.attempts,
            last_error: record.last_error.clone(),
            result_project_id: record.result_project_id.map(|id| id.to_string()),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Snapshot node without its `data` payload, for history/tree listings.
#[derive(Debug, Serialize)]
pub struct SnapshotSummary {
    pub state_id: i64,
    pub parent_state_id: Option<i64>,
    pub version_number: u32,
    pub processing_type: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub timestamp: DateTime<Utc>,
}

impl From<&ProjectStateNode> for SnapshotSummary {
    fn from(node: &ProjectStateNode) -> Self {
        Self {
            state_id: node.state_id.0,
            parent_state_id: node.parent_state_id.map(|id| id.0),
            version_number: node.version_number,
            processing_type: node.processing_type.to_string(),
            description: node.description.clone(),
            is_active: node.is_active,
            timestamp: node.timestamp,
        }
    }
}

/// Snapshot node including the full project data payload.
#[derive(Debug, Serialize)]
pub struct SnapshotDetail {
    #[serde(flatten)]
    pub summary: SnapshotSummary,
    pub data: JsonValue,
}

impl From<ProjectStateNode> for SnapshotDetail {
    fn from(node: ProjectStateNode) -> Self {
        Self {
            summary: SnapshotSummary::from(&node),
            data: node.data,
        }
    }
}
