//! Job record and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use labtrace_core::{JobId, OperationId, ProcessingType, ProjectId};

/// Job execution state.
///
/// Transitions: `Queued -> Running` (claim), `Running -> Completed | Failed |
/// Cancelled | Queued` (requeue on retryable failure or crash recovery), and
/// `Queued -> Cancelled` (cancel before pickup). Terminal states never leave.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One persisted unit of work.
///
/// This field set is the on-disk schema; consumers depend on it staying
/// stable. `attempts` only increases, and `next_attempt_at` is `None` exactly
/// when the record is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    /// Caller-supplied idempotency key; at most one record per key.
    pub operation_id: Option<OperationId>,
    /// `None` for an import until it creates the project.
    pub project_id: Option<ProjectId>,
    pub project_name: String,
    /// The step this job performs; `Import` jobs read `temp_input_path`,
    /// corrections read `params`.
    pub processing_type: ProcessingType,
    /// Correction parameters (empty object for imports).
    pub params: JsonValue,
    pub state: JobState,
    pub total_rows: u64,
    pub processed_rows: u64,
    /// 0..=100; monotonically non-decreasing while Running.
    pub percent: u8,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Earliest time this job may (re)run; `None` once terminal.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Staged input handle from the file-staging collaborator (imports).
    pub temp_input_path: Option<String>,
    /// Project created by a completed import.
    pub result_project_id: Option<ProjectId>,
    /// Cooperative cancellation flag, observed at worker checkpoints.
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// New import job, queued and immediately due.
    pub fn new_import(
        project_name: impl Into<String>,
        temp_input_path: impl Into<String>,
        operation_id: Option<OperationId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: JobId::new(),
            operation_id,
            project_id: None,
            project_name: project_name.into(),
            processing_type: ProcessingType::Import,
            params: JsonValue::Object(Default::default()),
            state: JobState::Queued,
            total_rows: 0,
            processed_rows: 0,
            percent: 0,
            attempts: 0,
            last_error: None,
            next_attempt_at: Some(now),
            temp_input_path: Some(temp_input_path.into()),
            result_project_id: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// New correction job against an existing project.
    pub fn new_correction(
        project_id: ProjectId,
        project_name: impl Into<String>,
        processing_type: ProcessingType,
        params: JsonValue,
        operation_id: Option<OperationId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: JobId::new(),
            operation_id,
            project_id: Some(project_id),
            project_name: project_name.into(),
            processing_type,
            params,
            state: JobState::Queued,
            total_rows: 0,
            processed_rows: 0,
            percent: 0,
            attempts: 0,
            last_error: None,
            next_attempt_at: Some(now),
            temp_input_path: None,
            result_project_id: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_import(&self) -> bool {
        self.processing_type == ProcessingType::Import
    }

    /// Due for execution at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Queued && self.next_attempt_at.is_some_and(|at| at <= now)
    }

    /// Claim transition: Running, attempt counted.
    pub fn mark_running(&mut self) {
        self.state = JobState::Running;
        self.attempts += 1;
        self.updated_at = Utc::now();
    }

    /// Terminal success. Only called after the snapshot append has durably
    /// succeeded.
    pub fn mark_completed(&mut self, result_project_id: ProjectId) {
        self.state = JobState::Completed;
        self.project_id.get_or_insert(result_project_id);
        self.result_project_id = Some(result_project_id);
        self.percent = 100;
        self.processed_rows = self.total_rows;
        self.last_error = None;
        self.next_attempt_at = None;
        self.updated_at = Utc::now();
    }

    /// Retryable failure: back to the queue, eligible at `next_attempt_at`.
    pub fn mark_retry(&mut self, error: impl Into<String>, next_attempt_at: DateTime<Utc>) {
        self.state = JobState::Queued;
        self.last_error = Some(error.into());
        self.next_attempt_at = Some(next_attempt_at);
        self.updated_at = Utc::now();
    }

    /// Terminal failure.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.state = JobState::Failed;
        self.last_error = Some(error.into());
        self.next_attempt_at = None;
        self.updated_at = Utc::now();
    }

    /// Terminal cancellation (either before pickup or at a checkpoint).
    pub fn mark_cancelled(&mut self) {
        self.state = JobState::Cancelled;
        self.next_attempt_at = None;
        self.updated_at = Utc::now();
    }

    /// Advisory progress; regressions are clamped rather than rejected.
    pub fn record_progress(&mut self, total_rows: u64, processed_rows: u64) {
        self.total_rows = self.total_rows.max(total_rows);
        self.processed_rows = self.processed_rows.max(processed_rows.min(self.total_rows));
        let percent = if self.total_rows == 0 {
            0
        } else {
            ((self.processed_rows as f64 / self.total_rows as f64) * 100.0).round() as u8
        };
        self.percent = self.percent.max(percent.min(100));
        self.updated_at = Utc::now();
    }
}
