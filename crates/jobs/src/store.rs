//! Durable job record storage abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use labtrace_core::{JobId, OperationId, ProjectId};

use crate::types::{JobRecord, JobState};

/// Job store error.
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job already exists: {0}")]
    AlreadyExists(JobId),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Result of an idempotent create.
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub record: JobRecord,
    /// `false` when an existing record with the same `operation_id` won.
    pub created: bool,
}

/// Result of a cancel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was still Queued and is now terminally Cancelled.
    CancelledImmediately,
    /// The job is Running; the cooperative flag is set and will be honored at
    /// the worker's next checkpoint.
    FlagSet,
    /// The job was already terminal; nothing to do.
    AlreadyTerminal(JobState),
}

impl CancelOutcome {
    pub fn accepted(&self) -> bool {
        !matches!(self, Self::AlreadyTerminal(_))
    }
}

/// Durable storage of job records.
///
/// Implementations must make three operations atomic:
///
/// - `create`: when the record carries an `operation_id` that already exists,
///   return the existing record instead of inserting — concurrent calls with
///   the same unseen key resolve to exactly one created record (first writer
///   wins).
/// - `claim_next_due`: select the oldest Queued record with
///   `next_attempt_at <= now`, ordered by `(next_attempt_at, created_at)`,
///   excluding the given busy projects, and mark it Running (incrementing
///   `attempts`) in the same step so no two workers claim the same job.
/// - `cancel`: Queued flips terminally to Cancelled; Running only gets the
///   cooperative flag set.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record, deduplicating on `operation_id`.
    async fn create(&self, record: JobRecord) -> Result<CreateOutcome, JobStoreError>;

    /// Fetch a record by id.
    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, JobStoreError>;

    /// Fetch a record by its idempotency key.
    async fn get_by_operation_id(
        &self,
        operation_id: OperationId,
    ) -> Result<Option<JobRecord>, JobStoreError>;

    /// Persist a full record (keyed by `job_id`).
    async fn update(&self, record: &JobRecord) -> Result<(), JobStoreError>;

    /// Atomically claim the next due job, skipping `busy_projects`.
    async fn claim_next_due(
        &self,
        now: DateTime<Utc>,
        busy_projects: &[ProjectId],
    ) -> Result<Option<JobRecord>, JobStoreError>;

    /// Record advisory progress for a Running job. Regressions are clamped.
    async fn set_progress(
        &self,
        job_id: JobId,
        total_rows: u64,
        processed_rows: u64,
    ) -> Result<(), JobStoreError>;

    /// Request cancellation.
    async fn cancel(&self, job_id: JobId) -> Result<CancelOutcome, JobStoreError>;

    /// Whether cooperative cancellation has been requested.
    async fn is_cancel_requested(&self, job_id: JobId) -> Result<bool, JobStoreError>;

    /// List records, optionally filtered by state, oldest first.
    async fn list(
        &self,
        state: Option<JobState>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, JobStoreError>;

    /// Startup recovery: every Running record (the previous process died
    /// mid-execution) goes back to Queued with `next_attempt_at = now`,
    /// attempts unchanged. Returns the affected job ids.
    async fn reset_running_to_queued(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, JobStoreError>;
}

#[async_trait]
impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    async fn create(&self, record: JobRecord) -> Result<CreateOutcome, JobStoreError> {
        (**self).create(record).await
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        (**self).get(job_id).await
    }

    async fn get_by_operation_id(
        &self,
        operation_id: OperationId,
    ) -> Result<Option<JobRecord>, JobStoreError> {
        (**self).get_by_operation_id(operation_id).await
    }

    async fn update(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        (**self).update(record).await
    }

    async fn claim_next_due(
        &self,
        now: DateTime<Utc>,
        busy_projects: &[ProjectId],
    ) -> Result<Option<JobRecord>, JobStoreError> {
        (**self).claim_next_due(now, busy_projects).await
    }

    async fn set_progress(
        &self,
        job_id: JobId,
        total_rows: u64,
        processed_rows: u64,
    ) -> Result<(), JobStoreError> {
        (**self).set_progress(job_id, total_rows, processed_rows).await
    }

    async fn cancel(&self, job_id: JobId) -> Result<CancelOutcome, JobStoreError> {
        (**self).cancel(job_id).await
    }

    async fn is_cancel_requested(&self, job_id: JobId) -> Result<bool, JobStoreError> {
        (**self).is_cancel_requested(job_id).await
    }

    async fn list(
        &self,
        state: Option<JobState>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, JobStoreError> {
        (**self).list(state, limit).await
    }

    async fn reset_running_to_queued(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, JobStoreError> {
        (**self).reset_running_to_queued(now).await
    }
}
