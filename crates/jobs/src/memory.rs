//! In-memory job store for tests/dev.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use labtrace_core::{JobId, OperationId, ProjectId};

use crate::store::{CancelOutcome, CreateOutcome, JobStore, JobStoreError};
use crate::types::{JobRecord, JobState};

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, JobRecord>,
    by_operation: HashMap<OperationId, JobId>,
}

/// In-memory implementation of [`JobStore`].
///
/// All multi-step operations run under one write lock, which provides the
/// atomicity the trait demands.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: RwLock<Inner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_poisoned() -> JobStoreError {
    JobStoreError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, record: JobRecord) -> Result<CreateOutcome, JobStoreError> {
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;

        // First writer wins on the idempotency key; later callers observe the
        // existing record.
        if let Some(op) = record.operation_id {
            if let Some(existing_id) = inner.by_operation.get(&op) {
                let existing = inner
                    .jobs
                    .get(existing_id)
                    .cloned()
                    .ok_or(JobStoreError::NotFound(*existing_id))?;
                return Ok(CreateOutcome {
                    record: existing,
                    created: false,
                });
            }
        }

        if inner.jobs.contains_key(&record.job_id) {
            return Err(JobStoreError::AlreadyExists(record.job_id));
        }

        if let Some(op) = record.operation_id {
            inner.by_operation.insert(op, record.job_id);
        }
        inner.jobs.insert(record.job_id, record.clone());

        Ok(CreateOutcome {
            record,
            created: true,
        })
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(inner.jobs.get(&job_id).cloned())
    }

    async fn get_by_operation_id(
        &self,
        operation_id: OperationId,
    ) -> Result<Option<JobRecord>, JobStoreError> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(inner
            .by_operation
            .get(&operation_id)
            .and_then(|job_id| inner.jobs.get(job_id))
            .cloned())
    }

    async fn update(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;
        if !inner.jobs.contains_key(&record.job_id) {
            return Err(JobStoreError::NotFound(record.job_id));
        }
        inner.jobs.insert(record.job_id, record.clone());
        Ok(())
    }

    async fn claim_next_due(
        &self,
        now: DateTime<Utc>,
        busy_projects: &[ProjectId],
    ) -> Result<Option<JobRecord>, JobStoreError> {
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;

        let next_id = inner
            .jobs
            .values()
            .filter(|j| {
                j.is_due(now)
                    && j.project_id
                        .is_none_or(|p| !busy_projects.contains(&p))
            })
            .min_by_key(|j| (j.next_attempt_at, j.created_at))
            .map(|j| j.job_id);

        if let Some(job_id) = next_id {
            if let Some(job) = inner.jobs.get_mut(&job_id) {
                job.mark_running();
                return Ok(Some(job.clone()));
            }
        }

        Ok(None)
    }

    async fn set_progress(
        &self,
        job_id: JobId,
        total_rows: u64,
        processed_rows: u64,
    ) -> Result<(), JobStoreError> {
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?;
        if job.state == JobState::Running {
            job.record_progress(total_rows, processed_rows);
        }
        Ok(())
    }

    async fn cancel(&self, job_id: JobId) -> Result<CancelOutcome, JobStoreError> {
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?;

        match job.state {
            JobState::Queued => {
                job.cancel_requested = true;
                job.mark_cancelled();
                Ok(CancelOutcome::CancelledImmediately)
            }
            JobState::Running => {
                job.cancel_requested = true;
                job.updated_at = Utc::now();
                Ok(CancelOutcome::FlagSet)
            }
            state => Ok(CancelOutcome::AlreadyTerminal(state)),
        }
    }

    async fn is_cancel_requested(&self, job_id: JobId) -> Result<bool, JobStoreError> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        inner
            .jobs
            .get(&job_id)
            .map(|j| j.cancel_requested)
            .ok_or(JobStoreError::NotFound(job_id))
    }

    async fn list(
        &self,
        state: Option<JobState>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, JobStoreError> {
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        let mut result: Vec<_> = inner
            .jobs
            .values()
            .filter(|j| state.is_none_or(|s| j.state == s))
            .cloned()
            .collect();
        result.sort_by_key(|j| j.created_at);
        result.truncate(limit);
        Ok(result)
    }

    async fn reset_running_to_queued(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, JobStoreError> {
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;
        let mut reset = Vec::new();
        for job in inner.jobs.values_mut() {
            if job.state == JobState::Running {
                job.state = JobState::Queued;
                job.next_attempt_at = Some(now);
                job.updated_at = now;
                reset.push(job.job_id);
            }
        }
        Ok(reset)
    }
}
