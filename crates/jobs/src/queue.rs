//! Job queue façade.
//!
//! The only write path into the job subsystem. Fail-fast validation happens
//! here, synchronously, before anything is persisted; everything that can only
//! fail at execution time is left to the worker. Enqueue is idempotent under
//! an operation id: a replayed request returns the first writer's job.

use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};

use labtrace_core::{DomainError, JobId, OperationId, ProcessingType, ProjectId};
use labtrace_versioning::tree::VersionTree;

use crate::executor::ExecutorRegistry;
use crate::store::{CancelOutcome, CreateOutcome, JobStore, JobStoreError};
use crate::types::{JobRecord, JobState};
use crate::worker::{WorkerConfig, WorkerPool};
use crate::{DynJobStore, DynSnapshotStore};

/// Façade operation error.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("job storage failed: {0}")]
    Storage(String),
}

impl From<JobStoreError> for QueueError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(job_id) => {
                QueueError::Domain(DomainError::not_found(format!("job {job_id}")))
            }
            JobStoreError::AlreadyExists(job_id) => {
                QueueError::Domain(DomainError::conflict(format!("job {job_id} already exists")))
            }
            JobStoreError::Storage(msg) => QueueError::Storage(msg),
        }
    }
}

/// Request to import a staged measurement file into a new project.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub project_name: String,
    /// Staged input handle produced by the upload collaborator.
    pub temp_input_path: String,
    /// Idempotency key; `None` opts out of deduplication.
    pub operation_id: Option<OperationId>,
}

/// Request to run a correction step against an existing project.
#[derive(Debug, Clone)]
pub struct CorrectionRequest {
    pub project_id: ProjectId,
    pub project_name: String,
    pub processing_type: ProcessingType,
    pub params: JsonValue,
    pub operation_id: Option<OperationId>,
}

/// Submission and inspection surface for background jobs.
#[derive(Clone)]
pub struct JobQueue {
    store: DynJobStore,
    tree: VersionTree<DynSnapshotStore>,
}

impl JobQueue {
    pub fn new(store: DynJobStore, snapshots: DynSnapshotStore) -> Self {
        Self {
            store,
            tree: VersionTree::new(snapshots),
        }
    }

    /// Enqueue an import. The staged file must already exist; a missing or
    /// unreadable path is rejected here rather than burning a worker attempt.
    ///
    /// A replayed `operation_id` returns the first writer's job before any
    /// validation runs: the original staged file may be long gone by the time
    /// a client retries, and the replay must still see the same job.
    pub async fn enqueue_import(&self, request: ImportRequest) -> Result<CreateOutcome, QueueError> {
        if let Some(existing) = self.replay(request.operation_id).await? {
            return Ok(existing);
        }

        if request.project_name.trim().is_empty() {
            return Err(DomainError::validation("project name must not be empty").into());
        }
        tokio::fs::metadata(&request.temp_input_path)
            .await
            .map_err(|e| {
                DomainError::validation(format!(
                    "staged input {} is not readable: {e}",
                    request.temp_input_path
                ))
            })?;

        let record = JobRecord::new_import(
            request.project_name,
            request.temp_input_path,
            request.operation_id,
        );
        let outcome = self.store.create(record).await?;
        self.log_enqueue(&outcome);
        Ok(outcome)
    }

    /// Enqueue a correction against the project's active snapshot.
    pub async fn enqueue_correction(
        &self,
        request: CorrectionRequest,
    ) -> Result<CreateOutcome, QueueError> {
        if let Some(existing) = self.replay(request.operation_id).await? {
            return Ok(existing);
        }

        if request.processing_type == ProcessingType::Import {
            return Err(
                DomainError::validation("imports are submitted through enqueue_import").into(),
            );
        }
        if !request.params.is_object() {
            return Err(DomainError::validation("correction params must be an object").into());
        }

        // The project must exist with at least one snapshot before corrections
        // can target it.
        let active = self
            .tree
            .active(request.project_id)
            .await
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        if active.is_none() {
            return Err(DomainError::not_found(format!(
                "project {} has no snapshots",
                request.project_id
            ))
            .into());
        }

        let record = JobRecord::new_correction(
            request.project_id,
            request.project_name,
            request.processing_type,
            request.params,
            request.operation_id,
        );
        let outcome = self.store.create(record).await?;
        self.log_enqueue(&outcome);
        Ok(outcome)
    }

    /// Idempotent-replay lookup. Requests that carry an already-seen
    /// `operation_id` resolve to the first writer's job without re-running
    /// validation; the store's `create` still handles the concurrent case
    /// where two unseen submissions race.
    async fn replay(
        &self,
        operation_id: Option<OperationId>,
    ) -> Result<Option<CreateOutcome>, QueueError> {
        let Some(operation_id) = operation_id else {
            return Ok(None);
        };
        let Some(record) = self.store.get_by_operation_id(operation_id).await? else {
            return Ok(None);
        };
        info!(
            job_id = %record.job_id,
            %operation_id,
            "duplicate operation id; returning existing job"
        );
        Ok(Some(CreateOutcome {
            record,
            created: false,
        }))
    }

    fn log_enqueue(&self, outcome: &CreateOutcome) {
        if outcome.created {
            info!(
                job_id = %outcome.record.job_id,
                processing_type = %outcome.record.processing_type,
                "job enqueued"
            );
        } else {
            info!(
                job_id = %outcome.record.job_id,
                "duplicate operation id; returning existing job"
            );
        }
    }

    pub async fn status(&self, job_id: JobId) -> Result<JobRecord, QueueError> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("job {job_id}")).into())
    }

    /// Request cancellation. Queued jobs cancel immediately; Running jobs get
    /// the flag and cancel at the next checkpoint; terminal jobs are left
    /// untouched and reported as such.
    pub async fn cancel(&self, job_id: JobId) -> Result<CancelOutcome, QueueError> {
        let outcome = self.store.cancel(job_id).await?;
        match &outcome {
            CancelOutcome::CancelledImmediately => info!(%job_id, "job cancelled before pickup"),
            CancelOutcome::FlagSet => info!(%job_id, "cancellation requested"),
            CancelOutcome::AlreadyTerminal(state) => {
                warn!(%job_id, state = %state, "cancel on terminal job ignored")
            }
        }
        Ok(outcome)
    }

    pub async fn list(
        &self,
        state: Option<JobState>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, QueueError> {
        Ok(self.store.list(state, limit).await?)
    }

    /// Startup recovery: requeue jobs the previous process died holding.
    /// Attempt counts are preserved so a crash loop still hits the retry cap.
    pub async fn recover_interrupted(&self) -> Result<Vec<JobId>, QueueError> {
        let recovered = self.store.reset_running_to_queued(Utc::now()).await?;
        if !recovered.is_empty() {
            info!(count = recovered.len(), "requeued interrupted jobs");
        }
        Ok(recovered)
    }
}

/// Queue façade plus its worker pool, wired and lifecycle-managed together.
pub struct JobQueueService {
    queue: JobQueue,
    pool: WorkerPool,
}

impl JobQueueService {
    pub fn new(
        store: DynJobStore,
        snapshots: DynSnapshotStore,
        registry: ExecutorRegistry,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue: JobQueue::new(store.clone(), snapshots.clone()),
            pool: WorkerPool::new(store, snapshots, registry, config),
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Recover interrupted jobs, then start the worker slots.
    pub async fn start(&mut self) -> Result<(), QueueError> {
        self.queue.recover_interrupted().await?;
        self.pool.start();
        Ok(())
    }

    pub async fn stop(&mut self) {
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryJobStore;
    use labtrace_versioning::{InMemorySnapshotStore, SnapshotStore};
    use serde_json::json;
    use std::io::Write;
    use std::sync::Arc;

    fn queue() -> (JobQueue, DynJobStore, DynSnapshotStore) {
        let store: DynJobStore = Arc::new(InMemoryJobStore::new());
        let snapshots: DynSnapshotStore = Arc::new(InMemorySnapshotStore::new());
        (JobQueue::new(store.clone(), snapshots.clone()), store, snapshots)
    }

    fn staged_file() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "{{}}").unwrap();
        f
    }

    #[tokio::test]
    async fn import_enqueue_is_idempotent_per_operation_id() {
        let (queue, _, _) = queue();
        let file = staged_file();
        let op = OperationId::new();

        let first = queue
            .enqueue_import(ImportRequest {
                project_name: "Run 7".into(),
                temp_input_path: file.path().display().to_string(),
                operation_id: Some(op),
            })
            .await
            .unwrap();
        let second = queue
            .enqueue_import(ImportRequest {
                project_name: "Run 7".into(),
                temp_input_path: file.path().display().to_string(),
                operation_id: Some(op),
            })
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.record.job_id, second.record.job_id);
    }

    #[tokio::test]
    async fn import_replay_returns_the_job_after_the_staged_file_is_gone() {
        let (queue, _, _) = queue();
        let file = staged_file();
        let path = file.path().display().to_string();
        let op = OperationId::new();

        let first = queue
            .enqueue_import(ImportRequest {
                project_name: "Run 7".into(),
                temp_input_path: path.clone(),
                operation_id: Some(op),
            })
            .await
            .unwrap();
        assert!(first.created);

        // Staging cleanup between the original request and the client retry.
        drop(file);

        let replay = queue
            .enqueue_import(ImportRequest {
                project_name: "Run 7".into(),
                temp_input_path: path,
                operation_id: Some(op),
            })
            .await
            .unwrap();

        assert!(!replay.created);
        assert_eq!(replay.record.job_id, first.record.job_id);
    }

    #[tokio::test]
    async fn correction_replay_skips_validation() {
        let (queue, store, snapshots) = queue();
        let project = ProjectId::new();
        snapshots
            .insert(labtrace_versioning::NewSnapshot {
                project_id: project,
                parent_state_id: None,
                version_number: 1,
                processing_type: ProcessingType::Import,
                data: json!({"rows": []}),
                description: None,
            })
            .await
            .unwrap();

        let op = OperationId::new();
        let request = CorrectionRequest {
            project_id: project,
            project_name: "Run 7".into(),
            processing_type: ProcessingType::DfCorrection,
            params: json!({"solution_label": "S1", "new_df": 2.0}),
            operation_id: Some(op),
        };
        let first = queue.enqueue_correction(request.clone()).await.unwrap();
        assert!(first.created);

        // A replay with mangled params still resolves to the first writer.
        let replay = queue
            .enqueue_correction(CorrectionRequest {
                params: json!(null),
                ..request
            })
            .await
            .unwrap();

        assert!(!replay.created);
        assert_eq!(replay.record.job_id, first.record.job_id);
        assert_eq!(store.list(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_staged_file_is_rejected_before_persisting() {
        let (queue, store, _) = queue();

        let err = queue
            .enqueue_import(ImportRequest {
                project_name: "Run 7".into(),
                temp_input_path: "/nonexistent/run7.jsonl".into(),
                operation_id: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            QueueError::Domain(DomainError::Validation(_))
        ));
        assert!(store.list(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrections_require_an_existing_project() {
        let (queue, _, _) = queue();

        let err = queue
            .enqueue_correction(CorrectionRequest {
                project_id: ProjectId::new(),
                project_name: "Run 7".into(),
                processing_type: ProcessingType::WeightCorrection,
                params: json!({"solution_label": "S1", "new_weight": 1.0}),
                operation_id: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, QueueError::Domain(DomainError::NotFound(_))));
    }

    #[tokio::test]
    async fn corrections_cannot_masquerade_as_imports() {
        let (queue, _, _) = queue();

        let err = queue
            .enqueue_correction(CorrectionRequest {
                project_id: ProjectId::new(),
                project_name: "Run 7".into(),
                processing_type: ProcessingType::Import,
                params: json!({}),
                operation_id: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            QueueError::Domain(DomainError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn correction_enqueues_once_the_project_has_a_snapshot() {
        let (queue, _, snapshots) = queue();
        let project = ProjectId::new();
        snapshots
            .insert(labtrace_versioning::NewSnapshot {
                project_id: project,
                parent_state_id: None,
                version_number: 1,
                processing_type: ProcessingType::Import,
                data: json!({"rows": []}),
                description: None,
            })
            .await
            .unwrap();

        let outcome = queue
            .enqueue_correction(CorrectionRequest {
                project_id: project,
                project_name: "Run 7".into(),
                processing_type: ProcessingType::DfCorrection,
                params: json!({"solution_label": "S1", "new_df": 2.0}),
                operation_id: None,
            })
            .await
            .unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.record.project_id, Some(project));
    }

    #[tokio::test]
    async fn status_and_cancel_miss_on_unknown_ids() {
        let (queue, _, _) = queue();
        let ghost = JobId::new();

        assert!(matches!(
            queue.status(ghost).await.unwrap_err(),
            QueueError::Domain(DomainError::NotFound(_))
        ));
        assert!(matches!(
            queue.cancel(ghost).await.unwrap_err(),
            QueueError::Domain(DomainError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn recovery_requeues_running_jobs_with_attempts_intact() {
        let (queue, store, _) = queue();
        let file = staged_file();

        let job = queue
            .enqueue_import(ImportRequest {
                project_name: "Run 7".into(),
                temp_input_path: file.path().display().to_string(),
                operation_id: None,
            })
            .await
            .unwrap()
            .record;

        // Simulate a crash mid-execution.
        store.claim_next_due(Utc::now(), &[]).await.unwrap();

        let recovered = queue.recover_interrupted().await.unwrap();
        assert_eq!(recovered, vec![job.job_id]);

        let record = queue.status(job.job_id).await.unwrap();
        assert_eq!(record.state, JobState::Queued);
        assert_eq!(record.attempts, 1);
        assert!(record.is_due(Utc::now()));
    }
}
