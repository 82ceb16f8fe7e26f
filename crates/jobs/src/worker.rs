//! Bounded worker pool.
//!
//! A fixed number of tokio tasks poll the job store for due work. Claims are
//! serialized through a pool-level mutex so the busy-project snapshot and the
//! claim itself cannot interleave; per-project execution is then guarded by
//! [`ProjectLocks`] until the job reaches a terminal or requeued state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use labtrace_versioning::tree::VersionTree;

use crate::context::JobContext;
use crate::error::JobError;
use crate::executor::ExecutorRegistry;
use crate::locks::{ProjectLockGuard, ProjectLocks};
use crate::retry::RetryPolicy;
use crate::store::{JobStore, JobStoreError};
use crate::types::JobRecord;
use crate::{DynJobStore, DynSnapshotStore};

/// Worker pool tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent worker tasks (execution slots).
    pub concurrency: usize,
    /// Idle poll interval when no job is due.
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(250),
            retry: RetryPolicy::default(),
        }
    }
}

struct PoolInner {
    store: DynJobStore,
    tree: VersionTree<DynSnapshotStore>,
    registry: ExecutorRegistry,
    config: WorkerConfig,
    locks: ProjectLocks,
    /// Serializes the busy-snapshot + claim + lock-acquire sequence.
    claim: Mutex<()>,
    shutdown: Notify,
    stopping: AtomicBool,
}

/// Owns the worker tasks; dropping without [`shutdown`](WorkerPool::shutdown)
/// aborts them.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(
        store: DynJobStore,
        snapshots: DynSnapshotStore,
        registry: ExecutorRegistry,
        config: WorkerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                store,
                tree: VersionTree::new(snapshots),
                registry,
                config,
                locks: ProjectLocks::new(),
                claim: Mutex::new(()),
                shutdown: Notify::new(),
                stopping: AtomicBool::new(false),
            }),
            handles: Vec::new(),
        }
    }

    /// Spawn the worker tasks. Idempotent only in the sense that calling it
    /// twice doubles the slot count, so don't.
    pub fn start(&mut self) {
        let slots = self.inner.config.concurrency.max(1);
        info!(slots, "starting worker pool");
        for slot in 0..slots {
            let inner = Arc::clone(&self.inner);
            self.handles
                .push(tokio::spawn(async move { worker_loop(inner, slot).await }));
        }
    }

    /// Stop polling and wait for in-flight jobs to reach a safe point.
    pub async fn shutdown(&mut self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.shutdown.notify_waiters();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task panicked or was aborted");
            }
        }
        info!("worker pool stopped");
    }

    /// Drain everything currently due, on the caller's task. Test and CLI
    /// convenience; the polling loop is the production path.
    pub async fn drain(&self) -> Result<usize, JobStoreError> {
        let mut ran = 0;
        while let Some((job, guard)) = claim_one(&self.inner).await? {
            run_claimed(&self.inner, job, guard).await;
            ran += 1;
        }
        Ok(ran)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn worker_loop(inner: Arc<PoolInner>, slot: usize) {
    debug!(slot, "worker slot online");
    loop {
        if inner.stopping.load(Ordering::SeqCst) {
            break;
        }

        match claim_one(&inner).await {
            Ok(Some((job, guard))) => {
                run_claimed(&inner, job, guard).await;
            }
            Ok(None) => {
                tokio::select! {
                    _ = inner.shutdown.notified() => break,
                    _ = tokio::time::sleep(inner.config.poll_interval) => {}
                }
            }
            Err(e) => {
                warn!(slot, error = %e, "claim failed; backing off");
                tokio::select! {
                    _ = inner.shutdown.notified() => break,
                    _ = tokio::time::sleep(inner.config.poll_interval) => {}
                }
            }
        }
    }
    debug!(slot, "worker slot offline");
}

/// Claim the next due job whose project is not already being worked on.
///
/// The claim mutex makes snapshot-filter-acquire atomic with respect to the
/// other slots; the returned guard keeps the project busy until dropped.
async fn claim_one(
    inner: &PoolInner,
) -> Result<Option<(JobRecord, ProjectLockGuard)>, JobStoreError> {
    let _claim = inner.claim.lock().await;

    let busy = inner.locks.busy_projects();
    let Some(job) = inner.store.claim_next_due(Utc::now(), &busy).await? else {
        return Ok(None);
    };

    match inner.locks.acquire(job.project_id) {
        Some(guard) => Ok(Some((job, guard))),
        // Unreachable while claims go through this mutex; requeue rather than
        // lose the job if it ever happens.
        None => {
            warn!(job_id = %job.job_id, "claimed job raced a project lock; requeuing");
            let mut record = job;
            record.mark_retry("project lock contention", Utc::now());
            inner.store.update(&record).await?;
            Ok(None)
        }
    }
}

async fn run_claimed(inner: &PoolInner, job: JobRecord, _guard: ProjectLockGuard) {
    let job_id = job.job_id;
    info!(
        %job_id,
        processing_type = %job.processing_type,
        attempt = job.attempts,
        "executing job"
    );

    let result = execute(inner, &job).await;

    // Work from the freshest record; progress and the cancel flag may have
    // moved while the executor ran.
    let mut record = match inner.store.get(job_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            error!(%job_id, "job record vanished mid-execution");
            return;
        }
        Err(e) => {
            error!(%job_id, error = %e, "cannot load job record after execution");
            return;
        }
    };

    match result {
        Ok(project_id) => {
            record.mark_completed(project_id);
            info!(%job_id, %project_id, "job completed");
        }
        Err(JobError::Cancelled) => {
            record.mark_cancelled();
            info!(%job_id, "job cancelled at checkpoint");
        }
        Err(e @ JobError::Transient(_)) if inner.config.retry.should_retry(record.attempts) => {
            let delay = inner.config.retry.delay_for_attempt(record.attempts);
            let next = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            warn!(
                %job_id,
                attempt = record.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "transient failure; retry scheduled"
            );
            record.mark_retry(e.to_string(), next);
        }
        Err(e) => {
            if matches!(e, JobError::Invariant(_)) {
                error!(%job_id, error = %e, "invariant violation; job failed permanently");
            } else {
                warn!(%job_id, error = %e, "job failed permanently");
            }
            record.mark_failed(e.to_string());
        }
    }

    if let Err(e) = inner.store.update(&record).await {
        error!(%job_id, error = %e, "failed to persist job outcome");
    }
}

/// Run the executor and, on success, append the resulting snapshot. Returns
/// the project the snapshot was appended under.
async fn execute(inner: &PoolInner, job: &JobRecord) -> Result<labtrace_core::ProjectId, JobError> {
    let Some(executor) = inner.registry.get(job.processing_type) else {
        return Err(JobError::terminal(format!(
            "no executor registered for {}",
            job.processing_type
        )));
    };

    let ctx = JobContext::new(job.job_id, inner.store.clone());
    ctx.checkpoint().await?;

    let outcome = executor.execute(job, &ctx).await?;

    // Last safe point: after this the snapshot append is committed.
    ctx.checkpoint().await?;

    inner
        .tree
        .append(
            outcome.project_id,
            job.processing_type,
            outcome.data,
            outcome.description,
        )
        .await?;

    Ok(outcome.project_id)
}
