//! Execution context handed to job executors.

use labtrace_core::JobId;
use tracing::warn;

use crate::error::JobError;
use crate::store::JobStore;
use crate::DynJobStore;

/// Checkpoint and progress facilities for a running job.
///
/// Executors call [`checkpoint`](Self::checkpoint) between row batches; that
/// is where cooperative cancellation is observed. Progress is advisory — a
/// failed progress write never fails the job.
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    store: DynJobStore,
}

impl JobContext {
    pub fn new(job_id: JobId, store: DynJobStore) -> Self {
        Self { job_id, store }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Safe point between batches: observes the cancellation flag.
    pub async fn checkpoint(&self) -> Result<(), JobError> {
        match self.store.is_cancel_requested(self.job_id).await {
            Ok(true) => Err(JobError::Cancelled),
            Ok(false) => Ok(()),
            // If the flag cannot be read the job keeps going; cancellation is
            // best-effort.
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "failed to read cancellation flag");
                Ok(())
            }
        }
    }

    /// Report advisory progress.
    pub async fn report_progress(&self, total_rows: u64, processed_rows: u64) {
        if let Err(e) = self
            .store
            .set_progress(self.job_id, total_rows, processed_rows)
            .await
        {
            warn!(job_id = %self.job_id, error = %e, "failed to persist progress");
        }
    }
}
