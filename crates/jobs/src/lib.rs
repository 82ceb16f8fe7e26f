//! `labtrace-jobs` — durable background job execution.
//!
//! Import and correction work runs as persisted jobs: enqueued through the
//! [`JobQueue`] façade (idempotent under retried requests), claimed by a
//! bounded [`WorkerPool`], retried with deterministic backoff, and recovered
//! after a process crash. A completed job's only externally visible effect is
//! a new node in the project's version tree.

pub mod context;
pub mod error;
pub mod executor;
pub mod locks;
pub mod memory;
pub mod queue;
pub mod retry;
pub mod store;
pub mod types;
pub mod worker;

pub use context::JobContext;
pub use error::JobError;
pub use executor::{ExecutorRegistry, JobExecutor, JobOutcome};
pub use memory::InMemoryJobStore;
pub use queue::{CorrectionRequest, ImportRequest, JobQueue, JobQueueService, QueueError};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use store::{CancelOutcome, CreateOutcome, JobStore, JobStoreError};
pub use types::{JobRecord, JobState};
pub use worker::{WorkerConfig, WorkerPool};

/// Shared handle to a job store implementation.
pub type DynJobStore = std::sync::Arc<dyn JobStore>;

/// Shared handle to a snapshot store implementation.
pub type DynSnapshotStore = std::sync::Arc<dyn labtrace_versioning::SnapshotStore>;
