//! Store and worker wiring shared by `main.rs` and the black-box tests.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use labtrace_infra::postgres::{ensure_schema, PostgresJobStore, PostgresSnapshotStore};
use labtrace_jobs::{
    DynJobStore, DynSnapshotStore, InMemoryJobStore, JobQueue, JobQueueService, WorkerConfig,
};
use labtrace_processing::{standard_registry, JsonLinesParser};
use labtrace_versioning::{InMemorySnapshotStore, VersionTree};

/// Where job records and snapshots live.
pub enum Backend {
    /// Ephemeral stores; everything is lost on restart. Tests and local dev.
    InMemory,
    /// Durable stores over a shared Postgres pool.
    Postgres(PgPool),
}

/// Read-side handles shared with the HTTP handlers.
pub struct AppServices {
    pub queue: JobQueue,
    pub tree: VersionTree<DynSnapshotStore>,
}

/// Wire stores, the executor registry, and the worker pool.
///
/// The returned [`JobQueueService`] is not started; the caller owns its
/// lifecycle (startup recovery runs inside `start`).
pub async fn build_services(
    backend: Backend,
    worker: WorkerConfig,
) -> Result<(Arc<AppServices>, JobQueueService), sqlx::Error> {
    let (store, snapshots): (DynJobStore, DynSnapshotStore) = match backend {
        Backend::InMemory => {
            info!("using in-memory stores");
            (
                Arc::new(InMemoryJobStore::new()),
                Arc::new(InMemorySnapshotStore::new()),
            )
        }
        Backend::Postgres(pool) => {
            ensure_schema(&pool).await?;
            info!("using postgres stores");
            (
                Arc::new(PostgresJobStore::new(pool.clone())),
                Arc::new(PostgresSnapshotStore::new(pool)),
            )
        }
    };

    let registry = standard_registry(Arc::new(JsonLinesParser), snapshots.clone());
    let service = JobQueueService::new(store, snapshots.clone(), registry, worker);
    let services = Arc::new(AppServices {
        queue: service.queue().clone(),
        tree: VersionTree::new(snapshots),
    });

    Ok((services, service))
}
