//! sqlx/Postgres adapters.

pub mod jobs;
pub mod schema;
pub mod snapshots;

pub use jobs::PostgresJobStore;
pub use schema::ensure_schema;
pub use snapshots::PostgresSnapshotStore;
