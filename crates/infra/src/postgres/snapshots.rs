//! Postgres-backed snapshot store.
//!
//! Both primitives run in a transaction: the old active node flips off and
//! the new one flips on atomically, so a reader never observes zero or two
//! active nodes. The partial unique index in the schema backs this up at the
//! database level.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use labtrace_core::{ProcessingType, ProjectId};
use tracing::instrument;
use labtrace_versioning::{NewSnapshot, ProjectStateNode, SnapshotStore, SnapshotStoreError, StateId};

#[derive(Debug, Clone)]
pub struct PostgresSnapshotStore {
    pool: Arc<PgPool>,
}

impl PostgresSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

const NODE_COLUMNS: &str = "state_id, project_id, parent_state_id, version_number, \
     processing_type, data, description, timestamp, is_active";

#[async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    #[instrument(skip(self, new), fields(project_id = %new.project_id, version = new.version_number), err)]
    async fn insert(&self, new: NewSnapshot) -> Result<ProjectStateNode, SnapshotStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert", e))?;

        sqlx::query("UPDATE project_states SET is_active = FALSE WHERE project_id = $1 AND is_active")
            .bind(new.project_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert", e))?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO project_states
                (project_id, parent_state_id, version_number, processing_type,
                 data, description, timestamp, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, now(), TRUE)
            RETURNING {NODE_COLUMNS}
            "#
        ))
        .bind(new.project_id.as_uuid())
        .bind(new.parent_state_id.map(|s| s.0))
        .bind(new.version_number as i32)
        .bind(new.processing_type.as_str())
        .bind(&new.data)
        .bind(&new.description)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("insert", e))?;

        node_from_row(&row)
    }

    #[instrument(skip(self), fields(project_id = %project_id, state_id = %state_id), err)]
    async fn activate(
        &self,
        project_id: ProjectId,
        state_id: StateId,
    ) -> Result<(), SnapshotStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("activate", e))?;

        sqlx::query("UPDATE project_states SET is_active = FALSE WHERE project_id = $1 AND is_active")
            .bind(project_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("activate", e))?;

        let result = sqlx::query(
            "UPDATE project_states SET is_active = TRUE WHERE project_id = $1 AND state_id = $2",
        )
        .bind(project_id.as_uuid())
        .bind(state_id.0)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("activate", e))?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("activate", e))?;
            return Err(SnapshotStoreError::NotFound {
                project_id,
                state_id,
            });
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("activate", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(project_id = %project_id, state_id = %state_id), err)]
    async fn get(
        &self,
        project_id: ProjectId,
        state_id: StateId,
    ) -> Result<Option<ProjectStateNode>, SnapshotStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM project_states WHERE project_id = $1 AND state_id = $2"
        ))
        .bind(project_id.as_uuid())
        .bind(state_id.0)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(node_from_row).transpose()
    }

    #[instrument(skip(self), fields(project_id = %project_id), err)]
    async fn active(
        &self,
        project_id: ProjectId,
    ) -> Result<Option<ProjectStateNode>, SnapshotStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM project_states WHERE project_id = $1 AND is_active"
        ))
        .bind(project_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("active", e))?;

        // The partial unique index makes 2+ unreachable; report rather than
        // pick one if it ever shows up.
        if rows.len() > 1 {
            return Err(SnapshotStoreError::Corruption(format!(
                "project {project_id} has {} active nodes",
                rows.len()
            )));
        }
        rows.first().map(node_from_row).transpose()
    }

    #[instrument(skip(self), fields(project_id = %project_id), err)]
    async fn list(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<ProjectStateNode>, SnapshotStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM project_states WHERE project_id = $1 ORDER BY state_id"
        ))
        .bind(project_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        rows.iter().map(node_from_row).collect()
    }
}

fn node_from_row(row: &PgRow) -> Result<ProjectStateNode, SnapshotStoreError> {
    let read = |e: sqlx::Error| map_sqlx_error("row decode", e);

    let processing_type: String = row.try_get("processing_type").map_err(read)?;
    let processing_type: ProcessingType = processing_type
        .parse()
        .map_err(|e| SnapshotStoreError::Storage(format!("bad processing_type in row: {e}")))?;

    Ok(ProjectStateNode {
        state_id: StateId(row.try_get("state_id").map_err(read)?),
        project_id: ProjectId::from_uuid(row.try_get::<Uuid, _>("project_id").map_err(read)?),
        parent_state_id: row
            .try_get::<Option<i64>, _>("parent_state_id")
            .map_err(read)?
            .map(StateId),
        version_number: row.try_get::<i32, _>("version_number").map_err(read)? as u32,
        processing_type,
        data: row.try_get("data").map_err(read)?,
        description: row.try_get("description").map_err(read)?,
        timestamp: row.try_get("timestamp").map_err(read)?,
        is_active: row.try_get("is_active").map_err(read)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> SnapshotStoreError {
    if let sqlx::Error::Database(db_err) = &err {
        // Unique violation on the one-active partial index means two writers
        // raced an activate; surface it as corruption for operator attention.
        if db_err.code().as_deref() == Some("23505") {
            return SnapshotStoreError::Corruption(format!("{operation}: {}", db_err.message()));
        }
    }
    SnapshotStoreError::Storage(format!("{operation}: {err}"))
}
