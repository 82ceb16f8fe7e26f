//! Postgres-backed job store.
//!
//! Atomicity notes:
//!
//! - `create` relies on the unique constraint on `operation_id` plus
//!   `ON CONFLICT DO NOTHING`; losing a race resolves to fetching the winner.
//! - `claim_next_due` selects with `FOR UPDATE SKIP LOCKED` inside a
//!   transaction so concurrent claimers never hand out the same job.
//! - `set_progress` clamps monotonically in SQL, so a late regressing report
//!   cannot move the counters backwards.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use labtrace_core::{JobId, OperationId, ProcessingType, ProjectId};
use tracing::instrument;
use labtrace_jobs::{CancelOutcome, CreateOutcome, JobRecord, JobState, JobStore, JobStoreError};

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

const JOB_COLUMNS: &str = "job_id, operation_id, project_id, project_name, processing_type, \
     params, state, total_rows, processed_rows, percent, attempts, last_error, \
     next_attempt_at, temp_input_path, result_project_id, cancel_requested, \
     created_at, updated_at";

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, record), fields(job_id = %record.job_id), err)]
    async fn create(&self, record: JobRecord) -> Result<CreateOutcome, JobStoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (job_id, operation_id, project_id, project_name, processing_type,
                              params, state, total_rows, processed_rows, percent, attempts,
                              last_error, next_attempt_at, temp_input_path, result_project_id,
                              cancel_requested, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (operation_id) DO NOTHING
            "#,
        )
        .bind(record.job_id.as_uuid())
        .bind(record.operation_id.as_ref().map(OperationId::as_uuid))
        .bind(record.project_id.as_ref().map(ProjectId::as_uuid))
        .bind(&record.project_name)
        .bind(record.processing_type.as_str())
        .bind(&record.params)
        .bind(record.state.to_string())
        .bind(record.total_rows as i64)
        .bind(record.processed_rows as i64)
        .bind(record.percent as i16)
        .bind(record.attempts as i32)
        .bind(&record.last_error)
        .bind(record.next_attempt_at)
        .bind(&record.temp_input_path)
        .bind(record.result_project_id.as_ref().map(ProjectId::as_uuid))
        .bind(record.cancel_requested)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create", e))?;

        if inserted.rows_affected() > 0 {
            return Ok(CreateOutcome {
                record,
                created: true,
            });
        }

        // Lost the idempotency race: return the first writer's record.
        let operation_id = record
            .operation_id
            .ok_or_else(|| JobStoreError::Storage("insert without conflict key was a no-op".into()))?;
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE operation_id = $1"
        ))
        .bind(operation_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create", e))?;

        Ok(CreateOutcome {
            record: job_from_row(&row)?,
            created: false,
        })
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1"))
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self), fields(operation_id = %operation_id), err)]
    async fn get_by_operation_id(
        &self,
        operation_id: OperationId,
    ) -> Result<Option<JobRecord>, JobStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE operation_id = $1"
        ))
        .bind(operation_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_by_operation_id", e))?;
        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self, record), fields(job_id = %record.job_id, state = %record.state), err)]
    async fn update(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                project_id = $2, state = $3, total_rows = $4, processed_rows = $5,
                percent = $6, attempts = $7, last_error = $8, next_attempt_at = $9,
                result_project_id = $10, cancel_requested = $11, updated_at = $12
            WHERE job_id = $1
            "#,
        )
        .bind(record.job_id.as_uuid())
        .bind(record.project_id.as_ref().map(ProjectId::as_uuid))
        .bind(record.state.to_string())
        .bind(record.total_rows as i64)
        .bind(record.processed_rows as i64)
        .bind(record.percent as i16)
        .bind(record.attempts as i32)
        .bind(&record.last_error)
        .bind(record.next_attempt_at)
        .bind(record.result_project_id.as_ref().map(ProjectId::as_uuid))
        .bind(record.cancel_requested)
        .bind(record.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(record.job_id));
        }
        Ok(())
    }

    #[instrument(skip(self, busy_projects), err)]
    async fn claim_next_due(
        &self,
        now: DateTime<Utc>,
        busy_projects: &[ProjectId],
    ) -> Result<Option<JobRecord>, JobStoreError> {
        let busy: Vec<Uuid> = busy_projects.iter().map(|p| *p.as_uuid()).collect();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("claim_next_due", e))?;

        let candidate = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE state = 'queued'
              AND next_attempt_at <= $1
              AND (project_id IS NULL OR project_id != ALL($2))
            ORDER BY next_attempt_at, created_at
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#
        ))
        .bind(now)
        .bind(&busy)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim_next_due", e))?;

        let Some(candidate) = candidate else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("claim_next_due", e))?;
            return Ok(None);
        };
        let job_id: Uuid = candidate
            .try_get("job_id")
            .map_err(|e| map_sqlx_error("claim_next_due", e))?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET state = 'running', attempts = attempts + 1, updated_at = now()
            WHERE job_id = $1
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim_next_due", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("claim_next_due", e))?;

        Ok(Some(job_from_row(&row)?))
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn set_progress(
        &self,
        job_id: JobId,
        total_rows: u64,
        processed_rows: u64,
    ) -> Result<(), JobStoreError> {
        // Monotonic clamp done server-side; only Running jobs accept progress.
        sqlx::query(
            r#"
            UPDATE jobs SET
                total_rows = GREATEST(total_rows, $2),
                processed_rows = LEAST(
                    GREATEST(processed_rows, $3),
                    GREATEST(total_rows, $2)
                ),
                percent = GREATEST(percent, LEAST(100, CASE
                    WHEN GREATEST(total_rows, $2) = 0 THEN 0
                    ELSE ROUND(
                        LEAST(GREATEST(processed_rows, $3), GREATEST(total_rows, $2))::numeric
                        * 100 / GREATEST(total_rows, $2)
                    )::int
                END))::smallint,
                updated_at = now()
            WHERE job_id = $1 AND state = 'running'
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(total_rows as i64)
        .bind(processed_rows as i64)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_progress", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn cancel(&self, job_id: JobId) -> Result<CancelOutcome, JobStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("cancel", e))?;

        let row = sqlx::query("SELECT state FROM jobs WHERE job_id = $1 FOR UPDATE")
            .bind(job_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("cancel", e))?
            .ok_or(JobStoreError::NotFound(job_id))?;
        let state = parse_state(
            row.try_get::<String, _>("state")
                .map_err(|e| map_sqlx_error("cancel", e))?
                .as_str(),
        )?;

        let outcome = match state {
            JobState::Queued => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET state = 'cancelled', cancel_requested = TRUE,
                        next_attempt_at = NULL, updated_at = now()
                    WHERE job_id = $1
                    "#,
                )
                .bind(job_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("cancel", e))?;
                CancelOutcome::CancelledImmediately
            }
            JobState::Running => {
                sqlx::query(
                    "UPDATE jobs SET cancel_requested = TRUE, updated_at = now() WHERE job_id = $1",
                )
                .bind(job_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("cancel", e))?;
                CancelOutcome::FlagSet
            }
            terminal => CancelOutcome::AlreadyTerminal(terminal),
        };

        tx.commit().await.map_err(|e| map_sqlx_error("cancel", e))?;
        Ok(outcome)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn is_cancel_requested(&self, job_id: JobId) -> Result<bool, JobStoreError> {
        let row = sqlx::query("SELECT cancel_requested FROM jobs WHERE job_id = $1")
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("is_cancel_requested", e))?
            .ok_or(JobStoreError::NotFound(job_id))?;
        row.try_get("cancel_requested")
            .map_err(|e| map_sqlx_error("is_cancel_requested", e))
    }

    #[instrument(skip(self), err)]
    async fn list(
        &self,
        state: Option<JobState>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, JobStoreError> {
        let rows = match state {
            Some(state) => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE state = $1 ORDER BY created_at LIMIT $2"
                ))
                .bind(state.to_string())
                .bind(limit as i64)
                .fetch_all(&*self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at LIMIT $1"
                ))
                .bind(limit as i64)
                .fetch_all(&*self.pool)
                .await
            }
        }
        .map_err(|e| map_sqlx_error("list", e))?;

        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn reset_running_to_queued(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, JobStoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'queued', next_attempt_at = $1, updated_at = now()
            WHERE state = 'running'
            RETURNING job_id
            "#,
        )
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("reset_running_to_queued", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<Uuid, _>("job_id")
                    .map(JobId::from_uuid)
                    .map_err(|e| map_sqlx_error("reset_running_to_queued", e))
            })
            .collect()
    }
}

fn job_from_row(row: &PgRow) -> Result<JobRecord, JobStoreError> {
    let read = |e: sqlx::Error| map_sqlx_error("row decode", e);

    let processing_type: String = row.try_get("processing_type").map_err(read)?;
    let processing_type: ProcessingType = processing_type
        .parse()
        .map_err(|e| JobStoreError::Storage(format!("bad processing_type in row: {e}")))?;
    let state: String = row.try_get("state").map_err(read)?;

    Ok(JobRecord {
        job_id: JobId::from_uuid(row.try_get("job_id").map_err(read)?),
        operation_id: row
            .try_get::<Option<Uuid>, _>("operation_id")
            .map_err(read)?
            .map(OperationId::from_uuid),
        project_id: row
            .try_get::<Option<Uuid>, _>("project_id")
            .map_err(read)?
            .map(ProjectId::from_uuid),
        project_name: row.try_get("project_name").map_err(read)?,
        processing_type,
        params: row.try_get("params").map_err(read)?,
        state: parse_state(&state)?,
        total_rows: row.try_get::<i64, _>("total_rows").map_err(read)? as u64,
        processed_rows: row.try_get::<i64, _>("processed_rows").map_err(read)? as u64,
        percent: row.try_get::<i16, _>("percent").map_err(read)? as u8,
        attempts: row.try_get::<i32, _>("attempts").map_err(read)? as u32,
        last_error: row.try_get("last_error").map_err(read)?,
        next_attempt_at: row.try_get("next_attempt_at").map_err(read)?,
        temp_input_path: row.try_get("temp_input_path").map_err(read)?,
        result_project_id: row
            .try_get::<Option<Uuid>, _>("result_project_id")
            .map_err(read)?
            .map(ProjectId::from_uuid),
        cancel_requested: row.try_get("cancel_requested").map_err(read)?,
        created_at: row.try_get("created_at").map_err(read)?,
        updated_at: row.try_get("updated_at").map_err(read)?,
    })
}

fn parse_state(s: &str) -> Result<JobState, JobStoreError> {
    match s {
        "queued" => Ok(JobState::Queued),
        "running" => Ok(JobState::Running),
        "completed" => Ok(JobState::Completed),
        "failed" => Ok(JobState::Failed),
        "cancelled" => Ok(JobState::Cancelled),
        other => Err(JobStoreError::Storage(format!("bad job state in row: {other}"))),
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    JobStoreError::Storage(format!("{operation}: {err}"))
}
