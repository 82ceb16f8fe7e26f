//! Database schema.

use sqlx::PgPool;

/// DDL for the job and snapshot tables. Idempotent; applied at startup.
///
/// The partial unique index on `project_states` is the database-level backstop
/// for the single-active-node invariant: a concurrent double-activate fails
/// with a unique violation instead of corrupting the tree.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    job_id            UUID PRIMARY KEY,
    operation_id      UUID UNIQUE,
    project_id        UUID,
    project_name      TEXT NOT NULL,
    processing_type   TEXT NOT NULL,
    params            JSONB NOT NULL,
    state             TEXT NOT NULL,
    total_rows        BIGINT NOT NULL DEFAULT 0,
    processed_rows    BIGINT NOT NULL DEFAULT 0,
    percent           SMALLINT NOT NULL DEFAULT 0,
    attempts          INTEGER NOT NULL DEFAULT 0,
    last_error        TEXT,
    next_attempt_at   TIMESTAMPTZ,
    temp_input_path   TEXT,
    result_project_id UUID,
    cancel_requested  BOOLEAN NOT NULL DEFAULT FALSE,
    created_at        TIMESTAMPTZ NOT NULL,
    updated_at        TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS jobs_due_idx
    ON jobs (next_attempt_at, created_at)
    WHERE state = 'queued';

CREATE TABLE IF NOT EXISTS project_states (
    state_id        BIGSERIAL PRIMARY KEY,
    project_id      UUID NOT NULL,
    parent_state_id BIGINT REFERENCES project_states (state_id),
    version_number  INTEGER NOT NULL,
    processing_type TEXT NOT NULL,
    data            JSONB NOT NULL,
    description     TEXT,
    timestamp       TIMESTAMPTZ NOT NULL DEFAULT now(),
    is_active       BOOLEAN NOT NULL
);

CREATE INDEX IF NOT EXISTS project_states_project_idx
    ON project_states (project_id, state_id);

CREATE UNIQUE INDEX IF NOT EXISTS project_states_one_active
    ON project_states (project_id)
    WHERE is_active;
"#;

/// Apply the schema to the given pool.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}
