//! Job executors: import and correction.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use labtrace_core::{ProcessingType, ProjectId};
use labtrace_jobs::{
    DynSnapshotStore, ExecutorRegistry, JobContext, JobError, JobExecutor, JobOutcome, JobRecord,
};
use labtrace_versioning::VersionTree;

use crate::corrections;
use crate::parser::RowParser;
use crate::table::Table;

/// Parses a staged instrument export into a fresh project's root snapshot.
pub struct ImportExecutor {
    parser: Arc<dyn RowParser>,
}

impl ImportExecutor {
    pub fn new(parser: Arc<dyn RowParser>) -> Self {
        Self { parser }
    }
}

#[async_trait]
impl JobExecutor for ImportExecutor {
    async fn execute(&self, job: &JobRecord, ctx: &JobContext) -> Result<JobOutcome, JobError> {
        let path = job
            .temp_input_path
            .as_deref()
            .ok_or_else(|| JobError::validation("import job has no staged input path"))?;

        let table = self.parser.parse(Path::new(path)).await?;
        if table.is_empty() {
            return Err(JobError::terminal("staged input contains no rows"));
        }

        ctx.checkpoint().await?;
        let rows = table.rows.len() as u64;
        ctx.report_progress(rows, rows).await;

        let project_id = ProjectId::new();
        info!(
            job_id = %job.job_id,
            %project_id,
            rows,
            "import parsed into new project"
        );

        Ok(JobOutcome {
            project_id,
            data: table.into_value(),
            description: Some(format!("Imported {rows} rows as '{}'", job.project_name)),
        })
    }
}

/// Loads the project's active snapshot, applies the calculator named by the
/// job's processing type, and hands back the corrected table.
pub struct CorrectionExecutor {
    tree: VersionTree<DynSnapshotStore>,
}

impl CorrectionExecutor {
    pub fn new(snapshots: DynSnapshotStore) -> Self {
        Self {
            tree: VersionTree::new(snapshots),
        }
    }
}

#[async_trait]
impl JobExecutor for CorrectionExecutor {
    async fn execute(&self, job: &JobRecord, ctx: &JobContext) -> Result<JobOutcome, JobError> {
        let project_id = job
            .project_id
            .ok_or_else(|| JobError::validation("correction job has no project"))?;

        let active = self
            .tree
            .active(project_id)
            .await
            .map_err(JobError::from)?
            .ok_or_else(|| {
                JobError::validation(format!("project {project_id} has no snapshots"))
            })?;

        let mut table = Table::from_value(active.data)?;
        let total = table.rows.len() as u64;
        ctx.report_progress(total, 0).await;
        ctx.checkpoint().await?;

        let description = corrections::apply(&mut table, job.processing_type, &job.params)?;
        ctx.report_progress(total, total).await;

        info!(
            job_id = %job.job_id,
            %project_id,
            parent_state = %active.state_id,
            "{description}"
        );

        Ok(JobOutcome {
            project_id,
            data: table.into_value(),
            description: Some(description),
        })
    }
}

/// The full dispatch table: one import executor and one correction executor
/// shared across every correction type.
pub fn standard_registry(
    parser: Arc<dyn RowParser>,
    snapshots: DynSnapshotStore,
) -> ExecutorRegistry {
    let correction = Arc::new(CorrectionExecutor::new(snapshots));
    let mut registry =
        ExecutorRegistry::new().register(ProcessingType::Import, Arc::new(ImportExecutor::new(parser)));
    for processing_type in ProcessingType::ALL {
        if processing_type != ProcessingType::Import {
            registry = registry.register(processing_type, correction.clone());
        }
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::JsonLinesParser;
    use crate::table::{fixtures, num_cell};
    use labtrace_jobs::{DynJobStore, InMemoryJobStore, JobStore};
    use labtrace_versioning::{InMemorySnapshotStore, NewSnapshot};
    use serde_json::json;
    use std::io::Write;

    fn context(store: &DynJobStore, job: &JobRecord) -> JobContext {
        JobContext::new(job.job_id, store.clone())
    }

    #[tokio::test]
    async fn import_executor_creates_a_project_from_the_staged_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"Solution Label": "S-001", "Type": "Samp", "Cu": 12.5}}"#).unwrap();

        let store: DynJobStore = Arc::new(InMemoryJobStore::new());
        let job = store
            .create(JobRecord::new_import(
                "Run 9",
                file.path().display().to_string(),
                None,
            ))
            .await
            .unwrap()
            .record;

        let executor = ImportExecutor::new(Arc::new(JsonLinesParser));
        let outcome = executor.execute(&job, &context(&store, &job)).await.unwrap();

        let table = Table::from_value(outcome.data).unwrap();
        assert_eq!(table.rows.len(), 1);
        assert!(outcome.description.unwrap().contains("Run 9"));
    }

    #[tokio::test]
    async fn import_executor_rejects_empty_inputs() {
        let file = tempfile::NamedTempFile::new().unwrap();

        let store: DynJobStore = Arc::new(InMemoryJobStore::new());
        let job = store
            .create(JobRecord::new_import(
                "Run 9",
                file.path().display().to_string(),
                None,
            ))
            .await
            .unwrap()
            .record;

        let executor = ImportExecutor::new(Arc::new(JsonLinesParser));
        let err = executor
            .execute(&job, &context(&store, &job))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Terminal(_)));
    }

    #[tokio::test]
    async fn correction_executor_transforms_the_active_snapshot() {
        let snapshots: DynSnapshotStore = Arc::new(InMemorySnapshotStore::new());
        let project = ProjectId::new();
        snapshots
            .insert(NewSnapshot {
                project_id: project,
                parent_state_id: None,
                version_number: 1,
                processing_type: ProcessingType::Import,
                data: fixtures::run().into_value(),
                description: None,
            })
            .await
            .unwrap();

        let store: DynJobStore = Arc::new(InMemoryJobStore::new());
        let job = store
            .create(JobRecord::new_correction(
                project,
                "Run 9",
                ProcessingType::WeightCorrection,
                json!({"solution_label": "S-001", "new_weight": 1.0}),
                None,
            ))
            .await
            .unwrap()
            .record;

        let executor = CorrectionExecutor::new(snapshots);
        let outcome = executor.execute(&job, &context(&store, &job)).await.unwrap();

        assert_eq!(outcome.project_id, project);
        let table = Table::from_value(outcome.data).unwrap();
        assert_eq!(num_cell(&table.rows[1], "Cu"), Some(6.25));
    }

    #[tokio::test]
    async fn correction_with_bad_params_is_a_validation_failure() {
        let snapshots: DynSnapshotStore = Arc::new(InMemorySnapshotStore::new());
        let project = ProjectId::new();
        snapshots
            .insert(NewSnapshot {
                project_id: project,
                parent_state_id: None,
                version_number: 1,
                processing_type: ProcessingType::Import,
                data: fixtures::run().into_value(),
                description: None,
            })
            .await
            .unwrap();

        let store: DynJobStore = Arc::new(InMemoryJobStore::new());
        let job = store
            .create(JobRecord::new_correction(
                project,
                "Run 9",
                ProcessingType::WeightCorrection,
                json!({"wrong": true}),
                None,
            ))
            .await
            .unwrap()
            .record;

        let executor = CorrectionExecutor::new(snapshots);
        let err = executor
            .execute(&job, &context(&store, &job))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
    }

    #[test]
    fn standard_registry_covers_every_processing_type() {
        let registry = standard_registry(
            Arc::new(JsonLinesParser),
            Arc::new(InMemorySnapshotStore::new()),
        );
        for processing_type in ProcessingType::ALL {
            assert!(
                registry.get(processing_type).is_some(),
                "missing executor for {processing_type}"
            );
        }
    }
}
