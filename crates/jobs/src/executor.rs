//! Executor seam between the worker pool and the processing logic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use labtrace_core::{ProcessingType, ProjectId};

use crate::context::JobContext;
use crate::error::JobError;
use crate::types::JobRecord;

/// What a successful execution produced. The worker appends `data` to the
/// project's version tree and only then marks the job completed.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    /// For corrections this echoes the job's project; for imports the
    /// executor mints the new project id.
    pub project_id: ProjectId,
    /// The full snapshot payload for the new tree node.
    pub data: JsonValue,
    pub description: Option<String>,
}

/// One processing step's implementation.
///
/// Executors are pure with respect to job bookkeeping: they read the record,
/// report progress and poll cancellation through the [`JobContext`], and
/// return an outcome. They never touch the job store or the tree directly.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &JobRecord, ctx: &JobContext) -> Result<JobOutcome, JobError>;
}

/// Dispatch table from processing type to executor.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<ProcessingType, Arc<dyn JobExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        processing_type: ProcessingType,
        executor: Arc<dyn JobExecutor>,
    ) -> Self {
        self.executors.insert(processing_type, executor);
        self
    }

    pub fn get(&self, processing_type: ProcessingType) -> Option<Arc<dyn JobExecutor>> {
        self.executors.get(&processing_type).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("types", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}
