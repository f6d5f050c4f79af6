//! Persistence layer for pipeline run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteExecutionStore;

pub use crate::core::ExecutionStatus;
use crate::core::{StageKind, TriggerEvent};
use crate::execution::PipelineReport;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    pub event: TriggerEvent,

    pub branch: String,

    pub commit: Option<String>,

    /// Execution status
    pub status: ExecutionStatus,

    /// Primary tag of the image built in this run
    pub image: Option<String>,

    pub failed_stage: Option<StageKind>,

    /// Step id, health check or deploy phase that failed
    pub failed_step: Option<String>,

    pub error: Option<String>,

    /// When execution started
    pub started_at: DateTime<Utc>,

    /// When execution finished
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of stages that completed
    pub completed_stages: usize,

    /// Total number of stages
    pub total_stages: usize,
}

impl ExecutionSummary {
    /// Progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_stages == 0 {
            return 0.0;
        }
        self.completed_stages as f64 / self.total_stages as f64
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a pipeline run
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>>;

    /// List runs of a pipeline, newest first
    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>>;

    /// List all pipeline names
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or `--no-history` runs)
#[derive(Default)]
pub struct InMemoryPersistence {
    executions: RwLock<HashMap<Uuid, ExecutionSummary>>,
    by_pipeline: RwLock<HashMap<String, Vec<Uuid>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        let mut execs = self.executions.write().await;
        let replaced = execs
            .insert(execution.execution_id, execution.clone())
            .is_some();

        if !replaced {
            let mut by_pipeline = self.by_pipeline.write().await;
            by_pipeline
                .entry(execution.pipeline_name.clone())
                .or_default()
                .push(execution.execution_id);
        }

        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let execs = self.executions.read().await;
        Ok(execs.get(&execution_id).cloned())
    }

    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>> {
        let execs = self.executions.read().await;
        let by_pipeline = self.by_pipeline.read().await;

        let mut result: Vec<ExecutionSummary> = by_pipeline
            .get(pipeline_name)
            .map(|ids| ids.iter().filter_map(|id| execs.get(id).cloned()).collect())
            .unwrap_or_default();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let by_pipeline = self.by_pipeline.read().await;
        let mut names: Vec<String> = by_pipeline.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Open the on-disk history store, or an in-memory one without the `sqlite` feature
pub async fn open_default_store() -> Result<Arc<dyn PersistenceBackend>> {
    #[cfg(feature = "sqlite")]
    {
        Ok(Arc::new(SqliteExecutionStore::with_default_path().await?))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        Ok(Arc::new(InMemoryPersistence::new()))
    }
}

/// Create a summary from a finished run
pub fn create_summary(report: &PipelineReport) -> ExecutionSummary {
    ExecutionSummary {
        execution_id: report.execution_id,
        pipeline_name: report.pipeline_name.clone(),
        event: report.trigger.event,
        branch: report.trigger.branch.clone(),
        commit: report.trigger.commit.clone(),
        status: report.status,
        image: report.image.as_ref().map(|i| i.to_string()),
        failed_stage: report.failed_stage(),
        failed_step: report.failed_step().map(str::to_string),
        error: report.failure.as_ref().map(|f| f.error.to_string()),
        started_at: report.started_at,
        completed_at: report.finished_at,
        completed_stages: report.completed_stages().len(),
        total_stages: StageKind::ORDER.len(),
    }
}
