//! Persistence seams for run records
//!
//! The pipeline never talks to a database directly. Run records, node-execution records, app
//! logs and draft variables each go through a narrow trait; [`InMemoryRepository`] implements
//! all of them for tests and single-process use.
//!
//! ```text
//! WorkflowCycleManager ──► WorkflowRunRepository::save
//!                      ──► NodeExecutionRepository::save
//!                      ──► AppLogRepository::create
//!                      ──► DraftVariableSink::save   (spawned)
//! ```

use crate::entities::{DraftVariableKey, NodeExecution, WorkflowAppLog, WorkflowRun};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait WorkflowRunRepository: Send + Sync {
    /// Insert or replace a run record
    async fn save(&self, run: &WorkflowRun) -> Result<()>;

    async fn get(&self, run_id: &str) -> Result<Option<WorkflowRun>>;

    /// Highest sequence number used by runs of `app_id`, 0 when there are none
    async fn max_sequence_number(&self, tenant_id: &str, app_id: &str) -> Result<u64>;
}

#[async_trait]
pub trait NodeExecutionRepository: Send + Sync {
    /// Insert or replace a record, keyed by its record id
    async fn save(&self, execution: &NodeExecution) -> Result<()>;

    /// Records of a run ordered by index
    async fn list_by_run(&self, workflow_run_id: &str) -> Result<Vec<NodeExecution>>;
}

#[async_trait]
pub trait AppLogRepository: Send + Sync {
    async fn create(&self, log: &WorkflowAppLog) -> Result<()>;
}

/// Receives node values so an editor can inspect them later
#[async_trait]
pub trait DraftVariableSink: Send + Sync {
    async fn save(
        &self,
        key: DraftVariableKey,
        process_data: Map<String, Value>,
        outputs: Map<String, Value>,
    ) -> Result<()>;
}

/// The persistence services one pipeline writes to
#[derive(Clone)]
pub struct Repositories {
    pub workflow_runs: Arc<dyn WorkflowRunRepository>,
    pub node_executions: Arc<dyn NodeExecutionRepository>,
    pub app_logs: Arc<dyn AppLogRepository>,
    /// Draft variables are only written when a sink is configured
    pub draft_variables: Option<Arc<dyn DraftVariableSink>>,
}

impl Repositories {
    /// Route every record kind to one store
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: WorkflowRunRepository
            + NodeExecutionRepository
            + AppLogRepository
            + DraftVariableSink
            + 'static,
    {
        Self {
            workflow_runs: store.clone(),
            node_executions: store.clone(),
            app_logs: store.clone(),
            draft_variables: Some(store),
        }
    }

    pub fn without_draft_variables(mut self) -> Self {
        self.draft_variables = None;
        self
    }
}

/// A saved draft-variable write
#[derive(Debug, Clone, PartialEq)]
pub struct DraftVariableWrite {
    pub key: DraftVariableKey,
    pub process_data: Map<String, Value>,
    pub outputs: Map<String, Value>,
}

#[derive(Debug, Default)]
struct Tables {
    runs: HashMap<String, WorkflowRun>,
    node_executions: HashMap<String, NodeExecution>,
    app_logs: Vec<WorkflowAppLog>,
    draft_variables: Vec<DraftVariableWrite>,
}

/// Process-local implementation of every persistence trait
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn runs(&self) -> Vec<WorkflowRun> {
        let mut runs: Vec<_> = self.tables.read().await.runs.values().cloned().collect();
        runs.sort_by_key(|run| run.sequence_number);
        runs
    }

    pub async fn app_logs(&self) -> Vec<WorkflowAppLog> {
        self.tables.read().await.app_logs.clone()
    }

    pub async fn draft_variables(&self) -> Vec<DraftVariableWrite> {
        self.tables.read().await.draft_variables.clone()
    }
}

#[async_trait]
impl WorkflowRunRepository for InMemoryRepository {
    async fn save(&self, run: &WorkflowRun) -> Result<()> {
        self.tables
            .write()
            .await
            .runs
            .insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<WorkflowRun>> {
        Ok(self.tables.read().await.runs.get(run_id).cloned())
    }

    async fn max_sequence_number(&self, tenant_id: &str, app_id: &str) -> Result<u64> {
        Ok(self
            .tables
            .read()
            .await
            .runs
            .values()
            .filter(|run| run.tenant_id == tenant_id && run.app_id == app_id)
            .map(|run| run.sequence_number)
            .max()
            .unwrap_or(0))
    }
}

#[async_trait]
impl NodeExecutionRepository for InMemoryRepository {
    async fn save(&self, execution: &NodeExecution) -> Result<()> {
        self.tables
            .write()
            .await
            .node_executions
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn list_by_run(&self, workflow_run_id: &str) -> Result<Vec<NodeExecution>> {
        let mut records: Vec<_> = self
            .tables
            .read()
            .await
            .node_executions
            .values()
            .filter(|record| record.workflow_run_id == workflow_run_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.index.cmp(&b.index).then(a.created_at.cmp(&b.created_at)));
        Ok(records)
    }
}

#[async_trait]
impl AppLogRepository for InMemoryRepository {
    async fn create(&self, log: &WorkflowAppLog) -> Result<()> {
        self.tables.write().await.app_logs.push(log.clone());
        Ok(())
    }
}

#[async_trait]
impl DraftVariableSink for InMemoryRepository {
    async fn save(
        &self,
        key: DraftVariableKey,
        process_data: Map<String, Value>,
        outputs: Map<String, Value>,
    ) -> Result<()> {
        self.tables
            .write()
            .await
            .draft_variables
            .push(DraftVariableWrite {
                key,
                process_data,
                outputs,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{WorkflowRunStatus, WorkflowRunTriggeredFrom};
    use chrono::Utc;

    fn run(id: &str, app_id: &str, sequence_number: u64) -> WorkflowRun {
        WorkflowRun {
            id: id.into(),
            tenant_id: "t".into(),
            app_id: app_id.into(),
            workflow_id: "wf".into(),
            sequence_number,
            triggered_from: WorkflowRunTriggeredFrom::Debugging,
            inputs: Map::new(),
            status: WorkflowRunStatus::Running,
            outputs: Map::new(),
            error: None,
            elapsed_time: 0.0,
            total_tokens: 0,
            total_steps: 0,
            exceptions_count: 0,
            created_by: "u".into(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn test_sequence_numbers_are_per_app() {
        let repo = InMemoryRepository::new();
        WorkflowRunRepository::save(&repo, &run("r1", "a", 1)).await.unwrap();
        WorkflowRunRepository::save(&repo, &run("r2", "a", 2)).await.unwrap();
        WorkflowRunRepository::save(&repo, &run("r3", "b", 1)).await.unwrap();

        assert_eq!(repo.max_sequence_number("t", "a").await.unwrap(), 2);
        assert_eq!(repo.max_sequence_number("t", "b").await.unwrap(), 1);
        assert_eq!(repo.max_sequence_number("t", "c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_save_replaces_run() {
        let repo = InMemoryRepository::new();
        let mut record = run("r1", "a", 1);
        WorkflowRunRepository::save(&repo, &record).await.unwrap();
        record.status = WorkflowRunStatus::Succeeded;
        WorkflowRunRepository::save(&repo, &record).await.unwrap();

        let stored = repo.get("r1").await.unwrap().unwrap();
        assert_eq!(stored.status, WorkflowRunStatus::Succeeded);
        assert_eq!(repo.runs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_store_backs_every_seam() {
        let store = Arc::new(InMemoryRepository::new());
        let repositories = Repositories::from_store(store.clone());
        assert!(repositories.draft_variables.is_some());
        assert!(repositories
            .without_draft_variables()
            .draft_variables
            .is_none());
    }
}
