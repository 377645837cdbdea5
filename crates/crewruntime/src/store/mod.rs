//! Durable entity store behind an async interface

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use crewcore::{
    Agent, AgentId, Execution, ExecutionId, ListQuery, Page, StoreError, TaskRun, TaskRunId,
    Workflow, WorkflowId,
};

/// CRUD plus filtered listing for agents, workflows, executions and task runs.
///
/// A successful return means the write is durable for this store's notion of
/// durability.
#[async_trait]
pub trait Store: Send + Sync {
    async fn put_agent(&self, agent: &Agent) -> Result<(), StoreError>;

    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>, StoreError>;

    async fn delete_agent(&self, id: AgentId) -> Result<bool, StoreError>;

    async fn list_agents(&self, query: &ListQuery) -> Result<Page<Agent>, StoreError>;

    /// Stores one version; other versions of the same workflow are untouched
    async fn put_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    /// The given version, or the latest one when `version` is `None`
    async fn get_workflow(
        &self,
        id: WorkflowId,
        version: Option<u32>,
    ) -> Result<Option<Workflow>, StoreError>;

    /// Removes every version
    async fn delete_workflow(&self, id: WorkflowId) -> Result<bool, StoreError>;

    /// Lists the latest version of each workflow
    async fn list_workflows(&self, query: &ListQuery) -> Result<Page<Workflow>, StoreError>;

    async fn put_execution(&self, execution: &Execution) -> Result<(), StoreError>;

    async fn get_execution(&self, id: ExecutionId) -> Result<Option<Execution>, StoreError>;

    async fn delete_execution(&self, id: ExecutionId) -> Result<bool, StoreError>;

    async fn list_executions(&self, query: &ListQuery) -> Result<Page<Execution>, StoreError>;

    async fn get_task_run(
        &self,
        execution_id: ExecutionId,
        run_id: TaskRunId,
    ) -> Result<Option<TaskRun>, StoreError> {
        Ok(self
            .get_execution(execution_id)
            .await?
            .and_then(|e| e.run(run_id).cloned()))
    }

    /// Inserts or replaces a run inside its execution; false if the execution is unknown
    async fn put_task_run(&self, execution_id: ExecutionId, run: &TaskRun) -> Result<bool, StoreError> {
        let Some(mut execution) = self.get_execution(execution_id).await? else {
            return Ok(false);
        };
        match execution.run_mut(run.id) {
            Some(existing) => *existing = run.clone(),
            None => execution.task_runs.push(run.clone()),
        }
        self.put_execution(&execution).await?;
        Ok(true)
    }

    async fn delete_task_run(
        &self,
        execution_id: ExecutionId,
        run_id: TaskRunId,
    ) -> Result<bool, StoreError> {
        let Some(mut execution) = self.get_execution(execution_id).await? else {
            return Ok(false);
        };
        let before = execution.task_runs.len();
        execution.task_runs.retain(|r| r.id != run_id);
        if execution.task_runs.len() == before {
            return Ok(false);
        }
        self.put_execution(&execution).await?;
        Ok(true)
    }

    /// Every execution, unpaginated, for recovery and statistics rebuilds
    async fn all_executions(&self) -> Result<Vec<Execution>, StoreError> {
        let mut all = Vec::new();
        let mut query = ListQuery::new().with_limit(crewcore::MAX_PAGE_SIZE);
        loop {
            let page = self.list_executions(&query).await?;
            all.extend(page.items);
            match page.next_cursor {
                Some(cursor) => query = query.after(cursor),
                None => break,
            }
        }
        Ok(all)
    }
}
