use super::Store;
use async_trait::async_trait;
use crewcore::{
    paginate, Agent, AgentId, Execution, ExecutionId, ListQuery, Page, StoreError, Workflow,
    WorkflowId,
};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// In-process store; contents are lost with the process
#[derive(Default)]
pub struct MemoryStore {
    agents: RwLock<HashMap<AgentId, Agent>>,
    workflows: RwLock<HashMap<WorkflowId, BTreeMap<u32, Workflow>>>,
    executions: RwLock<HashMap<ExecutionId, Execution>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version numbers held for a workflow, ascending
    pub(crate) async fn workflow_versions(&self, id: WorkflowId) -> Vec<u32> {
        self.workflows
            .read()
            .await
            .get(&id)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        self.agents.write().await.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>, StoreError> {
        Ok(self.agents.read().await.get(&id).cloned())
    }

    async fn delete_agent(&self, id: AgentId) -> Result<bool, StoreError> {
        Ok(self.agents.write().await.remove(&id).is_some())
    }

    async fn list_agents(&self, query: &ListQuery) -> Result<Page<Agent>, StoreError> {
        let agents = self.agents.read().await;
        Ok(paginate(agents.values().cloned(), query))
    }

    async fn put_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.workflows
            .write()
            .await
            .entry(workflow.id)
            .or_default()
            .insert(workflow.version, workflow.clone());
        Ok(())
    }

    async fn get_workflow(
        &self,
        id: WorkflowId,
        version: Option<u32>,
    ) -> Result<Option<Workflow>, StoreError> {
        let workflows = self.workflows.read().await;
        let Some(versions) = workflows.get(&id) else {
            return Ok(None);
        };
        let found = match version {
            Some(v) => versions.get(&v),
            None => versions.values().next_back(),
        };
        Ok(found.cloned())
    }

    async fn delete_workflow(&self, id: WorkflowId) -> Result<bool, StoreError> {
        Ok(self.workflows.write().await.remove(&id).is_some())
    }

    async fn list_workflows(&self, query: &ListQuery) -> Result<Page<Workflow>, StoreError> {
        let workflows = self.workflows.read().await;
        let latest = workflows
            .values()
            .filter_map(|versions| versions.values().next_back().cloned());
        Ok(paginate(latest, query))
    }

    async fn put_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        self.executions
            .write()
            .await
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: ExecutionId) -> Result<Option<Execution>, StoreError> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn delete_execution(&self, id: ExecutionId) -> Result<bool, StoreError> {
        Ok(self.executions.write().await.remove(&id).is_some())
    }

    async fn list_executions(&self, query: &ListQuery) -> Result<Page<Execution>, StoreError> {
        let executions = self.executions.read().await;
        Ok(paginate(executions.values().cloned(), query))
    }

    async fn all_executions(&self) -> Result<Vec<Execution>, StoreError> {
        Ok(self.executions.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewcore::{ExecutionMode, TaskRun, TaskSpec};
    use serde_json::json;

    #[tokio::test]
    async fn workflow_versions_are_kept_side_by_side() {
        let store = MemoryStore::new();
        let agent = Agent::new("Researcher", "Analyst", "Research");
        let mut workflow = Workflow::new("Content Generation Pipeline", ExecutionMode::Linear)
            .with_task(TaskSpec::new("outline", agent.id));
        store.put_workflow(&workflow).await.unwrap();

        workflow.version = 2;
        workflow.name = "Content Generation Pipeline v2".into();
        store.put_workflow(&workflow).await.unwrap();

        let latest = store.get_workflow(workflow.id, None).await.unwrap().unwrap();
        assert_eq!(latest.version, 2);
        let first = store.get_workflow(workflow.id, Some(1)).await.unwrap().unwrap();
        assert_eq!(first.name, "Content Generation Pipeline");
        assert_eq!(store.workflow_versions(workflow.id).await, vec![1, 2]);

        let page = store.list_workflows(&ListQuery::new()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].version, 2);
    }

    #[tokio::test]
    async fn task_runs_live_inside_their_execution() {
        let store = MemoryStore::new();
        let agent = Agent::new("Writer", "Writer", "Write");
        let workflow = Workflow::new("Email Automation", ExecutionMode::Linear)
            .with_task(TaskSpec::new("draft", agent.id));
        let execution = Execution::new(&workflow, json!({}));
        store.put_execution(&execution).await.unwrap();

        let run = TaskRun::new("draft", agent.id, 0);
        assert!(store.put_task_run(execution.id, &run).await.unwrap());
        assert_eq!(
            store.get_task_run(execution.id, run.id).await.unwrap(),
            Some(run.clone())
        );
        assert!(store.delete_task_run(execution.id, run.id).await.unwrap());
        assert!(store.get_task_run(execution.id, run.id).await.unwrap().is_none());
        assert!(!store
            .put_task_run(uuid::Uuid::new_v4(), &run)
            .await
            .unwrap());
    }
}
