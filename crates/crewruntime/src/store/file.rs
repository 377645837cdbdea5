use super::{MemoryStore, Store};
use async_trait::async_trait;
use crewcore::{
    Agent, AgentId, Execution, ExecutionId, ListQuery, Page, StoreError, Workflow, WorkflowId,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const AGENTS: &str = "agents";
const WORKFLOWS: &str = "workflows";
const EXECUTIONS: &str = "executions";

/// JSON-file store: one file per record under `root/{agents,workflows,executions}`.
///
/// Writes go to a temporary file that is then renamed over the target, so a
/// crash leaves either the old or the new record. Reads are served from an
/// in-memory copy loaded on open.
pub struct FileStore {
    root: PathBuf,
    cache: MemoryStore,
}

impl FileStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in [AGENTS, WORKFLOWS, EXECUTIONS] {
            tokio::fs::create_dir_all(root.join(dir)).await?;
        }

        let cache = MemoryStore::new();
        for agent in load_dir::<Agent>(&root.join(AGENTS)).await? {
            cache.put_agent(&agent).await?;
        }
        for workflow in load_dir::<Workflow>(&root.join(WORKFLOWS)).await? {
            cache.put_workflow(&workflow).await?;
        }
        let executions = load_dir::<Execution>(&root.join(EXECUTIONS)).await?;
        let count = executions.len();
        for execution in executions {
            cache.put_execution(&execution).await?;
        }
        tracing::info!("Opened file store at {} ({} executions)", root.display(), count);

        Ok(Self { root, cache })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn agent_path(&self, id: AgentId) -> PathBuf {
        self.root.join(AGENTS).join(format!("{}.json", id))
    }

    fn workflow_path(&self, id: WorkflowId, version: u32) -> PathBuf {
        self.root
            .join(WORKFLOWS)
            .join(format!("{}.v{}.json", id, version))
    }

    fn execution_path(&self, id: ExecutionId) -> PathBuf {
        self.root.join(EXECUTIONS).join(format!("{}.json", id))
    }
}

async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<bool, StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn load_dir<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, StoreError> {
    let mut records = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let raw = tokio::fs::read(&path).await?;
        let record = serde_json::from_slice(&raw)
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e)))?;
        records.push(record);
    }
    Ok(records)
}

#[async_trait]
impl Store for FileStore {
    async fn put_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        write_atomic(&self.agent_path(agent.id), agent).await?;
        self.cache.put_agent(agent).await
    }

    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>, StoreError> {
        self.cache.get_agent(id).await
    }

    async fn delete_agent(&self, id: AgentId) -> Result<bool, StoreError> {
        remove_if_present(&self.agent_path(id)).await?;
        self.cache.delete_agent(id).await
    }

    async fn list_agents(&self, query: &ListQuery) -> Result<Page<Agent>, StoreError> {
        self.cache.list_agents(query).await
    }

    async fn put_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        write_atomic(&self.workflow_path(workflow.id, workflow.version), workflow).await?;
        self.cache.put_workflow(workflow).await
    }

    async fn get_workflow(
        &self,
        id: WorkflowId,
        version: Option<u32>,
    ) -> Result<Option<Workflow>, StoreError> {
        self.cache.get_workflow(id, version).await
    }

    async fn delete_workflow(&self, id: WorkflowId) -> Result<bool, StoreError> {
        for version in self.cache.workflow_versions(id).await {
            remove_if_present(&self.workflow_path(id, version)).await?;
        }
        self.cache.delete_workflow(id).await
    }

    async fn list_workflows(&self, query: &ListQuery) -> Result<Page<Workflow>, StoreError> {
        self.cache.list_workflows(query).await
    }

    async fn put_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        write_atomic(&self.execution_path(execution.id), execution).await?;
        self.cache.put_execution(execution).await
    }

    async fn get_execution(&self, id: ExecutionId) -> Result<Option<Execution>, StoreError> {
        self.cache.get_execution(id).await
    }

    async fn delete_execution(&self, id: ExecutionId) -> Result<bool, StoreError> {
        remove_if_present(&self.execution_path(id)).await?;
        self.cache.delete_execution(id).await
    }

    async fn list_executions(&self, query: &ListQuery) -> Result<Page<Execution>, StoreError> {
        self.cache.list_executions(query).await
    }

    async fn all_executions(&self) -> Result<Vec<Execution>, StoreError> {
        self.cache.all_executions().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewcore::{ExecutionMode, TaskSpec};
    use serde_json::json;

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Agent::new("Email Specialist", "Email marketing", "Write campaigns");
        let workflow = Workflow::new("Email Automation", ExecutionMode::Linear)
            .with_task(TaskSpec::new("compose", agent.id));
        let execution = Execution::new(&workflow, json!({"audience": "beta"}));

        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.put_agent(&agent).await.unwrap();
            store.put_workflow(&workflow).await.unwrap();
            store.put_execution(&execution).await.unwrap();
        }

        let reopened = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get_agent(agent.id).await.unwrap(), Some(agent));
        assert_eq!(
            reopened.get_workflow(workflow.id, Some(1)).await.unwrap(),
            Some(workflow.clone())
        );
        assert_eq!(
            reopened.get_execution(execution.id).await.unwrap(),
            Some(execution.clone())
        );

        assert!(reopened.delete_workflow(workflow.id).await.unwrap());
        assert!(!reopened.workflow_path(workflow.id, 1).exists());
    }

    #[tokio::test]
    async fn interrupted_write_keeps_the_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = Agent::new("Content Writer", "Blog writer", "Draft posts");
        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.put_agent(&agent).await.unwrap();
            agent.goal = "Draft and edit posts".to_string();
            store.put_agent(&agent).await.unwrap();
            assert!(!store.agent_path(agent.id).with_extension("json.tmp").exists());
        }

        // a crash between the temp write and the rename leaves a partial temp file
        let path = dir.path().join(AGENTS).join(format!("{}.json.tmp", agent.id));
        std::fs::write(&path, b"{\"name\": \"Cont").unwrap();

        let reopened = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get_agent(agent.id).await.unwrap(), Some(agent));
    }

    #[tokio::test]
    async fn corrupt_record_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(AGENTS)).unwrap();
        std::fs::write(dir.path().join(AGENTS).join("broken.json"), b"{ not json").unwrap();

        let result = FileStore::open(dir.path()).await;
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }
}
