use crate::aggregator::{AgentStat, ExecutionSummary, WorkflowStat};
use crate::store::{MemoryStore, Store};
use crate::{Aggregator, InvokerRegistry, RuntimeConfig, Scheduler};
use chrono::Utc;
use crewcore::{
    Agent, AgentCapabilities, AgentId, AgentStatus, AgentTestRequest, AgentTestResult,
    EngineError, EntityKind, EventBus, Execution, ExecutionEvent, ExecutionId, ExecutionMetrics,
    InvocationContext, InvokeError, ListQuery, LogEntry, Page, Result, ValidationError, Workflow,
    WorkflowId, WorkflowStatus,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};

/// Main runtime: entity management, execution control and statistics
pub struct CrewRuntime {
    store: Arc<dyn Store>,
    registry: Arc<InvokerRegistry>,
    event_bus: Arc<EventBus>,
    aggregator: Arc<Aggregator>,
    scheduler: Scheduler,
    config: RuntimeConfig,
    /// Held while a run picks its version and while an update decides
    /// whether the latest version may be replaced
    workflow_locks: Mutex<HashMap<WorkflowId, Arc<Mutex<()>>>>,
}

impl CrewRuntime {
    pub fn new(store: Arc<dyn Store>, registry: Arc<InvokerRegistry>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let aggregator = Arc::new(Aggregator::new());
        let scheduler = Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&event_bus),
            Arc::clone(&aggregator),
            config.clone(),
        );
        Self {
            store,
            registry,
            event_bus,
            aggregator,
            scheduler,
            config,
            workflow_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Runtime backed by a non-durable in-process store
    pub fn in_memory(registry: Arc<InvokerRegistry>, config: RuntimeConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), registry, config)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<InvokerRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    // Agents

    pub async fn create_agent(&self, mut agent: Agent) -> Result<Agent> {
        agent.validate()?;
        if self.store.get_agent(agent.id).await?.is_some() {
            return Err(EngineError::conflict(format!("agent {} already exists", agent.id)));
        }
        let now = Utc::now();
        agent.created_at = now;
        agent.updated_at = None;
        self.store.put_agent(&agent).await?;
        tracing::info!("Created agent '{}' ({})", agent.name, agent.id);
        Ok(agent)
    }

    pub async fn get_agent(&self, id: AgentId) -> Result<Agent> {
        self.store
            .get_agent(id)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Agent, id))
    }

    pub async fn update_agent(&self, mut agent: Agent) -> Result<Agent> {
        let current = self.get_agent(agent.id).await?;
        agent.validate()?;
        agent.created_at = current.created_at;
        agent.updated_at = Some(Utc::now());
        self.store.put_agent(&agent).await?;
        Ok(agent)
    }

    pub async fn set_agent_status(&self, id: AgentId, status: AgentStatus) -> Result<Agent> {
        let mut agent = self.get_agent(id).await?;
        agent.status = status;
        agent.updated_at = Some(Utc::now());
        self.store.put_agent(&agent).await?;
        tracing::info!("Agent {} is now {}", id, status.as_str());
        Ok(agent)
    }

    pub async fn delete_agent(&self, id: AgentId) -> Result<()> {
        self.get_agent(id).await?;
        let live = self.scheduler.live_for_agent(id).await;
        if live > 0 {
            return Err(EngineError::conflict(format!(
                "agent {} is used by {} in-flight executions",
                id, live
            )));
        }
        self.store.delete_agent(id).await?;
        Ok(())
    }

    pub async fn list_agents(&self, query: &ListQuery) -> Result<Page<Agent>> {
        Ok(self.store.list_agents(query).await?)
    }

    pub async fn agent_capabilities(&self, id: AgentId) -> Result<AgentCapabilities> {
        Ok(self.get_agent(id).await?.capability_sheet())
    }

    /// Run one prompt through the agent's invoker, outside any execution.
    /// Invocation failures are reported in the result, not as errors.
    pub async fn test_agent(&self, id: AgentId, request: AgentTestRequest) -> Result<AgentTestResult> {
        let agent = self.get_agent(id).await?;
        if request.input.trim().is_empty() {
            return Err(ValidationError::field("input", "must not be empty").into());
        }
        let mut result = AgentTestResult {
            agent_id: id,
            input: request.input.clone(),
            output: None,
            duration_ms: 0,
            tokens_used: 0,
            success: false,
            error: None,
        };
        let Some(invoker) = self.registry.resolve(&agent) else {
            result.error = Some(format!("no invoker registered for model '{}'", agent.model));
            return Ok(result);
        };

        let deadline = Duration::from_millis(self.config.default_task_timeout_ms);
        let execution_id = Uuid::new_v4();
        let events = EventBus::new(16);
        let ctx = InvocationContext {
            execution_id,
            run_id: Uuid::new_v4(),
            task_id: "test".to_string(),
            task_name: "Agent test".to_string(),
            attempt: 1,
            iteration: 0,
            agent,
            input: serde_json::Value::String(request.input),
            workflow_input: request.context.unwrap_or(serde_json::Value::Null),
            upstream: BTreeMap::new(),
            deadline,
            events: events.create_emitter(execution_id, "test".to_string()),
            cancellation: CancellationToken::new(),
        };

        let started = Instant::now();
        let outcome = match tokio::time::timeout(deadline, invoker.invoke(ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(InvokeError::Timeout {
                ms: deadline.as_millis() as u64,
            }),
        };
        result.duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(invocation) => {
                result.output = Some(invocation.output);
                result.tokens_used = invocation.tokens_used;
                result.success = true;
            }
            Err(e) => {
                tracing::warn!("Test of agent {} failed: {}", id, e);
                result.tokens_used = e.tokens_used();
                result.error = Some(e.to_string());
            }
        }
        Ok(result)
    }

    // Workflows

    pub async fn create_workflow(&self, mut workflow: Workflow) -> Result<Workflow> {
        self.check_workflow(&workflow).await?;
        if self.store.get_workflow(workflow.id, None).await?.is_some() {
            return Err(EngineError::conflict(format!(
                "workflow {} already exists",
                workflow.id
            )));
        }
        let now = Utc::now();
        workflow.version = 1;
        workflow.created_at = now;
        workflow.updated_at = None;
        self.store.put_workflow(&workflow).await?;
        tracing::info!("Created workflow '{}' ({})", workflow.name, workflow.id);
        Ok(workflow)
    }

    /// A specific version, or the latest one
    pub async fn get_workflow(&self, id: WorkflowId, version: Option<u32>) -> Result<Workflow> {
        self.store
            .get_workflow(id, version)
            .await?
            .ok_or_else(|| match version {
                Some(v) => EngineError::not_found(EntityKind::Workflow, format!("{} v{}", id, v)),
                None => EngineError::not_found(EntityKind::Workflow, id),
            })
    }

    /// Replace the latest version in place, or add a new version when an
    /// execution already references it.
    pub async fn update_workflow(&self, mut workflow: Workflow) -> Result<Workflow> {
        let _guard = self.lock_workflow(workflow.id).await;
        let current = self.get_workflow(workflow.id, None).await?;
        self.check_workflow(&workflow).await?;

        let referenced = self
            .store
            .all_executions()
            .await?
            .iter()
            .any(|e| e.workflow_id == current.id && e.workflow_version == current.version);
        workflow.version = if referenced {
            current.version + 1
        } else {
            current.version
        };
        workflow.created_at = current.created_at;
        workflow.updated_at = Some(Utc::now());
        self.store.put_workflow(&workflow).await?;
        tracing::info!("Updated workflow {} to v{}", workflow.id, workflow.version);
        Ok(workflow)
    }

    pub async fn delete_workflow(&self, id: WorkflowId) -> Result<()> {
        self.get_workflow(id, None).await?;
        let live = self.scheduler.live_for_workflow(id).await;
        if live > 0 {
            return Err(EngineError::conflict(format!(
                "workflow {} has {} in-flight executions",
                id, live
            )));
        }
        self.store.delete_workflow(id).await?;
        self.workflow_locks.lock().await.remove(&id);
        Ok(())
    }

    /// Block new runs; executions already in flight are unaffected
    pub async fn pause_workflow(&self, id: WorkflowId) -> Result<Workflow> {
        self.set_workflow_status(id, WorkflowStatus::Paused).await
    }

    pub async fn resume_workflow(&self, id: WorkflowId) -> Result<Workflow> {
        self.set_workflow_status(id, WorkflowStatus::Active).await
    }

    async fn set_workflow_status(&self, id: WorkflowId, status: WorkflowStatus) -> Result<Workflow> {
        let mut workflow = self.get_workflow(id, None).await?;
        workflow.status = status;
        workflow.updated_at = Some(Utc::now());
        self.store.put_workflow(&workflow).await?;
        tracing::info!("Workflow {} is now {}", id, status.as_str());
        Ok(workflow)
    }

    pub async fn list_workflows(&self, query: &ListQuery) -> Result<Page<Workflow>> {
        Ok(self.store.list_workflows(query).await?)
    }

    async fn lock_workflow(&self, id: WorkflowId) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.workflow_locks.lock().await.entry(id).or_default());
        lock.lock_owned().await
    }

    async fn check_workflow(&self, workflow: &Workflow) -> Result<()> {
        workflow.validate()?;
        for task in &workflow.tasks {
            if self.store.get_agent(task.agent_id).await?.is_none() {
                return Err(ValidationError::UnknownAgent {
                    task: task.id.clone(),
                    agent: task.agent_id.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    // Executions

    /// Start a run of the latest workflow version
    pub async fn run(&self, workflow_id: WorkflowId, input: serde_json::Value) -> Result<Execution> {
        let _guard = self.lock_workflow(workflow_id).await;
        let workflow = self.get_workflow(workflow_id, None).await?;
        if workflow.status == WorkflowStatus::Paused {
            return Err(EngineError::conflict(format!(
                "workflow '{}' is paused",
                workflow.name
            )));
        }

        let mut agents = HashMap::new();
        for agent_id in workflow.agent_ids() {
            let agent = self.get_agent(agent_id).await?;
            if !agent.is_active() {
                return Err(EngineError::conflict(format!(
                    "agent '{}' is inactive",
                    agent.name
                )));
            }
            agents.insert(agent_id, agent);
        }

        let execution = Execution::new(&workflow, input);
        self.scheduler
            .launch(execution, Arc::new(workflow), agents)
            .await
    }

    pub async fn get_execution(&self, id: ExecutionId) -> Result<Execution> {
        self.store
            .get_execution(id)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Execution, id))
    }

    pub async fn list_executions(&self, query: &ListQuery) -> Result<Page<Execution>> {
        Ok(self.store.list_executions(query).await?)
    }

    pub async fn cancel(&self, id: ExecutionId) -> Result<Execution> {
        self.scheduler.cancel(id).await
    }

    pub async fn pause(&self, id: ExecutionId) -> Result<Execution> {
        self.scheduler.pause(id).await
    }

    pub async fn resume(&self, id: ExecutionId) -> Result<Execution> {
        self.scheduler.resume(id).await
    }

    /// Only finished executions can be removed
    pub async fn delete_execution(&self, id: ExecutionId) -> Result<()> {
        let execution = self.get_execution(id).await?;
        if !execution.is_terminal() {
            return Err(EngineError::conflict(format!(
                "execution {} is still {}",
                id,
                execution.status.as_str()
            )));
        }
        if self.scheduler.is_live(id).await {
            return Err(EngineError::conflict(format!(
                "execution {} still has task runs in flight",
                id
            )));
        }
        self.store.delete_execution(id).await?;
        Ok(())
    }

    pub async fn execution_log(&self, id: ExecutionId) -> Result<Vec<LogEntry>> {
        Ok(self.get_execution(id).await?.timeline())
    }

    pub async fn execution_metrics(&self, id: ExecutionId) -> Result<ExecutionMetrics> {
        Ok(self.get_execution(id).await?.metrics())
    }

    /// Rebuild live state from the store after a restart; returns the number
    /// of executions taken back under scheduling.
    pub async fn recover(&self) -> Result<usize> {
        let executions = self.store.all_executions().await?;
        let terminal: Vec<Execution> = executions
            .iter()
            .filter(|e| e.is_terminal())
            .cloned()
            .collect();
        self.aggregator.rebuild(&terminal).await;

        let mut adopted = 0;
        for execution in executions {
            if (execution.is_terminal() && execution.is_quiescent())
                || self.scheduler.is_live(execution.id).await
            {
                continue;
            }
            let workflow = self
                .get_workflow(execution.workflow_id, Some(execution.workflow_version))
                .await?;
            let mut agents = HashMap::new();
            for agent_id in workflow.agent_ids() {
                match self.store.get_agent(agent_id).await? {
                    Some(agent) => {
                        agents.insert(agent_id, agent);
                    }
                    None => tracing::warn!(
                        "Agent {} of execution {} no longer exists",
                        agent_id,
                        execution.id
                    ),
                }
            }
            let live = !execution.is_terminal();
            self.scheduler
                .adopt(execution, Arc::new(workflow), agents)
                .await?;
            if live {
                adopted += 1;
            }
        }
        tracing::info!("Recovered {} executions", adopted);
        Ok(adopted)
    }

    // Statistics

    pub async fn agent_stats(&self) -> Vec<AgentStat> {
        self.aggregator.agent_stats().await
    }

    pub async fn agent_stat(&self, id: AgentId) -> Option<AgentStat> {
        self.aggregator.agent_stat(id).await
    }

    pub async fn workflow_stats(&self) -> Vec<WorkflowStat> {
        self.aggregator.workflow_stats().await
    }

    pub async fn workflow_stat(&self, id: WorkflowId) -> Option<WorkflowStat> {
        self.aggregator.workflow_stat(id).await
    }

    pub async fn top_agents(&self, limit: usize) -> Vec<AgentStat> {
        self.aggregator.top_agents(limit).await
    }

    /// Dashboard summary over the last `days` days
    pub async fn summary(&self, days: u32) -> Result<ExecutionSummary> {
        let executions = self.store.all_executions().await?;
        Ok(Aggregator::summarize(&executions, Utc::now(), days))
    }
}
