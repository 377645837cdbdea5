use crate::query::Listable;
use crate::{AgentId, Predicate, ValidationError};
use chrono::{DateTime, Utc};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use uuid::Uuid;

pub type WorkflowId = Uuid;
pub type TaskId = String;

const MAX_NAME_LEN: usize = 200;

/// Versioned, named task graph with a declared execution mode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    #[serde(default = "Uuid::new_v4")]
    pub id: WorkflowId,
    #[serde(default = "first_version")]
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: WorkflowStatus,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub settings: WorkflowSettings,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn first_version() -> u32 {
    1
}

impl Workflow {
    pub fn new(name: impl Into<String>, mode: ExecutionMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            version: 1,
            name: name.into(),
            description: None,
            status: WorkflowStatus::Draft,
            mode,
            tasks: Vec::new(),
            settings: WorkflowSettings::default(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_fail_policy(mut self, policy: FailPolicy) -> Self {
        self.settings.fail_policy = policy;
        self
    }

    pub fn add_task(&mut self, task: TaskSpec) -> TaskId {
        let id = task.id.clone();
        self.tasks.push(task);
        id
    }

    pub fn find_task(&self, id: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Position of a task in declared order
    pub fn task_index(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    pub fn agent_ids(&self) -> HashSet<AgentId> {
        self.tasks.iter().map(|t| t.agent_id).collect()
    }

    /// Structural validation: unique ids, known dependencies, acyclic graph,
    /// and mode-specific rules. Agent existence is checked by the runtime.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let name = self.name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(ValidationError::field(
                "workflow.name",
                format!("must be 1..={} characters", MAX_NAME_LEN),
            ));
        }

        let mut seen = HashSet::new();
        for task in &self.tasks {
            if task.id.trim().is_empty() {
                return Err(ValidationError::field("task.id", "must not be empty"));
            }
            if !seen.insert(task.id.as_str()) {
                return Err(ValidationError::DuplicateTask(task.id.clone()));
            }
        }

        for task in &self.tasks {
            for dep in &task.depends_on {
                if dep == &task.id {
                    return Err(ValidationError::SelfDependency(task.id.clone()));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(ValidationError::DanglingDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            if let Some(policy) = &task.retry_policy {
                policy.validate(&format!("task '{}' retry_policy", task.id))?;
            }
            if task.timeout_ms == Some(0) {
                return Err(ValidationError::field(
                    format!("task '{}' timeout_ms", task.id),
                    "must be positive",
                ));
            }
        }

        self.check_acyclic()?;
        self.check_mode_rules()
    }

    fn check_acyclic(&self) -> Result<(), ValidationError> {
        let mut graph = DiGraph::<&str, ()>::new();
        let mut index = HashMap::new();

        for task in &self.tasks {
            index.insert(task.id.as_str(), graph.add_node(task.id.as_str()));
        }
        for task in &self.tasks {
            for dep in &task.depends_on {
                graph.add_edge(index[dep.as_str()], index[task.id.as_str()], ());
            }
        }

        if toposort(&graph, None).is_err() {
            return Err(ValidationError::CyclicDependency);
        }
        Ok(())
    }

    fn check_mode_rules(&self) -> Result<(), ValidationError> {
        if self.settings.fail_policy == FailPolicy::RouteAround
            && !matches!(self.mode, ExecutionMode::Conditional)
        {
            return Err(ValidationError::Invalid(format!(
                "fail policy route_around requires conditional mode, got {}",
                self.mode.as_str()
            )));
        }
        if self.settings.max_parallel_tasks == Some(0) {
            return Err(ValidationError::field(
                "settings.max_parallel_tasks",
                "must be positive",
            ));
        }

        for (position, task) in self.tasks.iter().enumerate() {
            if task.condition.is_some() && !matches!(self.mode, ExecutionMode::Conditional) {
                return Err(ValidationError::Invalid(format!(
                    "task '{}' declares a condition but mode is {}",
                    task.id,
                    self.mode.as_str()
                )));
            }
            if let Some(condition) = &task.condition {
                for referenced in condition.referenced_tasks() {
                    if !task.depends_on.iter().any(|d| d == referenced) {
                        return Err(ValidationError::Invalid(format!(
                            "condition of task '{}' reads '{}' which is not a dependency",
                            task.id, referenced
                        )));
                    }
                }
            }
            if matches!(self.mode, ExecutionMode::Linear) {
                for dep in &task.depends_on {
                    let dep_position = self.task_index(dep).unwrap_or(usize::MAX);
                    if dep_position > position {
                        return Err(ValidationError::Invalid(format!(
                            "linear task '{}' depends on later task '{}'",
                            task.id, dep
                        )));
                    }
                }
            }
        }

        if let ExecutionMode::Loop {
            max_iterations,
            until,
        } = &self.mode
        {
            if *max_iterations == 0 {
                return Err(ValidationError::field(
                    "mode.max_iterations",
                    "must be at least 1",
                ));
            }
            if let Some(until) = until {
                for referenced in until.referenced_tasks() {
                    if self.find_task(referenced).is_none() {
                        return Err(ValidationError::Invalid(format!(
                            "loop exit predicate reads unknown task '{}'",
                            referenced
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Node of a workflow's task graph, bound to exactly one agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSpec {
    pub id: TaskId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub agent_id: AgentId,
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    #[serde(default)]
    pub input: serde_json::Value,
    /// Readiness guard, conditional mode only
    #[serde(default)]
    pub condition: Option<Predicate>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl TaskSpec {
    pub fn new(id: impl Into<String>, agent_id: AgentId) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            agent_id,
            depends_on: Vec::new(),
            input: serde_json::Value::Null,
            condition: None,
            retry_policy: None,
            timeout_ms: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    pub fn depends_on(mut self, task: impl Into<String>) -> Self {
        self.depends_on.push(task.into());
        self
    }

    pub fn with_condition(mut self, condition: Predicate) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, delay_ms: u64) -> Self {
        self.retry_policy = Some(RetryPolicy {
            max_attempts,
            delay_ms,
            ..RetryPolicy::default()
        });
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// How a workflow's tasks become ready
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One task at a time, in declared order
    #[default]
    Linear,
    /// Every task whose dependencies succeeded runs concurrently
    Parallel,
    /// Like parallel, with per-task conditions over upstream outputs
    Conditional,
    /// The task graph is re-run, one TaskRun per task per iteration, until
    /// the bound is reached or the exit predicate holds after an iteration
    Loop {
        max_iterations: u32,
        #[serde(default)]
        until: Option<Predicate>,
    },
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Linear => "linear",
            ExecutionMode::Parallel => "parallel",
            ExecutionMode::Conditional => "conditional",
            ExecutionMode::Loop { .. } => "loop",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Active,
    /// Blocks new runs; executions already in flight continue
    Paused,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "draft",
            WorkflowStatus::Active => "active",
            WorkflowStatus::Paused => "paused",
        }
    }
}

/// Retry policy for task dispatch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> u64 {
    60_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff_multiplier: default_multiplier(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `next_attempt` (2-based: the first retry waits `delay_ms`)
    pub fn backoff(&self, next_attempt: u32) -> Duration {
        let exponent = next_attempt.saturating_sub(2) as i32;
        let ms = self.delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(ms.min(self.max_delay_ms as f64).max(0.0) as u64)
    }

    pub fn validate(&self, field: &str) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::field(field, "max_attempts must be at least 1"));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(ValidationError::field(field, "backoff_multiplier must be >= 1.0"));
        }
        Ok(())
    }
}

/// Per-workflow execution settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSettings {
    #[serde(default)]
    pub fail_policy: FailPolicy,
    #[serde(default)]
    pub max_parallel_tasks: Option<usize>,
    #[serde(default)]
    pub task_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailPolicy {
    /// First unrecoverable task failure fails the execution
    #[default]
    FailFast,
    /// Failed branches are skipped and the rest of the graph continues
    RouteAround,
}

impl Listable for Workflow {
    fn list_id(&self) -> Uuid {
        self.id
    }

    fn listed_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn status_label(&self) -> &str {
        self.status.as_str()
    }

    fn matches_kind(&self, kind: &str) -> bool {
        self.mode.as_str().eq_ignore_ascii_case(kind)
    }

    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.name.as_str()];
        if let Some(description) = &self.description {
            fields.push(description);
        }
        fields
    }
}
