use crate::{events::EventEmitter, Agent, ExecutionId, InvokeError, TaskId, TaskRunId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Capability that runs a task's input through an agent
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Identifier used for registration and logs (e.g. "echo", "http")
    fn name(&self) -> &str;

    /// Run one attempt. Must return before `ctx.deadline` elapses or observe
    /// `ctx.cancellation`; the scheduler enforces both regardless.
    async fn invoke(&self, ctx: InvocationContext) -> Result<Invocation, InvokeError>;
}

/// Everything an invoker receives for one dispatch attempt
#[derive(Clone)]
pub struct InvocationContext {
    pub execution_id: ExecutionId,
    pub run_id: TaskRunId,
    pub task_id: TaskId,
    pub task_name: String,
    /// 1-based dispatch attempt
    pub attempt: u32,
    pub iteration: u32,
    pub agent: Agent,

    /// Static task input from the workflow definition
    pub input: serde_json::Value,

    /// Input supplied when the execution was requested
    pub workflow_input: serde_json::Value,

    /// Latest outputs of the task's dependencies
    pub upstream: BTreeMap<TaskId, serde_json::Value>,

    pub deadline: Duration,

    pub events: EventEmitter,

    pub cancellation: CancellationToken,
}

impl InvocationContext {
    /// Upstream output or a missing-input failure
    pub fn require_upstream(&self, task: &str) -> Result<&serde_json::Value, InvokeError> {
        self.upstream
            .get(task)
            .ok_or_else(|| InvokeError::Task(format!("missing output of upstream task '{}'", task)))
    }

    /// Renders the task input as prompt text
    pub fn input_text(&self) -> String {
        match &self.input {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Successful result of an invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invocation {
    pub output: serde_json::Value,
    #[serde(default)]
    pub tokens_used: u64,
}

impl Invocation {
    pub fn new(output: serde_json::Value, tokens_used: u64) -> Self {
        Self {
            output,
            tokens_used,
        }
    }
}
