#![allow(dead_code)]

use async_trait::async_trait;
use crewcore::{
    Agent, AgentInvoker, Execution, ExecutionId, Invocation, InvocationContext, InvokeError,
    TaskId,
};
use crewruntime::{CrewRuntime, InvokerRegistry, RuntimeConfig};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

/// One observed dispatch attempt
#[derive(Debug, Clone)]
pub struct Call {
    pub task_id: TaskId,
    pub attempt: u32,
    pub iteration: u32,
    pub upstream: BTreeMap<TaskId, serde_json::Value>,
}

/// Invoker that replays scripted results per task and records every call.
///
/// Tasks without a script succeed with `{"task": id, "iteration": n}`.
#[derive(Default)]
pub struct ScriptedInvoker {
    scripts: Mutex<HashMap<TaskId, VecDeque<Result<Invocation, InvokeError>>>>,
    delays: Mutex<HashMap<TaskId, Duration>>,
    hanging: Mutex<HashSet<TaskId>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedInvoker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, task: &str, result: Result<Invocation, InvokeError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(task.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn succeed_with(&self, task: &str, output: serde_json::Value) {
        self.script(task, Ok(Invocation::new(output, 10)));
    }

    pub fn delay(&self, task: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(task.to_string(), delay);
    }

    /// The task never returns on its own; only cancellation ends it
    pub fn hang(&self, task: &str) {
        self.hanging.lock().unwrap().insert(task.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, task: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.task_id == task).collect()
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, ctx: InvocationContext) -> Result<Invocation, InvokeError> {
        self.calls.lock().unwrap().push(Call {
            task_id: ctx.task_id.clone(),
            attempt: ctx.attempt,
            iteration: ctx.iteration,
            upstream: ctx.upstream.clone(),
        });

        if self.hanging.lock().unwrap().contains(&ctx.task_id) {
            ctx.cancellation.cancelled().await;
            return Err(InvokeError::Cancelled);
        }
        let delay = self.delays.lock().unwrap().get(&ctx.task_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&ctx.task_id)
            .and_then(|queue| queue.pop_front());
        scripted.unwrap_or_else(|| {
            Ok(Invocation::new(
                json!({"task": ctx.task_id, "iteration": ctx.iteration}),
                10,
            ))
        })
    }
}

pub fn runtime_with(invoker: Arc<ScriptedInvoker>) -> CrewRuntime {
    let mut registry = InvokerRegistry::new();
    registry.register(invoker);
    CrewRuntime::in_memory(Arc::new(registry), RuntimeConfig::default())
}

pub async fn agent(runtime: &CrewRuntime, name: &str) -> Agent {
    runtime
        .create_agent(Agent::new(name, format!("{} role", name), format!("{} goal", name)))
        .await
        .unwrap()
}

/// Poll until the execution is terminal with nothing in flight
pub async fn wait_settled(runtime: &CrewRuntime, id: ExecutionId) -> Execution {
    for _ in 0..500 {
        let execution = runtime.get_execution(id).await.unwrap();
        if execution.is_terminal() && execution.is_quiescent() {
            return execution;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution {} did not settle", id);
}

/// Poll until `check` holds for the stored execution
pub async fn wait_until(
    runtime: &CrewRuntime,
    id: ExecutionId,
    check: impl Fn(&Execution) -> bool,
) -> Execution {
    for _ in 0..500 {
        let execution = runtime.get_execution(id).await.unwrap();
        if check(&execution) {
            return execution;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition on execution {} never held", id);
}
