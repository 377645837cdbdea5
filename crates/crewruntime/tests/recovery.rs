mod common;

use chrono::Utc;
use common::{init_tracing, wait_settled, ScriptedInvoker};
use crewcore::{
    Agent, Execution, ExecutionMode, ExecutionStatus, TaskRun, TaskRunStatus, TaskSpec, Workflow,
};
use crewruntime::{CrewRuntime, FileStore, InvokerRegistry, RuntimeConfig, Store};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn runtime_over(dir: &std::path::Path, invoker: Arc<ScriptedInvoker>) -> CrewRuntime {
    let store = FileStore::open(dir).await.unwrap();
    let mut registry = InvokerRegistry::new();
    registry.register(invoker);
    CrewRuntime::new(Arc::new(store), Arc::new(registry), RuntimeConfig::default())
}

/// Persist the state a crash would leave behind: `first` done, `second` mid-flight
async fn crashed_state(store: &FileStore) -> (Execution, Execution) {
    let agent = Agent::new("Researcher", "Research analyst", "Collect sources");
    let workflow = Workflow::new("Research Pipeline", ExecutionMode::Linear)
        .with_task(TaskSpec::new("first", agent.id))
        .with_task(TaskSpec::new("second", agent.id).depends_on("first"));
    store.put_agent(&agent).await.unwrap();
    store.put_workflow(&workflow).await.unwrap();

    let now = Utc::now();
    let mut interrupted = Execution::new(&workflow, json!({}));
    interrupted.status = ExecutionStatus::Running;
    interrupted.started_at = Some(now);
    let mut done = TaskRun::new("first", agent.id, 0);
    done.status = TaskRunStatus::Completed;
    done.started_at = Some(now);
    done.completed_at = Some(now);
    done.output = Some(json!("sources"));
    done.tokens_used = 7;
    interrupted.tokens_used = 7;
    interrupted.completed_tasks = 1;
    let mut running = TaskRun::new("second", agent.id, 0);
    running.status = TaskRunStatus::Running;
    running.started_at = Some(now);
    interrupted.task_runs = vec![done.clone(), running.clone()];
    store.put_execution(&interrupted).await.unwrap();

    let mut finished = Execution::new(&workflow, json!({}));
    finished.status = ExecutionStatus::Failed;
    finished.started_at = Some(now);
    finished.completed_at = Some(now);
    finished.error = Some("task 'first' failed: boom".into());
    let mut failed = TaskRun::new("first", agent.id, 0);
    failed.status = TaskRunStatus::Failed;
    failed.completed_at = Some(now);
    let mut orphan = running.clone();
    orphan.id = uuid::Uuid::new_v4();
    finished.task_runs = vec![failed, orphan];
    store.put_execution(&finished).await.unwrap();

    (interrupted, finished)
}

#[tokio::test]
async fn test_recover_redispatches_interrupted_runs() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (interrupted, finished) = {
        let store = FileStore::open(dir.path()).await.unwrap();
        crashed_state(&store).await
    };

    let invoker = ScriptedInvoker::new();
    let runtime = runtime_over(dir.path(), invoker.clone()).await;
    let adopted = runtime.recover().await.unwrap();
    assert_eq!(adopted, 1);

    let execution = wait_settled(&runtime, interrupted.id).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.completed_tasks, 2);
    assert_eq!(execution.task_runs.len(), 2);
    assert_eq!(execution.tokens_used, 17);
    // only the interrupted task is invoked again
    let calls = invoker.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].task_id, "second");
    assert_eq!(calls[0].upstream.get("first"), Some(&json!("sources")));

    let repaired = runtime.get_execution(finished.id).await.unwrap();
    assert_eq!(repaired.status, ExecutionStatus::Failed);
    assert!(repaired.is_quiescent());
    assert_eq!(repaired.task_runs[1].status, TaskRunStatus::Cancelled);
}

#[tokio::test]
async fn test_recover_rebuilds_statistics() {
    let dir = tempfile::tempdir().unwrap();
    let (interrupted, finished) = {
        let store = FileStore::open(dir.path()).await.unwrap();
        crashed_state(&store).await
    };

    let runtime = runtime_over(dir.path(), ScriptedInvoker::new()).await;
    runtime.recover().await.unwrap();
    wait_settled(&runtime, interrupted.id).await;

    let mut executions = 0;
    for _ in 0..100 {
        executions = runtime
            .workflow_stat(finished.workflow_id)
            .await
            .map(|s| s.totals.executions)
            .unwrap_or(0);
        if executions == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(executions, 2);

    // a second recovery neither re-adopts nor double counts
    assert_eq!(runtime.recover().await.unwrap(), 0);
    let stat = runtime.workflow_stat(finished.workflow_id).await.unwrap();
    assert_eq!(stat.totals.executions, 2);
    assert_eq!(stat.totals.failures, 1);
}

#[tokio::test]
async fn test_terminal_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let agent = Agent::new("Writer", "Writer", "Write");
    let workflow = Workflow::new("Durable", ExecutionMode::Linear)
        .with_task(TaskSpec::new("write", agent.id));

    let execution_id = {
        let runtime = runtime_over(dir.path(), ScriptedInvoker::new()).await;
        runtime.create_agent(agent.clone()).await.unwrap();
        runtime.create_workflow(workflow.clone()).await.unwrap();
        let started = runtime.run(workflow.id, json!({})).await.unwrap();
        wait_settled(&runtime, started.id).await;
        started.id
    };

    let runtime = runtime_over(dir.path(), ScriptedInvoker::new()).await;
    let execution = runtime.get_execution(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.completed_at.is_some());
    assert_eq!(execution.task_runs[0].output, Some(json!({"task": "write", "iteration": 0})));
}
