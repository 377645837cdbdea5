//! Scheduler/dispatcher.
//!
//! Each live execution is guarded by its own mutex (single writer per
//! execution id). Agent invocations run in spawned tasks that hold no lock;
//! their completion is the only path back into the state machine.
//!
//! Transitions are applied to a copy of the execution and swapped into the
//! live state only once the store has accepted it, so a failed write leaves
//! both in the state before the call.

use chrono::Utc;
use crewcore::{
    Agent, AgentId, DispatchAttempt, EngineError, EntityKind, EventBus, Execution,
    ExecutionEvent, ExecutionId, ExecutionStatus, InvocationContext, InvokeError, Result, TaskId,
    TaskRun, TaskRunStatus, Workflow, WorkflowId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::machine::{ExecutionMachine, Recorded, TaskCompletion, TaskOutcome};
use crate::registry::InvokerRegistry;
use crate::retry::{resolve_deadline, resolve_policy};
use crate::store::Store;
use crate::{Aggregator, RuntimeConfig};

/// In-memory state of an execution that has not settled yet
struct LiveExecution {
    execution: Mutex<Execution>,
    workflow: Arc<Workflow>,
    agents: HashMap<AgentId, Agent>,
    cancel: CancellationToken,
}

/// A run about to be handed to its agent, with the inputs captured under lock
struct Dispatch {
    execution_id: ExecutionId,
    run: TaskRun,
    upstream: BTreeMap<TaskId, serde_json::Value>,
    workflow_input: serde_json::Value,
}

/// Side effects to perform once the execution lock is released
#[derive(Default)]
struct Step {
    dispatches: Vec<Dispatch>,
    settled: Option<Execution>,
}

struct Inner {
    store: Arc<dyn Store>,
    invokers: Arc<InvokerRegistry>,
    events: Arc<EventBus>,
    aggregator: Arc<Aggregator>,
    config: RuntimeConfig,
    live: RwLock<HashMap<ExecutionId, Arc<LiveExecution>>>,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        invokers: Arc<InvokerRegistry>,
        events: Arc<EventBus>,
        aggregator: Arc<Aggregator>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                invokers,
                events,
                aggregator,
                config,
                live: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Start a pending execution and dispatch its first ready tasks.
    /// Returns the execution as persisted after the first step.
    pub async fn launch(
        &self,
        execution: Execution,
        workflow: Arc<Workflow>,
        agents: HashMap<AgentId, Agent>,
    ) -> Result<Execution> {
        let mut next = execution.clone();
        let now = Utc::now();
        ExecutionMachine::new(&mut next, &workflow, self.max_parallel(&workflow)).start(now)?;
        tracing::info!(
            "Starting execution {} of workflow '{}' v{}",
            next.id,
            next.workflow_name,
            next.workflow_version
        );
        let started = ExecutionEvent::ExecutionStarted {
            execution_id: next.id,
            workflow_id: next.workflow_id,
            timestamp: now,
        };

        if next.is_terminal() {
            self.inner.store.put_execution(&next).await?;
            self.inner.events.emit(started);
            self.emit_finished(&next);
            self.settle(&next).await;
            return Ok(next);
        }

        let id = execution.id;
        let live = Arc::new(LiveExecution {
            execution: Mutex::new(execution),
            workflow,
            agents,
            cancel: CancellationToken::new(),
        });
        let mut execution = live.execution.lock().await;
        self.inner.live.write().await.insert(id, Arc::clone(&live));
        let step = match self.step(&live, &mut execution, next, vec![started]).await {
            Ok(step) => step,
            Err(e) => {
                drop(execution);
                self.inner.live.write().await.remove(&id);
                return Err(e);
            }
        };
        let snapshot = execution.clone();
        drop(execution);
        self.finish_step(&live, step).await;
        Ok(snapshot)
    }

    /// Take over an execution loaded from the store after a restart
    pub async fn adopt(
        &self,
        mut execution: Execution,
        workflow: Arc<Workflow>,
        agents: HashMap<AgentId, Agent>,
    ) -> Result<()> {
        let repaired = ExecutionMachine::new(
            &mut execution,
            &workflow,
            self.max_parallel(&workflow),
        )
        .interrupt(Utc::now());

        if execution.is_terminal() {
            if repaired > 0 {
                tracing::warn!(
                    "Cancelled {} orphaned task runs of finished execution {}",
                    repaired,
                    execution.id
                );
                self.inner.store.put_execution(&execution).await?;
            }
            return Ok(());
        }
        if execution.status == ExecutionStatus::Pending {
            self.launch(execution, workflow, agents).await?;
            return Ok(());
        }

        tracing::info!(
            "Recovering execution {} ({}, {} task runs requeued)",
            execution.id,
            execution.status.as_str(),
            repaired
        );
        let id = execution.id;
        let live = Arc::new(LiveExecution {
            execution: Mutex::new(execution),
            workflow,
            agents,
            cancel: CancellationToken::new(),
        });
        self.inner.live.write().await.insert(id, Arc::clone(&live));

        let mut execution = live.execution.lock().await;
        let next = execution.clone();
        let step = match self.step(&live, &mut execution, next, Vec::new()).await {
            Ok(step) => step,
            Err(e) => {
                drop(execution);
                self.inner.live.write().await.remove(&id);
                return Err(e);
            }
        };
        drop(execution);
        self.finish_step(&live, step).await;
        Ok(())
    }

    pub async fn cancel(&self, id: ExecutionId) -> Result<Execution> {
        let live = self.live_or_conflict(id).await?;
        let mut execution = live.execution.lock().await;
        let now = Utc::now();
        let mut next = execution.clone();
        let interrupted =
            ExecutionMachine::new(&mut next, &live.workflow, self.max_parallel(&live.workflow))
                .cancel(now)?;
        self.inner.store.put_execution(&next).await?;
        *execution = next;
        live.cancel.cancel();
        tracing::info!(
            "Cancelled execution {} ({} task runs interrupted)",
            id,
            interrupted.len()
        );
        self.emit_finished(&execution);

        let snapshot = execution.clone();
        drop(execution);
        self.settle(&snapshot).await;
        Ok(snapshot)
    }

    pub async fn pause(&self, id: ExecutionId) -> Result<Execution> {
        let live = self.live_or_conflict(id).await?;
        let mut execution = live.execution.lock().await;
        let mut next = execution.clone();
        ExecutionMachine::new(&mut next, &live.workflow, self.max_parallel(&live.workflow))
            .pause()?;
        self.inner.store.put_execution(&next).await?;
        *execution = next;
        tracing::info!("Paused execution {}", id);
        self.inner.events.emit(ExecutionEvent::ExecutionPaused {
            execution_id: id,
            timestamp: Utc::now(),
        });
        Ok(execution.clone())
    }

    pub async fn resume(&self, id: ExecutionId) -> Result<Execution> {
        let live = self.live_or_conflict(id).await?;
        let mut execution = live.execution.lock().await;
        let mut next = execution.clone();
        ExecutionMachine::new(&mut next, &live.workflow, self.max_parallel(&live.workflow))
            .resume()?;
        let resumed = ExecutionEvent::ExecutionResumed {
            execution_id: id,
            timestamp: Utc::now(),
        };
        let step = self
            .step(&live, &mut execution, next, vec![resumed])
            .await?;
        tracing::info!("Resumed execution {}", id);
        let snapshot = execution.clone();
        drop(execution);
        self.finish_step(&live, step).await;
        Ok(snapshot)
    }

    /// Advance a live execution and start whatever became ready
    pub async fn dispatch_ready(&self, id: ExecutionId) -> Result<Vec<TaskRun>> {
        let live = self.live_or_conflict(id).await?;
        let mut execution = live.execution.lock().await;
        let next = execution.clone();
        let step = self.step(&live, &mut execution, next, Vec::new()).await?;
        drop(execution);
        let started = step.dispatches.iter().map(|d| d.run.clone()).collect();
        self.finish_step(&live, step).await;
        Ok(started)
    }

    pub async fn is_live(&self, id: ExecutionId) -> bool {
        self.inner.live.read().await.contains_key(&id)
    }

    /// Live executions running the given workflow
    pub async fn live_for_workflow(&self, workflow_id: WorkflowId) -> usize {
        self.inner
            .live
            .read()
            .await
            .values()
            .filter(|live| live.workflow.id == workflow_id)
            .count()
    }

    /// Live executions whose workflow uses the given agent
    pub async fn live_for_agent(&self, agent_id: AgentId) -> usize {
        self.inner
            .live
            .read()
            .await
            .values()
            .filter(|live| live.agents.contains_key(&agent_id))
            .count()
    }

    fn max_parallel(&self, workflow: &Workflow) -> usize {
        workflow
            .settings
            .max_parallel_tasks
            .unwrap_or(self.inner.config.max_parallel_tasks)
    }

    async fn live_or_conflict(&self, id: ExecutionId) -> Result<Arc<LiveExecution>> {
        if let Some(live) = self.inner.live.read().await.get(&id) {
            return Ok(Arc::clone(live));
        }
        match self.inner.store.get_execution(id).await? {
            Some(execution) => Err(EngineError::conflict(format!(
                "execution {} is {} and no longer scheduled",
                id,
                execution.status.as_str()
            ))),
            None => Err(EngineError::not_found(EntityKind::Execution, id)),
        }
    }

    /// Advance `next` and persist it before anything is dispatched. `current`
    /// is the locked live state; it is replaced only after the write succeeds,
    /// and `preface` is emitted ahead of the step's own events.
    async fn step(
        &self,
        live: &LiveExecution,
        current: &mut Execution,
        mut next: Execution,
        preface: Vec<ExecutionEvent>,
    ) -> Result<Step> {
        let now = Utc::now();
        let mut machine =
            ExecutionMachine::new(&mut next, &live.workflow, self.max_parallel(&live.workflow));
        let advance = machine.advance(now);
        let started = machine.begin_runs(&advance.ready, now);
        self.inner.store.put_execution(&next).await?;
        *current = next;
        let execution: &Execution = current;

        for event in preface {
            self.inner.events.emit(event);
        }

        for task_id in &advance.skipped {
            tracing::info!("Task {} skipped in execution {}", task_id, execution.id);
            self.inner.events.emit(ExecutionEvent::TaskSkipped {
                execution_id: execution.id,
                task_id: task_id.clone(),
                timestamp: now,
            });
        }

        let outputs = execution.outputs();
        let mut step = Step::default();
        for run in started {
            self.inner.events.emit(ExecutionEvent::TaskStarted {
                execution_id: execution.id,
                task_id: run.task_id.clone(),
                run_id: run.id,
                agent_id: run.agent_id,
                iteration: run.iteration,
                timestamp: now,
            });
            let upstream = match live.workflow.find_task(&run.task_id) {
                Some(task) => outputs
                    .iter()
                    .filter(|(id, _)| {
                        task.depends_on.contains(id) || (run.iteration > 0 && **id == task.id)
                    })
                    .map(|(id, v)| (id.clone(), v.clone()))
                    .collect(),
                None => BTreeMap::new(),
            };
            step.dispatches.push(Dispatch {
                execution_id: execution.id,
                run,
                upstream,
                workflow_input: execution.input.clone(),
            });
        }

        if let Some(status) = advance.finished {
            tracing::info!("Execution {} finished: {}", execution.id, status.as_str());
            self.emit_finished(execution);
        }
        if execution.is_terminal() && execution.is_quiescent() {
            step.settled = Some(execution.clone());
        }
        Ok(step)
    }

    async fn finish_step(&self, live: &Arc<LiveExecution>, step: Step) {
        for dispatch in step.dispatches {
            self.spawn_run(Arc::clone(live), dispatch);
        }
        if let Some(execution) = step.settled {
            self.settle(&execution).await;
        }
    }

    /// Drop the execution from the live set and fold it into the statistics
    async fn settle(&self, execution: &Execution) {
        self.inner.live.write().await.remove(&execution.id);
        self.inner.aggregator.on_terminal(execution).await;
    }

    fn emit_finished(&self, execution: &Execution) {
        self.inner.events.emit(ExecutionEvent::ExecutionFinished {
            execution_id: execution.id,
            status: execution.status,
            workflow_id: execution.workflow_id,
            workflow_name: execution.workflow_name.clone(),
            completed_at: execution.completed_at.unwrap_or_else(Utc::now),
        });
    }

    fn spawn_run(&self, live: Arc<LiveExecution>, dispatch: Dispatch) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let completion = scheduler.drive(&live, dispatch).await;
            scheduler.complete_durably(&live, completion).await;
        });
    }

    /// Retry `complete` with backoff until the store accepts it; the live
    /// execution cannot advance past a completion that was never recorded.
    async fn complete_durably(&self, live: &Arc<LiveExecution>, completion: TaskCompletion) {
        let policy = &self.inner.config.persist_retry;
        let mut attempt = 1;
        loop {
            match self.complete(live, completion.clone()).await {
                Ok(_) => return,
                Err(e) => {
                    attempt += 1;
                    let delay = policy.backoff(attempt);
                    tracing::error!(
                        "Failed to record completion of task run {}: {}, retrying in {}ms",
                        completion.run_id,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Invoke the agent with deadline, retry and cancellation
    async fn drive(&self, live: &LiveExecution, dispatch: Dispatch) -> TaskCompletion {
        let Dispatch {
            execution_id,
            run,
            upstream,
            workflow_input,
        } = dispatch;
        let failed = |reason: String| TaskCompletion {
            run_id: run.id,
            outcome: TaskOutcome::Failed {
                reason,
                tokens_used: 0,
            },
            attempts: Vec::new(),
        };

        let Some(task) = live.workflow.find_task(&run.task_id) else {
            return failed(format!("unknown task '{}'", run.task_id));
        };
        let Some(agent) = live.agents.get(&run.agent_id) else {
            return failed(format!("unknown agent {}", run.agent_id));
        };
        let Some(invoker) = self.inner.invokers.resolve(agent) else {
            return failed(
                InvokeError::Task(format!("no invoker registered for model '{}'", agent.model))
                    .to_string(),
            );
        };
        let policy = resolve_policy(task, agent, &self.inner.config).clone();
        let deadline = resolve_deadline(task, &live.workflow, &self.inner.config);

        let mut attempts = Vec::new();
        let mut spent = 0;
        let mut number = 0;
        loop {
            number += 1;
            let ctx = InvocationContext {
                execution_id,
                run_id: run.id,
                task_id: task.id.clone(),
                task_name: task.name.clone(),
                attempt: number,
                iteration: run.iteration,
                agent: agent.clone(),
                input: task.input.clone(),
                workflow_input: workflow_input.clone(),
                upstream: upstream.clone(),
                deadline,
                events: self.inner.events.create_emitter(execution_id, task.id.clone()),
                cancellation: live.cancel.child_token(),
            };

            let started_at = Utc::now();
            let result = tokio::select! {
                _ = live.cancel.cancelled() => Err(InvokeError::Cancelled),
                outcome = tokio::time::timeout(deadline, invoker.invoke(ctx)) => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(InvokeError::Timeout { ms: deadline.as_millis() as u64 }),
                },
            };
            attempts.push(DispatchAttempt {
                number,
                started_at,
                finished_at: Utc::now(),
                error: result.as_ref().err().map(|e| e.to_string()),
            });

            let error = match result {
                Ok(invocation) => {
                    return TaskCompletion {
                        run_id: run.id,
                        outcome: TaskOutcome::Succeeded {
                            output: invocation.output,
                            tokens_used: spent + invocation.tokens_used,
                        },
                        attempts,
                    };
                }
                Err(e) if e.is_cancelled() => {
                    return TaskCompletion {
                        run_id: run.id,
                        outcome: TaskOutcome::Cancelled,
                        attempts,
                    };
                }
                Err(e) => e,
            };
            spent += error.tokens_used();

            if !error.is_transient() || number >= policy.max_attempts {
                tracing::error!("Task {} failed after {} attempts: {}", task.id, number, error);
                return TaskCompletion {
                    run_id: run.id,
                    outcome: TaskOutcome::Failed {
                        reason: error.to_string(),
                        tokens_used: spent,
                    },
                    attempts,
                };
            }

            let delay = policy.backoff(number + 1);
            tracing::warn!(
                "Task {} attempt {} failed ({}), retrying in {}ms",
                task.id,
                number,
                error,
                delay.as_millis()
            );
            self.inner.events.emit(ExecutionEvent::TaskRetrying {
                execution_id,
                task_id: task.id.clone(),
                run_id: run.id,
                attempt: number,
                error: error.to_string(),
                delay_ms: delay.as_millis() as u64,
                timestamp: Utc::now(),
            });
            tokio::select! {
                _ = live.cancel.cancelled() => {
                    return TaskCompletion {
                        run_id: run.id,
                        outcome: TaskOutcome::Cancelled,
                        attempts,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Record a finished run and dispatch whatever it unblocked
    async fn complete(&self, live: &Arc<LiveExecution>, completion: TaskCompletion) -> Result<Recorded> {
        let run_id = completion.run_id;
        let mut execution = live.execution.lock().await;
        let now = Utc::now();
        let mut next = execution.clone();
        let recorded =
            ExecutionMachine::new(&mut next, &live.workflow, self.max_parallel(&live.workflow))
                .record(completion, now);

        let Recorded::Applied { task_id, status } = &recorded else {
            tracing::debug!("Ignoring completion of settled task run {}", run_id);
            return Ok(recorded);
        };

        let mut preface = Vec::new();
        if let Some(run) = next.run(run_id) {
            match status {
                TaskRunStatus::Completed => {
                    let duration_ms = run.duration_ms().unwrap_or(0);
                    tracing::info!("Task {} completed in {}ms", task_id, duration_ms);
                    preface.push(ExecutionEvent::TaskCompleted {
                        execution_id: next.id,
                        task_id: task_id.clone(),
                        run_id,
                        tokens_used: run.tokens_used,
                        duration_ms,
                        timestamp: now,
                    });
                }
                TaskRunStatus::Failed => {
                    preface.push(ExecutionEvent::TaskFailed {
                        execution_id: next.id,
                        task_id: task_id.clone(),
                        run_id,
                        error: run.error.clone().unwrap_or_default(),
                        timestamp: now,
                    });
                }
                _ => {}
            }
        }

        let step = self.step(live, &mut execution, next, preface).await?;
        drop(execution);
        self.finish_step(live, step).await;
        Ok(recorded)
    }
}
