//! Execution lifecycle state machine.
//!
//! Pure transitions over one `Execution`; the scheduler serializes access to
//! it and performs the side effects (dispatch, persistence, events).

use chrono::{DateTime, Utc};
use crewcore::{
    DispatchAttempt, EngineError, Execution, ExecutionStatus, FailPolicy, Result, TaskId, TaskRun,
    TaskRunId, TaskRunStatus, Workflow,
};

use crate::readiness::{self, Ready, Snapshot, TaskState};

/// Final outcome of one task run as reported by the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Succeeded {
        output: serde_json::Value,
        tokens_used: u64,
    },
    Failed {
        reason: String,
        tokens_used: u64,
    },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskCompletion {
    pub run_id: TaskRunId,
    pub outcome: TaskOutcome,
    pub attempts: Vec<DispatchAttempt>,
}

/// Result of recording a completion
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    /// Unknown run or run already terminal
    Ignored,
    Applied {
        task_id: TaskId,
        status: TaskRunStatus,
    },
}

/// What changed during `advance`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Advance {
    pub ready: Vec<Ready>,
    pub skipped: Vec<TaskId>,
    pub finished: Option<ExecutionStatus>,
}

pub struct ExecutionMachine<'a> {
    execution: &'a mut Execution,
    workflow: &'a Workflow,
    max_parallel: usize,
}

impl<'a> ExecutionMachine<'a> {
    pub fn new(execution: &'a mut Execution, workflow: &'a Workflow, max_parallel: usize) -> Self {
        Self {
            execution,
            workflow,
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn execution(&self) -> &Execution {
        self.execution
    }

    /// Pending to running; an empty workflow completes on the spot
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.execution.status != ExecutionStatus::Pending {
            return Err(EngineError::conflict(format!(
                "execution {} is already {}",
                self.execution.id,
                self.execution.status.as_str()
            )));
        }
        self.execution.started_at = Some(now);
        if self.workflow.tasks.is_empty() {
            self.execution.status = ExecutionStatus::Completed;
            self.execution.completed_at = Some(now);
        } else {
            self.execution.status = ExecutionStatus::Running;
        }
        Ok(())
    }

    /// Skip what can never run, settle the terminal status if reached, and
    /// report the tasks cleared for dispatch. No-op unless running.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Advance {
        let mut advance = Advance::default();
        if self.execution.status != ExecutionStatus::Running {
            return advance;
        }

        loop {
            let snapshot = Snapshot::take(self.workflow, self.execution);
            let plan = readiness::plan_from(&snapshot, self.execution, self.max_parallel);

            if !plan.skip.is_empty() {
                let iteration = snapshot.iteration;
                drop(snapshot);
                for task_id in plan.skip {
                    self.push_closed_run(&task_id, iteration, TaskRunStatus::Skipped, now);
                    advance.skipped.push(task_id);
                }
                continue;
            }

            self.execution.completed_tasks = snapshot.completed();

            if let Some((status, error)) = self.verdict(&snapshot, plan.dispatch.is_empty()) {
                self.execution.status = status;
                self.execution.completed_at = Some(now);
                if self.execution.error.is_none() {
                    self.execution.error = error;
                }
                advance.finished = Some(status);
                return advance;
            }

            advance.ready = plan.dispatch;
            return advance;
        }
    }

    fn verdict(
        &self,
        snapshot: &Snapshot<'_>,
        nothing_ready: bool,
    ) -> Option<(ExecutionStatus, Option<String>)> {
        if self.workflow.settings.fail_policy == FailPolicy::FailFast {
            let failed = snapshot
                .states
                .iter()
                .filter(|(_, state)| *state == TaskState::Failed)
                .filter_map(|(task, _)| self.execution.latest_run(&task.id))
                .min_by_key(|run| run.completed_at);
            if let Some(run) = failed {
                let reason = run.error.clone().unwrap_or_else(|| "task failed".into());
                return Some((
                    ExecutionStatus::Failed,
                    Some(format!("task '{}' failed: {}", run.task_id, reason)),
                ));
            }
        }

        if snapshot
            .states
            .iter()
            .all(|(_, state)| snapshot.is_resolved(*state))
        {
            return Some((ExecutionStatus::Completed, None));
        }

        if snapshot.in_flight() == 0 && nothing_ready {
            return Some((
                ExecutionStatus::Failed,
                Some("no remaining task can become ready".into()),
            ));
        }
        None
    }

    /// Mark the given ready tasks as running, creating runs as needed
    pub fn begin_runs(&mut self, ready: &[Ready], now: DateTime<Utc>) -> Vec<TaskRun> {
        let mut started = Vec::with_capacity(ready.len());
        for item in ready {
            let reusable = item.reuse_run.and_then(|id| {
                self.execution
                    .task_runs
                    .iter()
                    .position(|r| r.id == id && r.status == TaskRunStatus::Pending)
            });
            let index = match reusable {
                Some(index) => index,
                None => {
                    let Some(task) = self.workflow.find_task(&item.task_id) else {
                        continue;
                    };
                    self.execution
                        .task_runs
                        .push(TaskRun::new(task.id.clone(), task.agent_id, item.iteration));
                    self.execution.task_runs.len() - 1
                }
            };
            let run = &mut self.execution.task_runs[index];
            run.status = TaskRunStatus::Running;
            run.started_at = Some(now);
            started.push(run.clone());
        }
        started
    }

    /// Apply a task run's final outcome. Terminal runs are sticky, so a
    /// repeated notification is ignored; a terminal execution keeps its status.
    pub fn record(&mut self, completion: TaskCompletion, now: DateTime<Utc>) -> Recorded {
        let Some(run) = self.execution.run_mut(completion.run_id) else {
            return Recorded::Ignored;
        };
        if run.status.is_terminal() {
            return Recorded::Ignored;
        }

        run.attempts.extend(completion.attempts);
        run.completed_at = Some(now);
        let tokens = match completion.outcome {
            TaskOutcome::Succeeded {
                output,
                tokens_used,
            } => {
                run.status = TaskRunStatus::Completed;
                run.output = Some(output);
                tokens_used
            }
            TaskOutcome::Failed {
                reason,
                tokens_used,
            } => {
                run.status = TaskRunStatus::Failed;
                run.error = Some(reason);
                tokens_used
            }
            TaskOutcome::Cancelled => {
                run.status = TaskRunStatus::Cancelled;
                0
            }
        };
        run.tokens_used += tokens;
        let task_id = run.task_id.clone();
        let status = run.status;

        self.execution.tokens_used += tokens;
        let completed = Snapshot::take(self.workflow, self.execution).completed();
        self.execution.completed_tasks = completed;
        Recorded::Applied { task_id, status }
    }

    /// Cancel the execution and every unfinished task; returns the runs that
    /// were in flight or queued.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<Vec<TaskRunId>> {
        if self.execution.is_terminal() {
            return Err(EngineError::conflict(format!(
                "execution {} is already {}",
                self.execution.id,
                self.execution.status.as_str()
            )));
        }

        let snapshot = Snapshot::take(self.workflow, self.execution);
        let iteration = snapshot.iteration;
        let untouched: Vec<TaskId> = snapshot
            .states
            .iter()
            .filter(|(_, state)| *state == TaskState::Untouched)
            .map(|(task, _)| task.id.clone())
            .collect();
        drop(snapshot);

        let mut interrupted = Vec::new();
        for run in self
            .execution
            .task_runs
            .iter_mut()
            .filter(|r| !r.status.is_terminal())
        {
            run.status = TaskRunStatus::Cancelled;
            run.completed_at = Some(now);
            interrupted.push(run.id);
        }
        for task_id in untouched {
            self.push_closed_run(&task_id, iteration, TaskRunStatus::Cancelled, now);
        }

        self.execution.status = ExecutionStatus::Cancelled;
        self.execution.started_at.get_or_insert(now);
        self.execution.completed_at = Some(now);
        Ok(interrupted)
    }

    /// Suspend dispatch; in-flight runs keep going and are recorded
    pub fn pause(&mut self) -> Result<()> {
        if self.execution.status != ExecutionStatus::Running {
            return Err(EngineError::conflict(format!(
                "only running executions can be paused (status: {})",
                self.execution.status.as_str()
            )));
        }
        self.execution.status = ExecutionStatus::Paused;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.execution.status != ExecutionStatus::Paused {
            return Err(EngineError::conflict(format!(
                "only paused executions can be resumed (status: {})",
                self.execution.status.as_str()
            )));
        }
        self.execution.status = ExecutionStatus::Running;
        Ok(())
    }

    /// Repair runs left mid-flight by a restart. Runs of a live execution go
    /// back to pending for redispatch; those of a finished one are cancelled.
    pub fn interrupt(&mut self, now: DateTime<Utc>) -> usize {
        let terminal = self.execution.is_terminal();
        let mut repaired = 0;
        for run in self
            .execution
            .task_runs
            .iter_mut()
            .filter(|r| !r.status.is_terminal())
        {
            if terminal {
                run.status = TaskRunStatus::Cancelled;
                run.completed_at = Some(now);
                run.error = Some("interrupted by restart".into());
                repaired += 1;
            } else if run.status == TaskRunStatus::Running {
                run.status = TaskRunStatus::Pending;
                run.started_at = None;
                repaired += 1;
            }
        }
        repaired
    }

    fn push_closed_run(
        &mut self,
        task_id: &str,
        iteration: u32,
        status: TaskRunStatus,
        now: DateTime<Utc>,
    ) {
        let Some(task) = self.workflow.find_task(task_id) else {
            return;
        };
        let mut run = TaskRun::new(task.id.clone(), task.agent_id, iteration);
        run.status = status;
        run.completed_at = Some(now);
        self.execution.task_runs.push(run);
    }
}
