//! Mode-specific readiness: which tasks of a running execution may be
//! dispatched next and which are permanently skipped.

use crewcore::{
    Execution, ExecutionMode, FailPolicy, TaskId, TaskRun, TaskRunId, TaskRunStatus, TaskSpec,
    Workflow,
};

/// Where a task stands within the current iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// No run yet
    Untouched,
    /// A run exists but has not been dispatched (recovered after a restart)
    Queued(TaskRunId),
    InFlight,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl TaskState {
    fn of(run: Option<&TaskRun>) -> Self {
        let Some(run) = run else {
            return TaskState::Untouched;
        };
        match run.status {
            TaskRunStatus::Pending => TaskState::Queued(run.id),
            TaskRunStatus::Running => TaskState::InFlight,
            TaskRunStatus::Completed => TaskState::Succeeded,
            TaskRunStatus::Failed => TaskState::Failed,
            TaskRunStatus::Skipped => TaskState::Skipped,
            TaskRunStatus::Cancelled => TaskState::Cancelled,
        }
    }

    pub fn is_dispatchable(&self) -> bool {
        matches!(self, TaskState::Untouched | TaskState::Queued(_))
    }
}

/// A task cleared for dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct Ready {
    pub task_id: TaskId,
    pub iteration: u32,
    /// Pending run to start instead of creating a new one
    pub reuse_run: Option<TaskRunId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub dispatch: Vec<Ready>,
    pub skip: Vec<TaskId>,
}

/// Per-task view of an execution at its current iteration
pub(crate) struct Snapshot<'a> {
    pub workflow: &'a Workflow,
    pub iteration: u32,
    pub states: Vec<(&'a TaskSpec, TaskState)>,
}

impl<'a> Snapshot<'a> {
    pub fn take(workflow: &'a Workflow, execution: &Execution) -> Self {
        let iteration = current_iteration(workflow, execution);
        let states = workflow
            .tasks
            .iter()
            .map(|task| (task, TaskState::of(run_at(execution, &task.id, iteration))))
            .collect();
        Self {
            workflow,
            iteration,
            states,
        }
    }

    pub fn state(&self, task_id: &str) -> TaskState {
        self.states
            .iter()
            .find(|(task, _)| task.id == task_id)
            .map(|(_, state)| *state)
            .unwrap_or(TaskState::Untouched)
    }

    pub fn in_flight(&self) -> usize {
        self.count(|s| s == TaskState::InFlight)
    }

    /// Succeeded plus skipped
    pub fn completed(&self) -> usize {
        self.count(|s| matches!(s, TaskState::Succeeded | TaskState::Skipped))
    }

    pub fn count(&self, pred: impl Fn(TaskState) -> bool) -> usize {
        self.states.iter().filter(|(_, s)| pred(*s)).count()
    }

    /// Nothing left to do for this task
    pub fn is_resolved(&self, state: TaskState) -> bool {
        match state {
            TaskState::Succeeded | TaskState::Skipped => true,
            TaskState::Failed => self.workflow.settings.fail_policy == FailPolicy::RouteAround,
            _ => false,
        }
    }

    fn deps_succeeded(&self, task: &TaskSpec) -> bool {
        task.depends_on
            .iter()
            .all(|dep| self.state(dep) == TaskState::Succeeded)
    }

    fn ready(&self, task: &TaskSpec, state: TaskState) -> Ready {
        Ready {
            task_id: task.id.clone(),
            iteration: self.iteration,
            reuse_run: match state {
                TaskState::Queued(id) => Some(id),
                _ => None,
            },
        }
    }
}

/// Compute the next dispatch/skip plan; at most `max_parallel` runs in flight
pub fn plan(workflow: &Workflow, execution: &Execution, max_parallel: usize) -> Plan {
    let snapshot = Snapshot::take(workflow, execution);
    plan_from(&snapshot, execution, max_parallel)
}

pub(crate) fn plan_from(snapshot: &Snapshot<'_>, execution: &Execution, max_parallel: usize) -> Plan {
    let mut plan = match &snapshot.workflow.mode {
        ExecutionMode::Linear => linear(snapshot),
        ExecutionMode::Parallel | ExecutionMode::Loop { .. } => dependency_driven(snapshot),
        ExecutionMode::Conditional => conditional(snapshot, execution),
    };
    let capacity = max_parallel.saturating_sub(snapshot.in_flight());
    plan.dispatch.truncate(capacity);
    plan
}

fn linear(snapshot: &Snapshot<'_>) -> Plan {
    let mut plan = Plan::default();
    if snapshot.in_flight() > 0 {
        return plan;
    }
    let next = snapshot
        .states
        .iter()
        .find(|(_, state)| !snapshot.is_resolved(*state));
    if let Some((task, state)) = next {
        if state.is_dispatchable() {
            plan.dispatch.push(snapshot.ready(task, *state));
        }
    }
    plan
}

fn dependency_driven(snapshot: &Snapshot<'_>) -> Plan {
    let mut plan = Plan::default();
    for (task, state) in &snapshot.states {
        if state.is_dispatchable() && snapshot.deps_succeeded(task) {
            plan.dispatch.push(snapshot.ready(task, *state));
        }
    }
    plan
}

fn conditional(snapshot: &Snapshot<'_>, execution: &Execution) -> Plan {
    let mut plan = Plan::default();
    let outputs = execution.outputs();
    for (task, state) in &snapshot.states {
        match state {
            TaskState::Untouched => {}
            // already passed its condition before being queued
            TaskState::Queued(_) => {
                plan.dispatch.push(snapshot.ready(task, *state));
                continue;
            }
            _ => continue,
        }

        let blocked = task.depends_on.iter().any(|dep| {
            let dep_state = snapshot.state(dep);
            dep_state == TaskState::Skipped
                || (dep_state == TaskState::Failed && snapshot.is_resolved(dep_state))
        });
        if blocked {
            plan.skip.push(task.id.clone());
            continue;
        }
        if !snapshot.deps_succeeded(task) {
            continue;
        }
        match &task.condition {
            Some(condition) if !condition.evaluate(&outputs) => plan.skip.push(task.id.clone()),
            _ => plan.dispatch.push(snapshot.ready(task, *state)),
        }
    }
    plan
}

/// Loop workflows advance to the next iteration once every task of the
/// current one succeeded and neither the bound nor the exit predicate holds.
fn current_iteration(workflow: &Workflow, execution: &Execution) -> u32 {
    let ExecutionMode::Loop {
        max_iterations,
        until,
    } = &workflow.mode
    else {
        return 0;
    };
    let iteration = execution
        .task_runs
        .iter()
        .map(|r| r.iteration)
        .max()
        .unwrap_or(0);
    let body_done = workflow.tasks.iter().all(|task| {
        run_at(execution, &task.id, iteration)
            .is_some_and(|run| run.status == TaskRunStatus::Completed)
    });
    if !body_done || iteration + 1 >= *max_iterations {
        return iteration;
    }
    let exit = until
        .as_ref()
        .is_some_and(|predicate| predicate.evaluate(&execution.outputs()));
    if exit {
        iteration
    } else {
        iteration + 1
    }
}

fn run_at<'e>(execution: &'e Execution, task_id: &str, iteration: u32) -> Option<&'e TaskRun> {
    execution
        .task_runs
        .iter()
        .filter(|r| r.task_id == task_id && r.iteration == iteration)
        .last()
}
