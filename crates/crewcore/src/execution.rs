use crate::query::Listable;
use crate::{AgentId, TaskId, Workflow, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub type ExecutionId = Uuid;
pub type TaskRunId = Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl TaskRunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskRunStatus::Pending | TaskRunStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskRunStatus::Pending => "pending",
            TaskRunStatus::Running => "running",
            TaskRunStatus::Completed => "completed",
            TaskRunStatus::Failed => "failed",
            TaskRunStatus::Cancelled => "cancelled",
            TaskRunStatus::Skipped => "skipped",
        }
    }
}

/// One dispatch of a task run to its agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchAttempt {
    pub number: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One attempt record of a task definition within an execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRun {
    pub id: TaskRunId,
    pub task_id: TaskId,
    pub agent_id: AgentId,
    /// Loop iteration, zero outside loop mode
    #[serde(default)]
    pub iteration: u32,
    pub status: TaskRunStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub attempts: Vec<DispatchAttempt>,
}

impl TaskRun {
    pub fn new(task_id: impl Into<TaskId>, agent_id: AgentId, iteration: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: task_id.into(),
            agent_id,
            iteration,
            status: TaskRunStatus::Pending,
            started_at: None,
            completed_at: None,
            output: None,
            error: None,
            tokens_used: 0,
            attempts: Vec::new(),
        }
    }

    pub fn duration_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        Some((completed - started).num_milliseconds().max(0) as u64)
    }
}

/// One run of a workflow version
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub workflow_version: u32,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub input: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tokens_used: u64,
    pub total_tasks: usize,
    #[serde(default)]
    pub completed_tasks: usize,
    #[serde(default)]
    pub task_runs: Vec<TaskRun>,
    /// First unrecoverable failure
    #[serde(default)]
    pub error: Option<String>,
}

impl Execution {
    pub fn new(workflow: &Workflow, input: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            workflow_version: workflow.version,
            workflow_name: workflow.name.clone(),
            status: ExecutionStatus::Pending,
            input,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            tokens_used: 0,
            total_tasks: workflow.tasks.len(),
            completed_tasks: 0,
            task_runs: Vec::new(),
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// No task run is pending or running
    pub fn is_quiescent(&self) -> bool {
        self.task_runs.iter().all(|r| r.status.is_terminal())
    }

    pub fn run(&self, id: TaskRunId) -> Option<&TaskRun> {
        self.task_runs.iter().find(|r| r.id == id)
    }

    pub fn run_mut(&mut self, id: TaskRunId) -> Option<&mut TaskRun> {
        self.task_runs.iter_mut().find(|r| r.id == id)
    }

    /// Most recent run of a task (highest iteration, latest created)
    pub fn latest_run(&self, task_id: &str) -> Option<&TaskRun> {
        self.task_runs
            .iter()
            .filter(|r| r.task_id == task_id)
            .max_by_key(|r| r.iteration)
    }

    pub fn runs_for<'a>(&'a self, task_id: &'a str) -> impl Iterator<Item = &'a TaskRun> + 'a {
        self.task_runs.iter().filter(move |r| r.task_id == task_id)
    }

    /// Latest successful output per task
    pub fn outputs(&self) -> BTreeMap<TaskId, serde_json::Value> {
        let mut outputs = BTreeMap::new();
        for run in &self.task_runs {
            if run.status != TaskRunStatus::Completed {
                continue;
            }
            if let Some(output) = &run.output {
                outputs.insert(run.task_id.clone(), output.clone());
            }
        }
        outputs
    }

    /// Completion percentage for progress bars
    pub fn progress(&self) -> f64 {
        if self.total_tasks == 0 {
            return if self.is_terminal() { 100.0 } else { 0.0 };
        }
        self.completed_tasks as f64 * 100.0 / self.total_tasks as f64
    }

    pub fn duration_ms(&self) -> Option<u64> {
        let completed = self.completed_at?;
        let started = self.started_at.unwrap_or(self.created_at);
        Some((completed - started).num_milliseconds().max(0) as u64)
    }

    /// Run counts, token usage and timing of this execution
    pub fn metrics(&self) -> ExecutionMetrics {
        let count = |status: TaskRunStatus| {
            self.task_runs.iter().filter(|r| r.status == status).count()
        };
        let total_runs = self.task_runs.len();
        let completed_runs = count(TaskRunStatus::Completed);
        let timed: Vec<u64> = self.task_runs.iter().filter_map(TaskRun::duration_ms).collect();

        ExecutionMetrics {
            execution_id: self.id,
            total_runs,
            completed_runs,
            failed_runs: count(TaskRunStatus::Failed),
            total_tokens: self.task_runs.iter().map(|r| r.tokens_used).sum(),
            total_time_ms: self.duration_ms().unwrap_or(0),
            average_task_ms: if timed.is_empty() {
                0.0
            } else {
                timed.iter().sum::<u64>() as f64 / timed.len() as f64
            },
            success_rate: if total_runs == 0 {
                0.0
            } else {
                completed_runs as f64 * 100.0 / total_runs as f64
            },
        }
    }

    /// Chronological log derived from the execution and its task runs
    pub fn timeline(&self) -> Vec<LogEntry> {
        let mut entries = Vec::new();

        if let Some(started) = self.started_at {
            entries.push(LogEntry {
                timestamp: started,
                level: LogLevel::Info,
                task_id: None,
                message: format!("Execution of '{}' started", self.workflow_name),
            });
        }

        for run in &self.task_runs {
            for attempt in &run.attempts {
                if let Some(error) = &attempt.error {
                    entries.push(LogEntry {
                        timestamp: attempt.finished_at,
                        level: LogLevel::Warning,
                        task_id: Some(run.task_id.clone()),
                        message: format!("Attempt {} failed: {}", attempt.number, error),
                    });
                }
            }
            let timestamp = run
                .completed_at
                .or(run.started_at)
                .unwrap_or(self.created_at);
            let level = match run.status {
                TaskRunStatus::Failed => LogLevel::Error,
                TaskRunStatus::Cancelled => LogLevel::Warning,
                _ => LogLevel::Info,
            };
            let mut message = format!("Task {} {}", run.task_id, run.status.as_str());
            if let Some(error) = &run.error {
                message.push_str(": ");
                message.push_str(error);
            }
            entries.push(LogEntry {
                timestamp,
                level,
                task_id: Some(run.task_id.clone()),
                message,
            });
        }

        if let Some(completed) = self.completed_at {
            let level = match self.status {
                ExecutionStatus::Completed => LogLevel::Info,
                ExecutionStatus::Cancelled => LogLevel::Warning,
                _ => LogLevel::Error,
            };
            entries.push(LogEntry {
                timestamp: completed,
                level,
                task_id: None,
                message: format!("Execution {}", self.status.as_str()),
            });
        }

        entries.sort_by_key(|e| e.timestamp);
        entries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    pub message: String,
}

impl Listable for Execution {
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
        self.workflow_id.to_string().eq_ignore_ascii_case(kind)
    }

    fn search_fields(&self) -> Vec<&str> {
        vec![&self.workflow_name]
    }
}

/// Per-execution figures served next to the execution log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionMetrics {
    pub execution_id: ExecutionId,
    pub total_runs: usize,
    pub completed_runs: usize,
    pub failed_runs: usize,
    pub total_tokens: u64,
    pub total_time_ms: u64,
    /// Mean duration of runs that have both timestamps
    pub average_task_ms: f64,
    /// Percentage of runs that completed
    pub success_rate: f64,
}
