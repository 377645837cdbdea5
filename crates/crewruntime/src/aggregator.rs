//! Derived agent/workflow statistics.
//!
//! Counters are a read model: `on_terminal` is keyed by execution id so a
//! replay never double-counts, and `rebuild` recomputes everything from the
//! stored terminal executions.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use crewcore::{AgentId, Execution, ExecutionId, ExecutionStatus, TaskRunStatus, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

/// Rolling counters shared by agent and workflow statistics
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RollingStat {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
    pub total_tokens: u64,
}

impl RollingStat {
    /// Percentage of successful executions
    pub fn success_rate(&self) -> f64 {
        if self.executions == 0 {
            return 0.0;
        }
        self.successes as f64 * 100.0 / self.executions as f64
    }

    pub fn average_duration_ms(&self) -> f64 {
        if self.executions == 0 {
            return 0.0;
        }
        self.total_duration_ms as f64 / self.executions as f64
    }

    fn add(&mut self, succeeded: Option<bool>, duration_ms: u64, tokens: u64) {
        self.executions += 1;
        match succeeded {
            Some(true) => self.successes += 1,
            Some(false) => self.failures += 1,
            None => {}
        }
        self.total_duration_ms += duration_ms;
        self.total_tokens += tokens;
    }
}

/// Per-agent statistics over terminal task runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentStat {
    pub agent_id: AgentId,
    #[serde(flatten)]
    pub totals: RollingStat,
    pub success_rate: f64,
    pub average_duration_ms: f64,
}

impl AgentStat {
    fn new(agent_id: AgentId, totals: RollingStat) -> Self {
        Self {
            agent_id,
            totals,
            success_rate: totals.success_rate(),
            average_duration_ms: totals.average_duration_ms(),
        }
    }
}

/// Per-workflow statistics over terminal executions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStat {
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    #[serde(flatten)]
    pub totals: RollingStat,
    pub success_rate: f64,
    pub average_duration_ms: f64,
}

impl WorkflowStat {
    fn new(workflow_id: WorkflowId, workflow_name: String, totals: RollingStat) -> Self {
        Self {
            workflow_id,
            workflow_name,
            totals,
            success_rate: totals.success_rate(),
            average_duration_ms: totals.average_duration_ms(),
        }
    }
}

#[derive(Default)]
struct Counters {
    applied: HashSet<ExecutionId>,
    agents: HashMap<AgentId, RollingStat>,
    workflows: HashMap<WorkflowId, (String, RollingStat)>,
}

impl Counters {
    fn apply(&mut self, execution: &Execution) -> bool {
        if !execution.is_terminal() || !self.applied.insert(execution.id) {
            return false;
        }

        for run in &execution.task_runs {
            let succeeded = match run.status {
                TaskRunStatus::Completed => true,
                TaskRunStatus::Failed => false,
                _ => continue,
            };
            self.agents.entry(run.agent_id).or_default().add(
                Some(succeeded),
                run.duration_ms().unwrap_or(0),
                run.tokens_used,
            );
        }

        let outcome = match execution.status {
            ExecutionStatus::Completed => Some(true),
            ExecutionStatus::Failed => Some(false),
            _ => None,
        };
        let entry = self
            .workflows
            .entry(execution.workflow_id)
            .or_insert_with(|| (execution.workflow_name.clone(), RollingStat::default()));
        entry.0 = execution.workflow_name.clone();
        entry.1.add(
            outcome,
            execution.duration_ms().unwrap_or(0),
            execution.tokens_used,
        );
        true
    }
}

pub struct Aggregator {
    counters: RwLock<Counters>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(Counters::default()),
        }
    }

    /// Fold a terminal execution into the counters; false when it was
    /// already counted or is not terminal.
    pub async fn on_terminal(&self, execution: &Execution) -> bool {
        let applied = self.counters.write().await.apply(execution);
        if applied {
            tracing::debug!("Aggregated execution {}", execution.id);
        }
        applied
    }

    /// Discard the counters and replay every terminal execution
    pub async fn rebuild(&self, executions: &[Execution]) {
        let mut fresh = Counters::default();
        let replayed = executions.iter().filter(|e| fresh.apply(e)).count();
        *self.counters.write().await = fresh;
        tracing::info!("Rebuilt statistics from {} terminal executions", replayed);
    }

    pub async fn agent_stat(&self, agent_id: AgentId) -> Option<AgentStat> {
        let counters = self.counters.read().await;
        counters
            .agents
            .get(&agent_id)
            .map(|totals| AgentStat::new(agent_id, *totals))
    }

    pub async fn agent_stats(&self) -> Vec<AgentStat> {
        let counters = self.counters.read().await;
        let mut stats: Vec<AgentStat> = counters
            .agents
            .iter()
            .map(|(id, totals)| AgentStat::new(*id, *totals))
            .collect();
        stats.sort_by(|a, b| {
            b.totals
                .executions
                .cmp(&a.totals.executions)
                .then(a.agent_id.cmp(&b.agent_id))
        });
        stats
    }

    pub async fn workflow_stat(&self, workflow_id: WorkflowId) -> Option<WorkflowStat> {
        let counters = self.counters.read().await;
        counters
            .workflows
            .get(&workflow_id)
            .map(|(name, totals)| WorkflowStat::new(workflow_id, name.clone(), *totals))
    }

    pub async fn workflow_stats(&self) -> Vec<WorkflowStat> {
        let counters = self.counters.read().await;
        let mut stats: Vec<WorkflowStat> = counters
            .workflows
            .iter()
            .map(|(id, (name, totals))| WorkflowStat::new(*id, name.clone(), *totals))
            .collect();
        stats.sort_by(|a, b| {
            b.totals
                .executions
                .cmp(&a.totals.executions)
                .then(a.workflow_id.cmp(&b.workflow_id))
        });
        stats
    }

    /// Agents ranked by success rate, then by volume
    pub async fn top_agents(&self, limit: usize) -> Vec<AgentStat> {
        let mut stats = self.agent_stats().await;
        stats.sort_by(|a, b| {
            b.success_rate
                .total_cmp(&a.success_rate)
                .then(b.totals.executions.cmp(&a.totals.executions))
                .then(a.agent_id.cmp(&b.agent_id))
        });
        stats.truncate(limit);
        stats
    }

    /// Dashboard summary over executions created in the last `days` days
    pub fn summarize(executions: &[Execution], now: DateTime<Utc>, days: u32) -> ExecutionSummary {
        let days = days.max(1);
        let first_day = (now - Duration::days(i64::from(days) - 1)).date_naive();
        let window: Vec<&Execution> = executions
            .iter()
            .filter(|e| e.created_at.date_naive() >= first_day && e.created_at <= now)
            .collect();

        let mut summary = ExecutionSummary {
            days,
            total: window.len(),
            ..ExecutionSummary::default()
        };

        let mut by_day: BTreeMap<NaiveDate, DayBucket> = (0..days)
            .filter_map(|offset| first_day.checked_add_days(chrono::Days::new(u64::from(offset))))
            .map(|date| (date, DayBucket::new(date)))
            .collect();
        let mut workflows: HashMap<WorkflowId, (String, RollingStat)> = HashMap::new();
        let mut errors: HashMap<&str, usize> = HashMap::new();
        let mut duration_total = 0u64;
        let mut duration_count = 0u64;

        for execution in &window {
            let bucket = by_day
                .entry(execution.created_at.date_naive())
                .or_insert_with_key(|date| DayBucket::new(*date));
            bucket.total += 1;
            match execution.status {
                ExecutionStatus::Completed => {
                    summary.completed += 1;
                    bucket.completed += 1;
                }
                ExecutionStatus::Failed => {
                    summary.failed += 1;
                    bucket.failed += 1;
                    if let Some(error) = &execution.error {
                        *errors.entry(error.as_str()).or_default() += 1;
                    }
                }
                ExecutionStatus::Cancelled => summary.cancelled += 1,
                _ => summary.active += 1,
            }
            summary.tokens_used += execution.tokens_used;
            if let Some(ms) = execution.duration_ms().filter(|_| execution.is_terminal()) {
                duration_total += ms;
                duration_count += 1;
            }

            let outcome = match execution.status {
                ExecutionStatus::Completed => Some(true),
                ExecutionStatus::Failed => Some(false),
                _ => None,
            };
            workflows
                .entry(execution.workflow_id)
                .or_insert_with(|| (execution.workflow_name.clone(), RollingStat::default()))
                .1
                .add(outcome, 0, execution.tokens_used);
        }

        if summary.total > 0 {
            summary.success_rate = summary.completed as f64 * 100.0 / summary.total as f64;
        }
        if duration_count > 0 {
            summary.average_duration_ms = duration_total as f64 / duration_count as f64;
        }
        summary.by_day = by_day.into_values().collect();

        let mut ranks: Vec<WorkflowRank> = workflows
            .into_iter()
            .map(|(workflow_id, (workflow_name, totals))| WorkflowRank {
                workflow_id,
                workflow_name,
                executions: totals.executions,
                success_rate: totals.success_rate(),
            })
            .collect();
        ranks.sort_by(|a, b| {
            b.executions
                .cmp(&a.executions)
                .then(a.workflow_name.cmp(&b.workflow_name))
        });
        ranks.truncate(5);
        summary.top_workflows = ranks;

        let mut errors: Vec<ErrorCount> = errors
            .into_iter()
            .map(|(message, count)| ErrorCount {
                message: message.to_string(),
                count,
            })
            .collect();
        errors.sort_by(|a, b| b.count.cmp(&a.count).then(a.message.cmp(&b.message)));
        errors.truncate(10);
        summary.errors = errors;

        summary
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionSummary {
    pub days: u32,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Pending, running or paused
    pub active: usize,
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub tokens_used: u64,
    pub by_day: Vec<DayBucket>,
    pub top_workflows: Vec<WorkflowRank>,
    pub errors: Vec<ErrorCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayBucket {
    pub date: NaiveDate,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

impl DayBucket {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            total: 0,
            completed: 0,
            failed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowRank {
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub executions: u64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorCount {
    pub message: String,
    pub count: usize,
}
