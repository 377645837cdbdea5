use crewcore::{Agent, RetryPolicy, TaskSpec, Workflow};
use std::time::Duration;

use crate::RuntimeConfig;

/// Task policy, else agent policy, else the runtime default
pub(crate) fn resolve_policy<'a>(
    task: &'a TaskSpec,
    agent: &'a Agent,
    config: &'a RuntimeConfig,
) -> &'a RetryPolicy {
    task.retry_policy
        .as_ref()
        .or(agent.retry_policy.as_ref())
        .unwrap_or(&config.default_retry)
}

/// Task timeout, else workflow timeout, else the runtime default
pub(crate) fn resolve_deadline(task: &TaskSpec, workflow: &Workflow, config: &RuntimeConfig) -> Duration {
    let ms = task
        .timeout_ms
        .or(workflow.settings.task_timeout_ms)
        .unwrap_or(config.default_task_timeout_ms);
    Duration::from_millis(ms)
}
