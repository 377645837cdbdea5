use async_trait::async_trait;
use crewcore::{AgentInvoker, Invocation, InvocationContext, InvokeError};
use serde_json::json;
use std::time::Duration;

/// Offline invoker that answers with the agent's role and the task input.
///
/// Token usage is the number of whitespace-separated words in the prompt and
/// the response, so statistics stay meaningful without a model.
pub struct EchoInvoker {
    latency: Duration,
}

impl EchoInvoker {
    pub fn new() -> Self {
        Self {
            latency: Duration::ZERO,
        }
    }

    /// Simulated response time
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

impl Default for EchoInvoker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentInvoker for EchoInvoker {
    fn name(&self) -> &str {
        "echo"
    }

    async fn invoke(&self, ctx: InvocationContext) -> Result<Invocation, InvokeError> {
        ctx.events.info(format!("{} is working on '{}'", ctx.agent.name, ctx.task_name));

        if !self.latency.is_zero() {
            tokio::select! {
                _ = ctx.cancellation.cancelled() => return Err(InvokeError::Cancelled),
                _ = tokio::time::sleep(self.latency) => {}
            }
        }

        let input = ctx.input_text();
        let response = if input.is_empty() {
            format!("{}: {}", ctx.agent.role, ctx.agent.goal)
        } else {
            format!("{}: {}", ctx.agent.role, input)
        };
        let tokens = (input.split_whitespace().count() + response.split_whitespace().count()) as u64;

        ctx.events.progress(100.0, None);
        Ok(Invocation::new(
            json!({
                "response": response,
                "agent": ctx.agent.name,
                "iteration": ctx.iteration,
                "upstream": ctx.upstream,
            }),
            tokens,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewcore::{Agent, EventBus};
    use std::collections::BTreeMap;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn context(agent: Agent, input: serde_json::Value) -> InvocationContext {
        let bus = EventBus::new(16);
        let execution_id = Uuid::new_v4();
        InvocationContext {
            execution_id,
            run_id: Uuid::new_v4(),
            task_id: "draft".to_string(),
            task_name: "Draft".to_string(),
            attempt: 1,
            iteration: 0,
            agent,
            input,
            workflow_input: serde_json::Value::Null,
            upstream: BTreeMap::from([("research".to_string(), json!("three sources"))]),
            deadline: Duration::from_secs(5),
            events: bus.create_emitter(execution_id, "draft".to_string()),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_echo_answers_with_role_and_input() {
        let agent = Agent::new("Writer", "Content writer", "Write posts");
        let result = EchoInvoker::new()
            .invoke(context(agent, json!("outline the post")))
            .await
            .unwrap();

        assert_eq!(result.output["response"], "Content writer: outline the post");
        assert_eq!(result.output["upstream"]["research"], "three sources");
        assert_eq!(result.tokens_used, 8);
    }

    #[tokio::test]
    async fn test_echo_falls_back_to_goal() {
        let agent = Agent::new("Writer", "Content writer", "Write posts");
        let result = EchoInvoker::new()
            .invoke(context(agent, serde_json::Value::Null))
            .await
            .unwrap();
        assert_eq!(result.output["response"], "Content writer: Write posts");
    }

    #[tokio::test]
    async fn test_echo_observes_cancellation() {
        let agent = Agent::new("Writer", "Content writer", "Write posts");
        let ctx = context(agent, json!("slow"));
        ctx.cancellation.cancel();
        let result = EchoInvoker::new()
            .with_latency(Duration::from_secs(30))
            .invoke(ctx)
            .await;
        assert_eq!(result, Err(InvokeError::Cancelled));
    }
}
