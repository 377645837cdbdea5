use async_trait::async_trait;
use crewcore::{AgentInvoker, Invocation, InvocationContext, InvokeError};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const DEFAULT_BASE_URL: &str = "https://api.cerebras.ai/v1";

/// Connection settings for an OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl HttpSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// `CREW_LLM_BASE_URL` / `CREW_LLM_API_KEY`; None when neither is set
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("CREW_LLM_BASE_URL").ok();
        let api_key = std::env::var("CREW_LLM_API_KEY").ok().filter(|k| !k.is_empty());
        if base_url.is_none() && api_key.is_none() {
            return None;
        }
        Some(Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Invoker that sends the agent persona and task as a chat completion
pub struct HttpInvoker {
    client: reqwest::Client,
    settings: HttpSettings,
}

impl HttpInvoker {
    pub fn new(settings: HttpSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_completion_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

fn system_prompt(ctx: &InvocationContext) -> String {
    let agent = &ctx.agent;
    let mut prompt = format!(
        "You are {}, a {}.\nYour goal: {}",
        agent.name, agent.role, agent.goal
    );
    if let Some(backstory) = &agent.backstory {
        prompt.push_str("\nBackground: ");
        prompt.push_str(backstory);
    }
    if !agent.tools.is_empty() {
        prompt.push_str("\nAvailable tools: ");
        prompt.push_str(&agent.tools.join(", "));
    }
    prompt
}

fn user_prompt(ctx: &InvocationContext) -> String {
    let mut context = serde_json::Map::new();
    if !ctx.workflow_input.is_null() {
        context.insert("workflow_input".to_string(), ctx.workflow_input.clone());
    }
    if !ctx.upstream.is_empty() {
        context.insert("previous_results".to_string(), json!(ctx.upstream));
    }

    let task = ctx.input_text();
    let task = if task.is_empty() { ctx.task_name.clone() } else { task };
    if context.is_empty() {
        return task;
    }
    let context = serde_json::to_string_pretty(&context).unwrap_or_default();
    format!(
        "Context Information:\n{}\n\nTask:\n{}\n\nPlease provide a response based on the context and task requirements.",
        context, task
    )
}

/// Rate limiting and server-side failures are worth retrying
fn classify_status(status: StatusCode, body: &str) -> InvokeError {
    let message = format!("{} from model endpoint: {}", status.as_u16(), body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        InvokeError::Dispatch(message)
    } else {
        InvokeError::Task(message)
    }
}

fn classify_transport(err: reqwest::Error) -> InvokeError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        InvokeError::Dispatch(format!("model endpoint unreachable: {}", err))
    } else {
        InvokeError::Task(format!("model request failed: {}", err))
    }
}

#[async_trait]
impl AgentInvoker for HttpInvoker {
    fn name(&self) -> &str {
        "http"
    }

    async fn invoke(&self, ctx: InvocationContext) -> Result<Invocation, InvokeError> {
        let body = ChatRequest {
            model: &ctx.agent.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt(&ctx),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt(&ctx),
                },
            ],
            max_completion_tokens: ctx.agent.max_tokens,
            temperature: ctx.agent.temperature,
            top_p: ctx.agent.top_p,
        };

        ctx.events.info(format!("POST {} ({})", self.settings.completions_url(), ctx.agent.model));

        let mut request = self
            .client
            .post(self.settings.completions_url())
            .timeout(ctx.deadline)
            .json(&body);
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }

        let response = tokio::select! {
            _ = ctx.cancellation.cancelled() => return Err(InvokeError::Cancelled),
            response = request.send() => response.map_err(classify_transport)?,
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!("Model endpoint returned {} for task {}", status, ctx.task_id);
            return Err(classify_status(status, &text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| InvokeError::Task(format!("unreadable model response: {}", e)))?;
        let tokens_used = parsed.usage.map(|u| u.total_tokens).unwrap_or(0);
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| {
                InvokeError::Task("model returned no choices".to_string()).with_tokens(tokens_used)
            })?;

        ctx.events.info(format!("Response status: {}", status.as_u16()));

        Ok(Invocation::new(
            json!({
                "response": choice.message.content,
                "model": ctx.agent.model,
                "finish_reason": choice.finish_reason,
            }),
            tokens_used,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!classify_status(StatusCode::BAD_REQUEST, "bad model").is_transient());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "").is_transient());
    }

    #[test]
    fn test_completions_url_ignores_trailing_slash() {
        assert_eq!(
            HttpSettings::new("http://localhost:8080/v1/").completions_url(),
            "http://localhost:8080/v1/chat/completions"
        );
    }
}
