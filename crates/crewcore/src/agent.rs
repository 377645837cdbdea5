use crate::query::Listable;
use crate::workflow::RetryPolicy;
use crate::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type AgentId = Uuid;

/// Model bound to new agents when none is given.
pub const DEFAULT_MODEL: &str = "llama-4-maverick-17b-128e-instruct";

const MAX_NAME_LEN: usize = 100;
const MAX_ROLE_LEN: usize = 200;
const MAX_TOKENS_LIMIT: u32 = 32768;

/// A bound capability (model + role) that executes task definitions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    #[serde(default = "Uuid::new_v4")]
    pub id: AgentId,
    pub name: String,
    pub role: String,
    pub goal: String,
    #[serde(default)]
    pub backstory: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Overrides the runtime retry policy for every task this agent runs
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    MAX_TOKENS_LIMIT
}

fn default_temperature() -> f32 {
    0.6
}

fn default_top_p() -> f32 {
    0.9
}

impl Agent {
    pub fn new(name: impl Into<String>, role: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            role: role.into(),
            goal: goal.into(),
            backstory: None,
            model: default_model(),
            capabilities: Vec::new(),
            tools: Vec::new(),
            status: AgentStatus::Active,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            retry_policy: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_backstory(mut self, backstory: impl Into<String>) -> Self {
        self.backstory = Some(backstory.into());
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }

    pub fn capability_sheet(&self) -> AgentCapabilities {
        AgentCapabilities {
            agent_id: self.id,
            capabilities: self.capabilities.clone(),
            tools: self.tools.clone(),
            model: self.model.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let name = self.name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(ValidationError::field(
                "agent.name",
                format!("must be 1..={} characters", MAX_NAME_LEN),
            ));
        }
        let role = self.role.trim();
        if role.is_empty() || role.chars().count() > MAX_ROLE_LEN {
            return Err(ValidationError::field(
                "agent.role",
                format!("must be 1..={} characters", MAX_ROLE_LEN),
            ));
        }
        if self.goal.trim().is_empty() {
            return Err(ValidationError::field("agent.goal", "must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(ValidationError::field("agent.model", "must not be empty"));
        }
        if self.max_tokens == 0 || self.max_tokens > MAX_TOKENS_LIMIT {
            return Err(ValidationError::field(
                "agent.max_tokens",
                format!("must be 1..={}", MAX_TOKENS_LIMIT),
            ));
        }
        if let Some(policy) = &self.retry_policy {
            policy.validate("agent.retry_policy")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentCapabilities {
    pub agent_id: AgentId,
    pub capabilities: Vec<String>,
    pub tools: Vec<String>,
    pub model: String,
}

/// One ad-hoc prompt run through an agent outside any workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentTestRequest {
    pub input: String,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentTestResult {
    pub agent_id: AgentId,
    pub input: String,
    pub output: Option<serde_json::Value>,
    pub duration_ms: u64,
    pub tokens_used: u64,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Active,
    Inactive,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Inactive => "inactive",
        }
    }
}

impl Listable for Agent {
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
        self.model.eq_ignore_ascii_case(kind)
    }

    fn search_fields(&self) -> Vec<&str> {
        vec![&self.name, &self.role, &self.goal]
    }
}
