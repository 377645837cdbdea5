use std::fmt;
use thiserror::Error;

/// Kind of record an id refers to, used in not-found reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Agent,
    Workflow,
    Execution,
    TaskRun,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Agent => "Agent",
            EntityKind::Workflow => "Workflow",
            EntityKind::Execution => "Execution",
            EntityKind::TaskRun => "TaskRun",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn not_found(kind: EntityKind, id: impl ToString) -> Self {
        EngineError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        EngineError::Conflict(message.into())
    }
}

/// Failure reported by an agent invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvokeError {
    /// Transport-level failure reaching the agent; retried with backoff.
    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    /// The agent returned a domain failure; never retried.
    #[error("Task failed: {0}")]
    Task(String),

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Cancelled")]
    Cancelled,

    /// A failure after the agent already consumed tokens.
    #[error("{error}")]
    Spent {
        error: Box<InvokeError>,
        tokens_used: u64,
    },
}

impl InvokeError {
    /// Transient failures are retried by the scheduler until the retry bound.
    pub fn is_transient(&self) -> bool {
        match self {
            InvokeError::Spent { error, .. } => error.is_transient(),
            other => matches!(other, InvokeError::Dispatch(_) | InvokeError::Timeout { .. }),
        }
    }

    /// Attach the tokens the failed attempt consumed
    pub fn with_tokens(self, tokens_used: u64) -> Self {
        match self {
            InvokeError::Spent { error, tokens_used: spent } => InvokeError::Spent {
                error,
                tokens_used: spent + tokens_used,
            },
            error => InvokeError::Spent {
                error: Box::new(error),
                tokens_used,
            },
        }
    }

    pub fn tokens_used(&self) -> u64 {
        match self {
            InvokeError::Spent { tokens_used, .. } => *tokens_used,
            _ => 0,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            InvokeError::Spent { error, .. } => error.is_cancelled(),
            other => *other == InvokeError::Cancelled,
        }
    }
}

/// Malformed agent or workflow definitions, rejected at creation time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Cyclic dependency detected")]
    CyclicDependency,

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    DanglingDependency { task: String, dependency: String },

    #[error("Task '{0}' depends on itself")]
    SelfDependency(String),

    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("Task '{task}' references unknown agent {agent}")]
    UnknownAgent { task: String, agent: String },

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Invalid workflow: {0}")]
    Invalid(String),
}

impl ValidationError {
    pub fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Durability failures from the entity store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}
