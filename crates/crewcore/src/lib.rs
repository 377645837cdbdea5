//! Core abstractions for the crew orchestration engine
//!
//! This crate provides the domain records (agents, workflows, executions),
//! the error taxonomy, graph validation, the list/filter contract and the
//! agent invocation trait. Scheduling lives in `crewruntime`.

mod agent;
mod error;
pub mod events;
mod execution;
mod invoke;
mod predicate;
mod query;
mod workflow;

pub use agent::{
    Agent, AgentCapabilities, AgentId, AgentStatus, AgentTestRequest, AgentTestResult, DEFAULT_MODEL,
};
pub use error::{EngineError, EntityKind, InvokeError, StoreError, ValidationError};
pub use execution::{
    DispatchAttempt, Execution, ExecutionId, ExecutionMetrics, ExecutionStatus, LogEntry,
    LogLevel, TaskRun, TaskRunId, TaskRunStatus,
};
pub use invoke::{AgentInvoker, Invocation, InvocationContext};
pub use predicate::Predicate;
pub use query::{paginate, Cursor, Listable, ListQuery, Page, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use workflow::{
    ExecutionMode, FailPolicy, RetryPolicy, TaskId, TaskSpec, Workflow, WorkflowId,
    WorkflowSettings, WorkflowStatus,
};
pub use events::*;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
