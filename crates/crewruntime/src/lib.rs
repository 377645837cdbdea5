//! Workflow execution runtime
//!
//! This crate provides the engine that runs workflows: the entity store,
//! the per-execution state machine, mode-specific readiness, the dispatcher
//! with retry and deadlines, and the statistics aggregator.

mod aggregator;
mod config;
mod machine;
mod readiness;
mod registry;
mod retry;
mod runtime;
mod scheduler;
pub mod store;

pub use aggregator::{
    Aggregator, AgentStat, DayBucket, ErrorCount, ExecutionSummary, RollingStat, WorkflowRank,
    WorkflowStat,
};
pub use config::{ConfigError, RuntimeConfig};
pub use machine::{Advance, ExecutionMachine, Recorded, TaskCompletion, TaskOutcome};
pub use readiness::{Plan, Ready, TaskState};
pub use registry::{InvokerMetadata, InvokerRegistry};
pub use runtime::CrewRuntime;
pub use scheduler::Scheduler;
pub use store::{FileStore, MemoryStore, Store};
