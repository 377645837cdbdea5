use crewcore::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// In-flight task runs per execution, unless the workflow sets its own cap
    pub max_parallel_tasks: usize,
    pub event_buffer_size: usize,
    pub default_task_timeout_ms: u64,
    pub default_retry: RetryPolicy,
    /// Backoff between attempts to persist a task completion; never gives up
    pub persist_retry: RetryPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 10,
            event_buffer_size: 1000,
            default_task_timeout_ms: 300_000,
            default_retry: RetryPolicy::default(),
            persist_retry: RetryPolicy {
                delay_ms: 100,
                max_delay_ms: 5_000,
                ..RetryPolicy::default()
            },
        }
    }
}

impl RuntimeConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `CREW_*` environment overrides on top of `self`
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_number("CREW_MAX_PARALLEL_TASKS") {
            self.max_parallel_tasks = v as usize;
        }
        if let Some(v) = env_number("CREW_EVENT_BUFFER") {
            self.event_buffer_size = v as usize;
        }
        if let Some(v) = env_number("CREW_TASK_TIMEOUT_MS") {
            self.default_task_timeout_ms = v;
        }
        if let Some(v) = env_number("CREW_RETRY_ATTEMPTS") {
            self.default_retry.max_attempts = v as u32;
        }
        self
    }

    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }
}

fn env_number(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(v) if v > 0 => Some(v),
        _ => {
            tracing::warn!("Ignoring invalid {}={}", key, raw);
            None
        }
    }
}
