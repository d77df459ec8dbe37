//! Configuration types.

use std::str::FromStr;

use crate::error::ConfigError;

/// Default number of concurrent workflow runs.
const DEFAULT_WORKERS: usize = 4;

/// Default number of queued emails before `submit` applies backpressure.
const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// What the tool sub-loop does when a registered tool returns a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolFailurePolicy {
    /// Append the error result, then fail the run with `ToolExecution`.
    #[default]
    Abort,
    /// Append the error result, record a warning, and keep going.
    Record,
}

impl FromStr for ToolFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "record" => Ok(Self::Record),
            other => Err(ConfigError::InvalidValue {
                key: "MAILFLOW_TOOL_FAILURE".into(),
                message: format!("expected 'abort' or 'record', got '{other}'"),
            }),
        }
    }
}

/// User-supplied hints folded into the classification prompt.
#[derive(Debug, Clone, Default)]
pub struct ClassificationPreferences {
    pub urgent_criteria: Option<String>,
    pub high_priority_criteria: Option<String>,
}

impl ClassificationPreferences {
    pub fn from_env() -> Self {
        Self {
            urgent_criteria: non_empty_var("MAILFLOW_URGENT_CRITERIA"),
            high_priority_criteria: non_empty_var("MAILFLOW_HIGH_PRIORITY_CRITERIA"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.urgent_criteria.is_none() && self.high_priority_criteria.is_none()
    }
}

/// Workflow behaviour knobs.
#[derive(Debug, Clone, Default)]
pub struct WorkflowConfig {
    /// Behaviour on tool execution failure.
    pub tool_failure: ToolFailurePolicy,
    /// Classification hints.
    pub preferences: ClassificationPreferences,
}

impl WorkflowConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let tool_failure = match std::env::var("MAILFLOW_TOOL_FAILURE") {
            Ok(raw) => raw.parse()?,
            Err(_) => ToolFailurePolicy::default(),
        };

        Ok(Self {
            tool_failure,
            preferences: ClassificationPreferences::from_env(),
        })
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks (concurrent runs).
    pub workers: usize,
    /// Bounded queue capacity.
    pub queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl WorkerPoolConfig {
    pub fn from_env() -> Self {
        let workers = std::env::var("MAILFLOW_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_WORKERS);

        let queue_capacity = std::env::var("MAILFLOW_QUEUE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);

        Self {
            workers,
            queue_capacity,
        }
    }
}

/// Read an env var, treating empty or whitespace-only values as unset.
pub fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
