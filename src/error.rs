//! Error types for mailflow.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Errors raised by a registered tool while it runs.
///
/// These never abort the tool sub-loop on their own; the loop serializes them
/// into the originating `tool_result` message and then applies the configured
/// failure policy.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Invalid parameters for tool {name}: {reason}")]
    InvalidParameters { name: String, reason: String },

    #[error("Tool {name} requires authentication")]
    AuthRequired { name: String },
}

/// Outbound notification errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },
}

/// Failure inside a single node body. Only provider calls can fail a node;
/// notifier and parse problems degrade into run warnings.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Errors that terminate a workflow run.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Node {node} failed: {source}")]
    Node {
        node: String,
        #[source]
        source: NodeError,
    },

    #[error("Router after {node} returned undeclared label '{label}'")]
    Routing { node: String, label: String },

    #[error("Unknown tool '{name}' requested (call {call_id})")]
    UnknownTool { name: String, call_id: String },

    #[error("Tool {tool} failed (call {call_id}): {reason}")]
    ToolExecution {
        tool: String,
        call_id: String,
        reason: String,
    },

    #[error("Node {name} is not part of the graph")]
    UnknownNode { name: String },

    #[error("Node {node} exceeded its visit limit of {limit}")]
    VisitLimit { node: String, limit: usize },

    #[error("Invalid graph: {0}")]
    Build(String),

    #[error("Missing required input field: {field}")]
    MissingInput { field: String },
}

impl WorkflowError {
    /// Wrap a node-body failure with the failing node's name.
    pub fn node(node: impl Into<String>, source: impl Into<NodeError>) -> Self {
        Self::Node {
            node: node.into(),
            source: source.into(),
        }
    }

    /// Short label for logging and persisted error records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Node { .. } => "node_error",
            Self::Routing { .. } => "routing_error",
            Self::UnknownTool { .. } => "unknown_tool_error",
            Self::ToolExecution { .. } => "tool_execution_error",
            Self::UnknownNode { .. } => "unknown_node",
            Self::VisitLimit { .. } => "visit_limit",
            Self::Build(_) => "build_error",
            Self::MissingInput { .. } => "missing_input",
        }
    }
}

/// Worker pool errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker pool is closed")]
    Closed,

    #[error("Job for email {email_id} was dropped before completing")]
    Dropped { email_id: String },
}
