//! Registry of configured tool backends.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::ToolError;
use crate::llm::ToolDefinition;
use crate::tools::tool::{
    CalendarBackend, TicketBackend, ToolInvocation, ToolName, ToolResult,
};

/// Maps each [`ToolName`] to its backend, when one is configured.
///
/// A tool without a backend is not offered to the model and resolves as unknown.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    calendar: Option<Arc<dyn CalendarBackend>>,
    tickets: Option<Arc<dyn TicketBackend>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_calendar(mut self, backend: Arc<dyn CalendarBackend>) -> Self {
        debug!("Registered tool: {}", ToolName::CreateCalendarEvent);
        self.calendar = Some(backend);
        self
    }

    pub fn with_tickets(mut self, backend: Arc<dyn TicketBackend>) -> Self {
        debug!("Registered tool: {}", ToolName::CreateJiraTicket);
        self.tickets = Some(backend);
        self
    }

    fn is_registered(&self, tool: ToolName) -> bool {
        match tool {
            ToolName::CreateCalendarEvent => self.calendar.is_some(),
            ToolName::CreateJiraTicket => self.tickets.is_some(),
        }
    }

    /// Look up a requested name. `None` if unknown or not configured.
    pub fn resolve(&self, name: &str) -> Option<ToolName> {
        ToolName::from_name(name).filter(|tool| self.is_registered(*tool))
    }

    /// Check if a tool exists.
    pub fn has(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// List registered tool names.
    pub fn list(&self) -> Vec<&'static str> {
        self.registered().map(|t| t.as_str()).collect()
    }

    /// Number of registered tools.
    pub fn count(&self) -> usize {
        self.registered().count()
    }

    fn registered(&self) -> impl Iterator<Item = ToolName> + '_ {
        ToolName::ALL
            .into_iter()
            .filter(|tool| self.is_registered(*tool))
    }

    /// Get tool definitions for LLM function calling.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.registered().map(|t| t.definition()).collect()
    }

    /// Run one call. Failures are captured in the result, never raised.
    pub async fn invoke(&self, tool: ToolName, call_id: &str, arguments: &Value) -> ToolResult {
        let outcome = match ToolInvocation::parse(tool, arguments) {
            Ok(invocation) => self.dispatch(invocation).await,
            Err(e) => Err(e),
        };
        ToolResult {
            call_id: call_id.to_string(),
            tool,
            outcome,
        }
    }

    async fn dispatch(&self, invocation: ToolInvocation) -> Result<Value, ToolError> {
        let tool = invocation.tool();
        let not_configured = || ToolError::ExecutionFailed {
            name: tool.to_string(),
            reason: "no backend configured".to_string(),
        };

        let value = match invocation {
            ToolInvocation::CreateCalendarEvent(args) => {
                let backend = self.calendar.as_ref().ok_or_else(not_configured)?;
                serde_json::to_value(backend.create_event(&args).await?)
            }
            ToolInvocation::CreateJiraTicket(args) => {
                let backend = self.tickets.as_ref().ok_or_else(not_configured)?;
                serde_json::to_value(backend.create_ticket(&args).await?)
            }
        };

        value.map_err(|e| ToolError::ExecutionFailed {
            name: tool.to_string(),
            reason: format!("could not serialize result: {e}"),
        })
    }
}
