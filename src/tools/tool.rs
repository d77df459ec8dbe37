//! The closed set of tools the reasoning step may request.
//!
//! Dispatch is an exhaustive match over [`ToolName`]; each tool has a typed
//! argument record and a typed output. Backends do the I/O.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolError;
use crate::llm::ToolDefinition;

/// Every tool the workflow knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    CreateCalendarEvent,
    CreateJiraTicket,
}

impl ToolName {
    pub const ALL: [ToolName; 2] = [Self::CreateCalendarEvent, Self::CreateJiraTicket];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "create_calendar_event" => Some(Self::CreateCalendarEvent),
            "create_jira_ticket" => Some(Self::CreateJiraTicket),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateCalendarEvent => "create_calendar_event",
            Self::CreateJiraTicket => "create_jira_ticket",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::CreateCalendarEvent => {
                "Create a calendar event with a video-call link. Use when the email \
                 proposes or confirms a meeting. The event lasts one hour from the \
                 parsed start time."
            }
            Self::CreateJiraTicket => {
                "Create a Jira task for an issue raised in the email, such as a bug, \
                 outage, or request that needs tracking."
            }
        }
    }

    pub fn parameters_schema(&self) -> Value {
        match self {
            Self::CreateCalendarEvent => serde_json::json!({
                "type": "object",
                "properties": {
                    "meeting": {
                        "type": "string",
                        "description": "Short description of the meeting, used as the event title"
                    },
                    "time_description": {
                        "type": "string",
                        "description": "When the meeting happens, e.g. 'tomorrow at 5pm' or '2025-01-10 15:00'"
                    },
                    "attendees": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Attendee email addresses"
                    },
                    "sender_email": {
                        "type": "string",
                        "description": "Email of the sender, added as an attendee"
                    }
                },
                "required": ["meeting"]
            }),
            Self::CreateJiraTicket => serde_json::json!({
                "type": "object",
                "properties": {
                    "issue": {
                        "type": "string",
                        "description": "Summary of the issue to track"
                    }
                },
                "required": ["issue"]
            }),
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.as_str().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Arguments ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEventArgs {
    pub meeting: String,
    #[serde(default)]
    pub time_description: Option<String>,
    #[serde(default)]
    pub attendees: Vec<String>,
    #[serde(default)]
    pub sender_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketArgs {
    pub issue: String,
}

/// A validated request for one tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    CreateCalendarEvent(CalendarEventArgs),
    CreateJiraTicket(TicketArgs),
}

impl ToolInvocation {
    /// Decode raw model arguments into the typed record for `tool`.
    pub fn parse(tool: ToolName, arguments: &Value) -> Result<Self, ToolError> {
        match tool {
            ToolName::CreateCalendarEvent => {
                require_str(tool, arguments, "meeting")?;
                let args: CalendarEventArgs = decode(tool, arguments)?;
                Ok(Self::CreateCalendarEvent(args))
            }
            ToolName::CreateJiraTicket => {
                require_str(tool, arguments, "issue")?;
                let args: TicketArgs = decode(tool, arguments)?;
                Ok(Self::CreateJiraTicket(args))
            }
        }
    }

    pub fn tool(&self) -> ToolName {
        match self {
            Self::CreateCalendarEvent(_) => ToolName::CreateCalendarEvent,
            Self::CreateJiraTicket(_) => ToolName::CreateJiraTicket,
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(tool: ToolName, arguments: &Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments.clone()).map_err(|e| ToolError::InvalidParameters {
        name: tool.to_string(),
        reason: e.to_string(),
    })
}

/// Extract a required non-empty string parameter.
pub fn require_str<'a>(tool: ToolName, params: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidParameters {
            name: tool.to_string(),
            reason: format!("missing '{key}' parameter"),
        })
}

// ── Outputs ─────────────────────────────────────────────────────────

/// A created calendar event, keyed the way downstream folding expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub event_summary: String,
    pub event_id: Option<String>,
    pub event_link: Option<String>,
    #[serde(default)]
    pub event_attendees: Vec<String>,
    pub event_start: Option<String>,
    pub event_end: Option<String>,
    pub event_meet_link: Option<String>,
    pub event_calendar_link: Option<String>,
}

/// A created ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: String,
    pub ticket_url: String,
}

// ── Backends ────────────────────────────────────────────────────────

#[async_trait]
pub trait CalendarBackend: Send + Sync {
    async fn create_event(&self, args: &CalendarEventArgs) -> Result<CalendarEvent, ToolError>;
}

#[async_trait]
pub trait TicketBackend: Send + Sync {
    async fn create_ticket(&self, args: &TicketArgs) -> Result<Ticket, ToolError>;
}

/// Outcome of one tool call, correlated to its request.
#[derive(Debug)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: ToolName,
    pub outcome: Result<Value, ToolError>,
}

impl ToolResult {
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// Serialized payload for the history: the success value, or `{"error": ...}`.
    pub fn to_content(&self) -> String {
        match &self.outcome {
            Ok(value) => value.to_string(),
            Err(e) => serde_json::json!({ "error": e.to_string() }).to_string(),
        }
    }
}
