//! The record threaded through one workflow run.
//!
//! Append-only collections (`tags`, message history) are private and only grow
//! through `push_*` methods. Derived fields are written once, each by a single
//! node; their setters are crate-private and refuse to overwrite.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::{ChatMessage, ToolCall};

// ── Messages ────────────────────────────────────────────────────────

/// Role tag of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    Human,
    Ai,
    ToolResult,
}

/// One entry in the message history. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    /// Text, or the JSON-serialized payload of a tool result.
    pub content: String,
    /// Originating tool, on `ToolResult` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Id of the request this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Whether a tool result carries a failure.
    #[serde(default)]
    pub is_error: bool,
    /// Tool calls requested by an `Ai` entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_name: None,
            call_id: None,
            is_error: false,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Human, content)
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Ai, content)
    }

    pub fn ai_with_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(MessageRole::Ai, content.unwrap_or_default())
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            call_id: Some(call_id.into()),
            is_error,
            ..Self::new(MessageRole::ToolResult, content)
        }
    }

    /// Provider-facing form of this entry.
    pub fn to_chat_message(&self) -> ChatMessage {
        match self.role {
            MessageRole::System => ChatMessage::system(&self.content),
            MessageRole::Human => ChatMessage::user(&self.content),
            MessageRole::Ai if self.tool_calls.is_empty() => ChatMessage::assistant(&self.content),
            MessageRole::Ai => ChatMessage::assistant_with_tool_calls(
                Some(self.content.clone()).filter(|c| !c.is_empty()),
                self.tool_calls.clone(),
            ),
            MessageRole::ToolResult => ChatMessage::tool_result(
                self.call_id.clone().unwrap_or_default(),
                self.tool_name.clone().unwrap_or_default(),
                &self.content,
            ),
        }
    }
}

// ── Derived fields ──────────────────────────────────────────────────

/// Ticket folded in from a `create_jira_ticket` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketInfo {
    pub ticket_id: String,
    pub ticket_url: String,
}

/// Event folded in from a `create_calendar_event` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventInfo {
    pub summary: String,
    pub attendees: Vec<String>,
    /// ISO-8601 start, as returned by the calendar.
    pub start: Option<String>,
    pub end: Option<String>,
    pub meet_link: Option<String>,
    pub calendar_link: Option<String>,
}

impl EventInfo {
    pub fn start_time(&self) -> Option<DateTime<FixedOffset>> {
        self.start.as_deref().and_then(parse_timestamp)
    }

    pub fn end_time(&self) -> Option<DateTime<FixedOffset>> {
        self.end.as_deref().and_then(parse_timestamp)
    }
}

/// Parse an RFC 3339 timestamp, tolerating a trailing `Z`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw.trim()).ok()
}

/// Priority of an extracted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl TaskPriority {
    /// Case-insensitive parse of `high`, `normal` or `low`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "normal" => Some(Self::Normal),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// An action item pulled out of the email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTask {
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub due_date: Option<DateTime<Utc>>,
}

/// Fields produced by nodes.
///
/// | field | writer |
/// |---|---|
/// | `alert` | `send_notification` |
/// | `model_output` | `model_call` (text answers only) |
/// | `ticket`, `event` | `store_tool_outputs` |
/// | `ai_summary` | `generate_summary` |
/// | `ai_reply` | `generate_reply` |
/// | `extracted_tasks` | `extract_tasks` |
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedFields {
    alert: Option<String>,
    model_output: Option<String>,
    ticket: Option<TicketInfo>,
    event: Option<EventInfo>,
    ai_summary: Option<String>,
    ai_reply: Option<String>,
    extracted_tasks: Option<Vec<ExtractedTask>>,
}

/// Write `value` into an empty slot. Returns `false` if the slot was taken.
fn write_once<T>(slot: &mut Option<T>, value: T) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(value);
    true
}

impl DerivedFields {
    pub fn alert(&self) -> Option<&str> {
        self.alert.as_deref()
    }

    pub fn model_output(&self) -> Option<&str> {
        self.model_output.as_deref()
    }

    pub fn ticket(&self) -> Option<&TicketInfo> {
        self.ticket.as_ref()
    }

    pub fn event(&self) -> Option<&EventInfo> {
        self.event.as_ref()
    }

    pub fn ai_summary(&self) -> Option<&str> {
        self.ai_summary.as_deref()
    }

    pub fn ai_reply(&self) -> Option<&str> {
        self.ai_reply.as_deref()
    }

    /// Tasks, or an empty slice when extraction has not run.
    pub fn extracted_tasks(&self) -> &[ExtractedTask] {
        self.extracted_tasks.as_deref().unwrap_or(&[])
    }

    pub fn tasks_extracted(&self) -> bool {
        self.extracted_tasks.is_some()
    }

    pub(crate) fn set_alert(&mut self, alert: String) -> bool {
        write_once(&mut self.alert, alert)
    }

    pub(crate) fn set_model_output(&mut self, output: String) -> bool {
        write_once(&mut self.model_output, output)
    }

    pub(crate) fn set_ticket(&mut self, ticket: TicketInfo) -> bool {
        write_once(&mut self.ticket, ticket)
    }

    pub(crate) fn set_event(&mut self, event: EventInfo) -> bool {
        write_once(&mut self.event, event)
    }

    pub(crate) fn set_ai_summary(&mut self, summary: String) -> bool {
        write_once(&mut self.ai_summary, summary)
    }

    pub(crate) fn set_ai_reply(&mut self, reply: String) -> bool {
        write_once(&mut self.ai_reply, reply)
    }

    pub(crate) fn set_extracted_tasks(&mut self, tasks: Vec<ExtractedTask>) -> bool {
        write_once(&mut self.extracted_tasks, tasks)
    }
}

// ── Workflow state ──────────────────────────────────────────────────

/// The mutable record one run threads through every node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowState {
    pub email_body: String,
    pub email_subject: Option<String>,
    pub email_from: Option<String>,
    pub email_to: Option<String>,
    tags: Vec<String>,
    messages: Vec<Message>,
    tool_call_requested: bool,
    pending_tool_calls: Vec<ToolCall>,
    derived: DerivedFields,
}

impl WorkflowState {
    pub fn new(email_body: impl Into<String>) -> Self {
        Self {
            email_body: email_body.into(),
            ..Default::default()
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.email_subject = Some(subject.into());
        self
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.email_from = Some(from.into());
        self
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.email_to = Some(to.into());
        self
    }

    /// Subject, or a placeholder for prompts.
    pub fn subject_or_default(&self) -> &str {
        self.email_subject.as_deref().unwrap_or("No subject")
    }

    // Tags

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn push_tag(&mut self, tag: impl Into<String>) {
        self.tags.push(tag.into());
    }

    // History

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// History in provider form, for the reasoning step.
    pub fn chat_history(&self) -> Vec<ChatMessage> {
        self.messages.iter().map(Message::to_chat_message).collect()
    }

    // Tool sub-loop

    pub fn tool_call_requested(&self) -> bool {
        self.tool_call_requested
    }

    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        &self.pending_tool_calls
    }

    /// Record the calls the reasoning step asked for and raise the flag.
    pub(crate) fn request_tool_calls(&mut self, calls: Vec<ToolCall>) {
        self.tool_call_requested = !calls.is_empty();
        self.pending_tool_calls = calls;
    }

    /// Hand the pending calls to the tool node.
    pub(crate) fn take_pending_tool_calls(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.pending_tool_calls)
    }

    // Derived

    pub fn derived(&self) -> &DerivedFields {
        &self.derived
    }

    pub(crate) fn derived_mut(&mut self) -> &mut DerivedFields {
        &mut self.derived
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_fields_write_once() {
        let mut derived = DerivedFields::default();
        assert!(derived.set_ai_summary("first".into()));
        assert!(!derived.set_ai_summary("second".into()));
        assert_eq!(derived.ai_summary(), Some("first"));
    }

    #[test]
    fn tags_are_membership_tested() {
        let mut state = WorkflowState::new("body");
        state.push_tag("low_priority");
        state.push_tag("urgent");
        assert!(state.has_tag("urgent"));
        assert!(!state.has_tag("urg"));
    }

    #[test]
    fn request_tool_calls_sets_flag_only_when_non_empty() {
        let mut state = WorkflowState::new("body");
        state.request_tool_calls(Vec::new());
        assert!(!state.tool_call_requested());

        state.request_tool_calls(vec![ToolCall {
            id: "c".into(),
            name: "create_jira_ticket".into(),
            arguments: serde_json::json!({}),
        }]);
        assert!(state.tool_call_requested());
        assert_eq!(state.take_pending_tool_calls().len(), 1);
        assert!(state.pending_tool_calls().is_empty());
    }

    #[test]
    fn tool_result_maps_to_chat_tool_message() {
        let msg = Message::tool_result("c1", "create_jira_ticket", "{}", false);
        let chat = msg.to_chat_message();
        assert_eq!(chat.role, crate::llm::Role::Tool);
        assert_eq!(chat.tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn event_times_parse_rfc3339() {
        let event = EventInfo {
            summary: "Sync".into(),
            attendees: vec![],
            start: Some("2025-01-10T15:00:00+05:30".into()),
            end: Some("not a time".into()),
            meet_link: None,
            calendar_link: None,
        };
        assert!(event.start_time().is_some());
        assert!(event.end_time().is_none());
    }

    #[test]
    fn task_priority_ignores_case() {
        assert_eq!(TaskPriority::parse(" HIGH"), Some(TaskPriority::High));
        assert_eq!(TaskPriority::parse("Normal"), Some(TaskPriority::Normal));
        assert_eq!(TaskPriority::parse("whenever"), None);
    }
}
