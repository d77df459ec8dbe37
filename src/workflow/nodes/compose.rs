//! Summary, reply, and task extraction.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::info;

use crate::error::WorkflowError;
use crate::llm::{ChatMessage, LlmProvider};
use crate::workflow::graph::{Node, NodeContext};
use crate::workflow::nodes::{
    EXTRACT_TASKS, GENERATE_REPLY, GENERATE_SUMMARY, complete_text, warn_if_kept,
};
use crate::workflow::state::{ExtractedTask, TaskPriority, WorkflowState};

const SUMMARY_MAX_TOKENS: u32 = 256;
const REPLY_MAX_TOKENS: u32 = 1024;
const TASKS_MAX_TOKENS: u32 = 1024;

const GENERIC_ACKNOWLEDGMENT: &str =
    "We are reviewing your message and will get back to you shortly.";

// ── Summary ─────────────────────────────────────────────────────────

fn build_summary_prompt(state: &WorkflowState) -> String {
    format!(
        "Generate a concise 1-2 sentence summary of this email:\n\n\
         Subject: {}\n\
         Body: {}\n\n\
         Focus on the main action items or key information.",
        state.subject_or_default(),
        state.email_body,
    )
}

pub struct GenerateSummary {
    llm: Arc<dyn LlmProvider>,
}

impl GenerateSummary {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Node<WorkflowState> for GenerateSummary {
    fn name(&self) -> &str {
        GENERATE_SUMMARY
    }

    async fn run(&self, state: &mut WorkflowState, ctx: &mut NodeContext) -> Result<(), WorkflowError> {
        let summary = complete_text(
            self.llm.as_ref(),
            GENERATE_SUMMARY,
            vec![ChatMessage::user(build_summary_prompt(state))],
            SUMMARY_MAX_TOKENS,
        )
        .await?;
        info!(run_id = %ctx.run_id(), chars = summary.len(), "Generated summary");
        let written = state.derived_mut().set_ai_summary(summary);
        warn_if_kept(ctx, written, "ai_summary");
        Ok(())
    }
}

// ── Reply ───────────────────────────────────────────────────────────

/// Facts the reply should mention, or the generic acknowledgment.
fn reply_context(state: &WorkflowState) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(ticket) = state.derived().ticket() {
        parts.push(format!(
            "A JIRA ticket has been created with ID: *{}*.",
            ticket.ticket_id
        ));
    }

    if let Some(event) = state.derived().event()
        && let Some(start) = &event.start
    {
        let mut meeting = format!(
            "A meeting has been scheduled to discuss this:\n- Topic: *{}*\n- Time: {}",
            event.summary, start
        );
        if let Some(link) = event.meet_link.as_ref().or(event.calendar_link.as_ref()) {
            meeting.push_str(&format!("\n- Link: {link}"));
        }
        parts.push(meeting);
    }

    if parts.is_empty() {
        GENERIC_ACKNOWLEDGMENT.to_string()
    } else {
        parts.join("\n\n")
    }
}

fn build_reply_prompt(state: &WorkflowState) -> String {
    format!(
        "You're a helpful assistant drafting a professional reply to an email.\n\n\
         Original email:\nSubject: {}\nBody: {}\n\n\
         Reply to the sender politely, using the following information:\n{}\n\n\
         Respond only with the reply body.",
        state.subject_or_default(),
        state.email_body,
        reply_context(state),
    )
}

pub struct GenerateReply {
    llm: Arc<dyn LlmProvider>,
}

impl GenerateReply {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Node<WorkflowState> for GenerateReply {
    fn name(&self) -> &str {
        GENERATE_REPLY
    }

    async fn run(&self, state: &mut WorkflowState, ctx: &mut NodeContext) -> Result<(), WorkflowError> {
        let reply = complete_text(
            self.llm.as_ref(),
            GENERATE_REPLY,
            vec![ChatMessage::user(build_reply_prompt(state))],
            REPLY_MAX_TOKENS,
        )
        .await?;
        info!(run_id = %ctx.run_id(), chars = reply.len(), "Generated reply");
        let written = state.derived_mut().set_ai_reply(reply);
        warn_if_kept(ctx, written, "ai_reply");
        Ok(())
    }
}

// ── Tasks ───────────────────────────────────────────────────────────

fn build_tasks_prompt(state: &WorkflowState) -> String {
    format!(
        "You are a task extraction assistant. Analyze this email and extract any actionable tasks or to-dos.\n\
         Return the tasks as a JSON array. Each task should have:\n\
         - title: Brief description of the task\n\
         - description: Detailed description if needed\n\
         - priority: 'high', 'normal', or 'low'\n\
         - due_date: If mentioned in the email (in ISO format), otherwise null\n\n\
         Subject: {}\n\
         Body: {}\n\n\
         Examples of tasks to extract:\n\
         - 'Please review the document by Friday'\n\
         - 'Schedule a meeting with the team'\n\
         - 'Send the report to management'\n\
         - 'Follow up on the client request'\n\n\
         If no actionable tasks are found, return an empty array [].\n\
         Respond only with valid JSON.",
        state.subject_or_default(),
        state.email_body,
    )
}

/// Remove a surrounding markdown code fence, with or without a language tag.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line, if any.
    let rest = match rest.find('\n') {
        Some(newline) if !rest[..newline].contains('[') => &rest[newline + 1..],
        _ => rest.strip_prefix("json").unwrap_or(rest),
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_due_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Parse model output into tasks. Never fails: problems come back as warnings
/// alongside whatever tasks could be read.
pub fn parse_tasks(raw: &str) -> (Vec<ExtractedTask>, Vec<String>) {
    let mut warnings = Vec::new();

    let items = match serde_json::from_str::<Value>(strip_code_fence(raw)) {
        Ok(Value::Array(items)) => items,
        Ok(other) => {
            let kind = match other {
                Value::Object(_) => "an object",
                Value::Null => "null",
                _ => "a scalar",
            };
            warnings.push(format!("task output is {kind}, expected a JSON array"));
            return (Vec::new(), warnings);
        }
        Err(e) => {
            warnings.push(format!("task output is not valid JSON: {e}"));
            return (Vec::new(), warnings);
        }
    };

    let mut tasks = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let Some(title) = item
            .get("title")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|t| !t.is_empty())
        else {
            warnings.push(format!("task {index} has no title; skipped"));
            continue;
        };

        let due_date = match item.get("due_date") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => {
                let parsed = parse_due_date(s);
                if parsed.is_none() {
                    warnings.push(format!("task {index} has unreadable due_date {s:?}"));
                }
                parsed
            }
            Some(other) => {
                warnings.push(format!("task {index} has non-string due_date {other}"));
                None
            }
        };

        let priority = match item.get("priority") {
            None | Some(Value::Null) => TaskPriority::default(),
            Some(Value::String(s)) => TaskPriority::parse(s).unwrap_or_else(|| {
                warnings.push(format!("task {index} has unknown priority {s:?}; using normal"));
                TaskPriority::default()
            }),
            Some(other) => {
                warnings.push(format!("task {index} has non-string priority {other}; using normal"));
                TaskPriority::default()
            }
        };

        tasks.push(ExtractedTask {
            title: title.to_string(),
            description: item
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            priority,
            due_date,
        });
    }

    (tasks, warnings)
}

/// Extracts action items. Model or parse failures leave an empty list.
pub struct ExtractTasks {
    llm: Arc<dyn LlmProvider>,
}

impl ExtractTasks {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Node<WorkflowState> for ExtractTasks {
    fn name(&self) -> &str {
        EXTRACT_TASKS
    }

    async fn run(&self, state: &mut WorkflowState, ctx: &mut NodeContext) -> Result<(), WorkflowError> {
        let raw = complete_text(
            self.llm.as_ref(),
            EXTRACT_TASKS,
            vec![ChatMessage::user(build_tasks_prompt(state))],
            TASKS_MAX_TOKENS,
        )
        .await;

        let tasks = match raw {
            Ok(raw) => {
                let (tasks, warnings) = parse_tasks(&raw);
                for warning in warnings {
                    ctx.warn(warning);
                }
                tasks
            }
            Err(e) => {
                ctx.warn(format!("task extraction failed: {e}"));
                Vec::new()
            }
        };

        info!(run_id = %ctx.run_id(), count = tasks.len(), "Extracted tasks");
        let written = state.derived_mut().set_extracted_tasks(tasks);
        warn_if_kept(ctx, written, "extracted_tasks");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;
    use crate::workflow::state::{EventInfo, TicketInfo};
    use chrono::TimeZone;
    use uuid::Uuid;

    #[test]
    fn strip_fence_variants() {
        assert_eq!(strip_code_fence("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("```\n[]\n```"), "[]");
        assert_eq!(strip_code_fence("```json[]```"), "[]");
        assert_eq!(strip_code_fence("  [] "), "[]");
    }

    #[test]
    fn parses_single_task_with_due_date() {
        let raw = r#"[{"title":"Review doc","description":"","priority":"high","due_date":"2025-01-10T00:00:00Z"}]"#;
        let (tasks, warnings) = parse_tasks(raw);
        assert!(warnings.is_empty());
        assert_eq!(
            tasks,
            vec![ExtractedTask {
                title: "Review doc".into(),
                description: String::new(),
                priority: TaskPriority::High,
                due_date: Some(Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap()),
            }]
        );
    }

    #[test]
    fn invalid_json_yields_empty_with_warning() {
        let (tasks, warnings) = parse_tasks("not valid json");
        assert!(tasks.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn non_array_yields_empty_with_warning() {
        let (tasks, warnings) = parse_tasks(r#"{"title": "x"}"#);
        assert!(tasks.is_empty());
        assert!(warnings[0].contains("object"));
    }

    #[test]
    fn lenient_elements() {
        let raw = r#"```json
[
  {"title": "Send report", "priority": "urgent", "due_date": "2025-02-01"},
  {"description": "no title"},
  {"title": "Call back", "due_date": "next week"}
]
```"#;
        let (tasks, warnings) = parse_tasks(raw);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].priority, TaskPriority::Normal);
        assert_eq!(
            tasks[0].due_date,
            Some(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap())
        );
        assert!(tasks[1].due_date.is_none());
        assert_eq!(warnings.len(), 3);
    }

    #[test]
    fn unknown_priority_falls_back_to_normal_with_warning() {
        let raw = r#"[{"title": "Patch servers", "priority": "urgent"},
                      {"title": "Tidy wiki", "priority": "LOW"},
                      {"title": "Book room"}]"#;
        let (tasks, warnings) = parse_tasks(raw);
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].priority, TaskPriority::Normal);
        assert_eq!(tasks[1].priority, TaskPriority::Low);
        assert_eq!(tasks[2].priority, TaskPriority::Normal);
        assert_eq!(warnings, vec![r#"task 0 has unknown priority "urgent"; using normal"#]);
    }

    #[test]
    fn reply_context_falls_back_to_acknowledgment() {
        let state = WorkflowState::new("hello");
        assert_eq!(reply_context(&state), GENERIC_ACKNOWLEDGMENT);
    }

    #[test]
    fn reply_context_mentions_ticket_and_meeting() {
        let mut state = WorkflowState::new("hello");
        state.derived_mut().set_ticket(TicketInfo {
            ticket_id: "OPS-4".into(),
            ticket_url: String::new(),
        });
        state.derived_mut().set_event(EventInfo {
            summary: "Outage sync".into(),
            attendees: vec![],
            start: Some("2025-01-09T15:00:00+05:30".into()),
            end: None,
            meet_link: Some("https://meet/x".into()),
            calendar_link: None,
        });
        let context = reply_context(&state);
        assert!(context.contains("OPS-4"));
        assert!(context.contains("A meeting has been scheduled"));
        assert!(context.contains("https://meet/x"));
    }

    #[test]
    fn meeting_without_start_is_not_mentioned() {
        let mut state = WorkflowState::new("hello");
        state.derived_mut().set_event(EventInfo {
            summary: "Sync".into(),
            attendees: vec![],
            start: None,
            end: None,
            meet_link: None,
            calendar_link: None,
        });
        assert_eq!(reply_context(&state), GENERIC_ACKNOWLEDGMENT);
    }

    #[tokio::test]
    async fn extraction_model_failure_is_not_fatal() {
        let llm = Arc::new(ScriptedLlm::new().failing_when("task extraction", "timeout"));
        let node = ExtractTasks::new(llm);
        let mut state = WorkflowState::new("please review");
        let mut ctx = NodeContext::new(Uuid::new_v4());

        node.run(&mut state, &mut ctx).await.unwrap();
        assert!(state.derived().tasks_extracted());
        assert!(state.derived().extracted_tasks().is_empty());
        assert_eq!(ctx.warnings().len(), 1);
    }

    #[tokio::test]
    async fn second_summary_keeps_the_first() {
        let llm = Arc::new(ScriptedLlm::new().with_reply_when("concise", "Later summary."));
        let mut state = WorkflowState::new("hello");
        state.derived_mut().set_ai_summary("First summary.".into());
        let mut ctx = NodeContext::new(Uuid::new_v4());

        GenerateSummary::new(llm).run(&mut state, &mut ctx).await.unwrap();
        assert_eq!(state.derived().ai_summary(), Some("First summary."));
        assert_eq!(ctx.warnings().len(), 1);
        assert!(ctx.warnings()[0].message.contains("ai_summary"));
    }

    #[tokio::test]
    async fn summary_failure_is_fatal() {
        let llm = Arc::new(ScriptedLlm::new().failing_when("concise", "timeout"));
        let node = GenerateSummary::new(llm);
        let mut state = WorkflowState::new("hello");
        let err = node
            .run(&mut state, &mut NodeContext::new(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "node_error");
        assert!(state.derived().ai_summary().is_none());
    }
}
