//! Inbound email payloads and the record persisted for each processed email.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WorkflowError;
use crate::workflow::routers::URGENT_TAG;
use crate::workflow::{ExtractedTask, RunOutput, RunWarning, TicketInfo, WorkflowState};

// ── Inbound email ───────────────────────────────────────────────────

/// Webhook body posted by the inbound mail provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostmarkInbound {
    #[serde(rename = "From", default)]
    pub from: String,
    #[serde(rename = "To", default)]
    pub to: String,
    #[serde(rename = "Subject", default)]
    pub subject: String,
    #[serde(rename = "TextBody", default)]
    pub text_body: String,
    #[serde(rename = "HtmlBody", default)]
    pub html_body: String,
}

/// An email waiting to be processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEmail {
    pub id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    /// HTML body when present, otherwise the text body.
    pub body: String,
    pub text_body: String,
    pub html_body: String,
    pub received_at: DateTime<Utc>,
}

impl InboundEmail {
    pub fn from_postmark(payload: PostmarkInbound) -> Self {
        let body = if payload.html_body.trim().is_empty() {
            payload.text_body.clone()
        } else {
            payload.html_body.clone()
        };
        Self {
            id: Uuid::new_v4().to_string(),
            from: payload.from,
            to: payload.to,
            subject: payload.subject,
            body,
            text_body: payload.text_body,
            html_body: payload.html_body,
            received_at: Utc::now(),
        }
    }

    /// Parse a webhook JSON body.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<PostmarkInbound>(raw).map(Self::from_postmark)
    }

    /// Read a webhook JSON body from disk.
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Initial workflow state for this email.
    pub fn to_state(&self) -> WorkflowState {
        let mut state = WorkflowState::new(&self.body);
        if !self.subject.is_empty() {
            state = state.with_subject(&self.subject);
        }
        if !self.from.is_empty() {
            state = state.with_from(&self.from);
        }
        if !self.to.is_empty() {
            state = state.with_to(&self.to);
        }
        state
    }
}

// ── Processed record ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailPriority {
    Urgent,
    Normal,
}

/// Calendar event as stored against the email.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarRecord {
    pub title: String,
    pub start_time: Option<DateTime<FixedOffset>>,
    pub end_time: Option<DateTime<FixedOffset>>,
    pub attendees: Vec<String>,
    pub meet_link: Option<String>,
    pub calendar_link: Option<String>,
}

/// Everything the caller persists after a run, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedEmail {
    pub email_id: String,
    pub from: String,
    pub subject: String,
    pub run_id: Option<Uuid>,
    pub tags: Vec<String>,
    pub priority: EmailPriority,
    pub ai_summary: Option<String>,
    pub ai_reply: Option<String>,
    pub alert: Option<String>,
    pub jira_ticket: Option<TicketInfo>,
    pub calendar_event: Option<CalendarRecord>,
    pub tasks: Vec<ExtractedTask>,
    pub visited: Vec<String>,
    pub warnings: Vec<RunWarning>,
    pub is_processed: bool,
    pub processed_at: DateTime<Utc>,
    pub processing_error: Option<String>,
    pub error_kind: Option<String>,
}

impl ProcessedEmail {
    /// Map a completed run onto the stored record.
    pub fn from_run(email: &InboundEmail, output: &RunOutput<WorkflowState>) -> Self {
        let state = &output.state;
        let derived = state.derived();
        let priority = if state.has_tag(URGENT_TAG) {
            EmailPriority::Urgent
        } else {
            EmailPriority::Normal
        };

        Self {
            run_id: Some(output.run_id),
            tags: state.tags().to_vec(),
            priority,
            ai_summary: derived.ai_summary().map(str::to_string),
            ai_reply: derived.ai_reply().map(str::to_string),
            alert: derived.alert().map(str::to_string),
            jira_ticket: derived.ticket().cloned(),
            calendar_event: derived.event().map(|event| CalendarRecord {
                title: event.summary.clone(),
                start_time: event.start_time(),
                end_time: event.end_time(),
                attendees: event.attendees.clone(),
                meet_link: event.meet_link.clone(),
                calendar_link: event.calendar_link.clone(),
            }),
            tasks: derived.extracted_tasks().to_vec(),
            visited: output.visited.clone(),
            warnings: output.warnings.clone(),
            ..Self::blank(email)
        }
    }

    /// Record a failed run. The email is still marked processed.
    pub fn failed(email: &InboundEmail, error: &WorkflowError) -> Self {
        Self {
            processing_error: Some(error.to_string()),
            error_kind: Some(error.kind().to_string()),
            ..Self::blank(email)
        }
    }

    fn blank(email: &InboundEmail) -> Self {
        Self {
            email_id: email.id.clone(),
            from: email.from.clone(),
            subject: email.subject.clone(),
            run_id: None,
            tags: Vec::new(),
            priority: EmailPriority::Normal,
            ai_summary: None,
            ai_reply: None,
            alert: None,
            jira_ticket: None,
            calendar_event: None,
            tasks: Vec::new(),
            visited: Vec::new(),
            warnings: Vec::new(),
            is_processed: true,
            processed_at: Utc::now(),
            processing_error: None,
            error_kind: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.processing_error.is_none()
    }
}
