//! In-memory tool backends for tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};

use crate::error::ToolError;
use crate::tools::calendar::{parse_time_description, resolve_attendees};
use crate::tools::tool::{
    CalendarBackend, CalendarEvent, CalendarEventArgs, Ticket, TicketArgs, TicketBackend, ToolName,
};

/// Files tickets `<PROJECT>-1`, `<PROJECT>-2`, ... and remembers each issue.
pub struct StubTickets {
    project: String,
    next: AtomicUsize,
    failure: Option<String>,
    issues: Mutex<Vec<String>>,
}

impl StubTickets {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            next: AtomicUsize::new(1),
            failure: None,
            issues: Mutex::new(Vec::new()),
        }
    }

    /// Fail every call with `reason`.
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    pub fn issues(&self) -> Vec<String> {
        self.issues.lock().map(|i| i.clone()).unwrap_or_default()
    }
}

impl Default for StubTickets {
    fn default() -> Self {
        Self::new("OPS")
    }
}

#[async_trait]
impl TicketBackend for StubTickets {
    async fn create_ticket(&self, args: &TicketArgs) -> Result<Ticket, ToolError> {
        if let Some(reason) = &self.failure {
            return Err(ToolError::ExecutionFailed {
                name: ToolName::CreateJiraTicket.to_string(),
                reason: reason.clone(),
            });
        }
        if let Ok(mut issues) = self.issues.lock() {
            issues.push(args.issue.clone());
        }
        let key = format!("{}-{}", self.project, self.next.fetch_add(1, Ordering::SeqCst));
        Ok(Ticket {
            ticket_url: format!("https://jira.invalid/browse/{key}"),
            ticket_id: key,
        })
    }
}

/// Schedules events against a fixed clock without any network access.
pub struct StubCalendar {
    now: DateTime<FixedOffset>,
    next: AtomicUsize,
    failure: Option<String>,
}

impl StubCalendar {
    /// A calendar whose clock is the current time at `offset`.
    pub fn new(offset: FixedOffset) -> Self {
        Self::at(Utc::now().with_timezone(&offset))
    }

    /// A calendar frozen at `now`.
    pub fn at(now: DateTime<FixedOffset>) -> Self {
        Self {
            now,
            next: AtomicUsize::new(1),
            failure: None,
        }
    }

    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    fn failed(reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            name: ToolName::CreateCalendarEvent.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl CalendarBackend for StubCalendar {
    async fn create_event(&self, args: &CalendarEventArgs) -> Result<CalendarEvent, ToolError> {
        if let Some(reason) = &self.failure {
            return Err(Self::failed(reason.clone()));
        }
        let description = args.time_description.as_deref().unwrap_or_default();
        let start = parse_time_description(description, self.now)
            .ok_or_else(|| Self::failed(format!("Invalid time format: {description:?}")))?;
        let end = start + Duration::hours(1);
        let id = format!("evt-{}", self.next.fetch_add(1, Ordering::SeqCst));
        let link = format!("https://calendar.invalid/event/{id}");

        Ok(CalendarEvent {
            event_summary: args.meeting.clone(),
            event_link: Some(link.clone()),
            event_attendees: resolve_attendees(&args.attendees, args.sender_email.as_deref()),
            event_start: Some(start.to_rfc3339()),
            event_end: Some(end.to_rfc3339()),
            event_meet_link: Some(format!("https://meet.invalid/{id}")),
            event_calendar_link: Some(link),
            event_id: Some(id),
        })
    }
}
