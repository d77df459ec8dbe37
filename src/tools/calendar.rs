//! Google Calendar backend for `create_calendar_event`.

use std::ops::Range;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
    Weekday,
};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::info;

use crate::config::non_empty_var;
use crate::error::ToolError;
use crate::tools::tool::{CalendarBackend, CalendarEvent, CalendarEventArgs, ToolName};

const CALENDAR_API_URL: &str = "https://www.googleapis.com/calendar/v3";

/// Asia/Kolkata, the offset events are scheduled in unless configured.
const DEFAULT_UTC_OFFSET_MINUTES: i32 = 330;

/// Hour used when a description names a day but no time.
const DEFAULT_HOUR: u32 = 9;

/// Hour used for `tonight` without a time.
const EVENING_HOUR: u32 = 19;

/// Calendar configuration.
#[derive(Debug, Clone)]
pub struct CalendarConfig {
    pub access_token: SecretString,
    pub calendar_id: String,
    pub utc_offset: FixedOffset,
}

impl CalendarConfig {
    /// Build from environment. Returns `None` without `GOOGLE_CALENDAR_TOKEN`.
    pub fn from_env() -> Option<Self> {
        let access_token = non_empty_var("GOOGLE_CALENDAR_TOKEN")?;
        let calendar_id =
            non_empty_var("GOOGLE_CALENDAR_ID").unwrap_or_else(|| "primary".to_string());
        let offset_minutes: i32 = std::env::var("CALENDAR_UTC_OFFSET_MINUTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_UTC_OFFSET_MINUTES);
        let utc_offset = FixedOffset::east_opt(offset_minutes * 60)
            .or_else(|| FixedOffset::east_opt(DEFAULT_UTC_OFFSET_MINUTES * 60))?;

        Some(Self {
            access_token: SecretString::from(access_token),
            calendar_id,
            utc_offset,
        })
    }
}

/// Creates events with a Meet link through the Calendar v3 REST API.
pub struct GoogleCalendar {
    config: CalendarConfig,
    client: reqwest::Client,
    base_url: String,
}

impl GoogleCalendar {
    pub fn new(config: CalendarConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            base_url: CALENDAR_API_URL.to_string(),
        }
    }

    fn failed(reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            name: ToolName::CreateCalendarEvent.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedEvent {
    id: Option<String>,
    html_link: Option<String>,
    start: Option<EventTime>,
    end: Option<EventTime>,
    conference_data: Option<ConferenceData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    date_time: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConferenceData {
    #[serde(default)]
    entry_points: Vec<EntryPoint>,
}

#[derive(Deserialize)]
struct EntryPoint {
    uri: Option<String>,
}

#[async_trait]
impl CalendarBackend for GoogleCalendar {
    async fn create_event(&self, args: &CalendarEventArgs) -> Result<CalendarEvent, ToolError> {
        let now = Utc::now().with_timezone(&self.config.utc_offset);
        let description = args.time_description.as_deref().unwrap_or_default();
        let start = parse_time_description(description, now)
            .ok_or_else(|| Self::failed(format!("Invalid time format: {description:?}")))?;
        let end = start + Duration::hours(1);
        let attendees = resolve_attendees(&args.attendees, args.sender_email.as_deref());

        let body = serde_json::json!({
            "summary": args.meeting,
            "start": {"dateTime": start.to_rfc3339()},
            "end": {"dateTime": end.to_rfc3339()},
            "attendees": attendees.iter().map(|email| serde_json::json!({"email": email})).collect::<Vec<_>>(),
            "conferenceData": {
                "createRequest": {
                    "requestId": format!("meet-{}", uuid::Uuid::new_v4()),
                    "conferenceSolutionKey": {"type": "hangoutsMeet"}
                }
            }
        });

        let url = format!(
            "{}/calendars/{}/events?conferenceDataVersion=1",
            self.base_url, self.config.calendar_id
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.config.access_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::failed(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ToolError::AuthRequired {
                name: ToolName::CreateCalendarEvent.to_string(),
            });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::failed(format!("HTTP {status}: {text}")));
        }

        let created: CreatedEvent = resp
            .json()
            .await
            .map_err(|e| Self::failed(format!("invalid response: {e}")))?;

        info!(
            event_id = created.id.as_deref().unwrap_or(""),
            start = %start,
            "Created calendar event"
        );

        Ok(CalendarEvent {
            event_summary: args.meeting.clone(),
            event_id: created.id,
            event_link: created.html_link.clone(),
            event_attendees: attendees,
            event_start: created
                .start
                .and_then(|t| t.date_time)
                .or_else(|| Some(start.to_rfc3339())),
            event_end: created
                .end
                .and_then(|t| t.date_time)
                .or_else(|| Some(end.to_rfc3339())),
            event_meet_link: created
                .conference_data
                .and_then(|c| c.entry_points.into_iter().next())
                .and_then(|e| e.uri),
            event_calendar_link: created.html_link,
        })
    }
}

/// Given attendees plus the sender, deduplicated, in first-seen order.
pub fn resolve_attendees(attendees: &[String], sender: Option<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for email in attendees.iter().map(String::as_str).chain(sender) {
        let email = email.trim();
        if !email.is_empty() && !out.iter().any(|e| e.eq_ignore_ascii_case(email)) {
            out.push(email.to_string());
        }
    }
    out
}

// ── Time descriptions ───────────────────────────────────────────────

static DAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(today|tonight|tomorrow|monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b")
        .unwrap()
});

static CLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})(?::(\d{2}))?\s*(am|pm)\b|\b(\d{1,2}):(\d{2})\b|\b(noon|midnight)\b")
        .unwrap()
});

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").unwrap());

/// Day first: `15/01/2025`, `15/1/25`.
static NUMERIC_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4}|\d{2})\b").unwrap());

static MONTH_FIRST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\b\.?\s+(\d{1,2})(?:st|nd|rd|th)?\b(?:,?\s*(\d{4})\b)?",
    )
    .unwrap()
});

static DAY_FIRST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(\d{1,2})(?:st|nd|rd|th)?\s+(?:of\s+)?(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\b\.?(?:,?\s*(\d{4})\b)?",
    )
    .unwrap()
});

enum Day {
    Offset(i64),
    Weekday(Weekday),
}

/// A calendar date written out in the description.
enum DateMention {
    Absent,
    Found(NaiveDate, Range<usize>),
    /// Looks like a date but names no real day (`31/02/2025`).
    Unreadable,
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    MONTHS
        .iter()
        .position(|m| name.starts_with(m))
        .map(|i| i as u32 + 1)
}

fn capture_num(c: &regex::Captures<'_>, i: usize) -> Option<u32> {
    c.get(i).and_then(|m| m.as_str().parse().ok())
}

/// Find an explicit date. Without a year, the next occurrence on or after
/// `today` is used.
fn explicit_date(lower: &str, today: NaiveDate) -> DateMention {
    let found = |year: Option<i32>, month: Option<u32>, day: Option<u32>, span: Range<usize>| {
        let (Some(month), Some(day)) = (month, day) else {
            return DateMention::Unreadable;
        };
        let date = match year {
            Some(year) => NaiveDate::from_ymd_opt(year, month, day),
            None => NaiveDate::from_ymd_opt(today.year(), month, day).and_then(|d| {
                if d < today {
                    NaiveDate::from_ymd_opt(today.year() + 1, month, day)
                } else {
                    Some(d)
                }
            }),
        };
        match date {
            Some(date) => DateMention::Found(date, span),
            None => DateMention::Unreadable,
        }
    };
    if let Some(c) = ISO_DATE_RE.captures(lower) {
        let year = c[1].parse().ok();
        let span = c.get(0).map_or(0..0, |m| m.range());
        return found(year, capture_num(&c, 2), capture_num(&c, 3), span);
    }
    if let Some(c) = NUMERIC_DATE_RE.captures(lower) {
        let year = c[3]
            .parse::<i32>()
            .ok()
            .map(|y| if y < 100 { 2000 + y } else { y });
        let span = c.get(0).map_or(0..0, |m| m.range());
        return found(year, capture_num(&c, 2), capture_num(&c, 1), span);
    }
    if let Some(c) = MONTH_FIRST_RE.captures(lower) {
        let year = c.get(3).and_then(|m| m.as_str().parse().ok());
        let span = c.get(0).map_or(0..0, |m| m.range());
        return found(year, month_number(&c[1]), capture_num(&c, 2), span);
    }
    if let Some(c) = DAY_FIRST_RE.captures(lower) {
        let year = c.get(3).and_then(|m| m.as_str().parse().ok());
        let span = c.get(0).map_or(0..0, |m| m.range());
        return found(year, month_number(&c[2]), capture_num(&c, 1), span);
    }
    DateMention::Absent
}

/// Parse a natural time description into a timestamp in `now`'s offset.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM`, and phrases combining a date
/// (`2025-01-15`, `15/01/2025`, `January 15`, `15th Jan 2025`) or a day word
/// (`today`, `tonight`, `tomorrow`, weekday names) with a clock time (`3pm`,
/// `10:30am`, `15:00`, `noon`). Ambiguous phrases resolve to the next future
/// instant. A date that does not exist makes the whole description invalid.
pub fn parse_time_description(
    description: &str,
    now: DateTime<FixedOffset>,
) -> Option<DateTime<FixedOffset>> {
    let raw = description.trim();
    if raw.is_empty() {
        return None;
    }
    let offset = *now.offset();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&offset));
    }
    for fmt in ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return offset.from_local_datetime(&naive).single();
        }
    }

    let today = now.date_naive();
    let mut text = raw.to_ascii_lowercase();
    let date = match explicit_date(&text, today) {
        DateMention::Unreadable => return None,
        DateMention::Found(date, span) => {
            text.replace_range(span, " ");
            Some(date)
        }
        DateMention::Absent => None,
    };

    let day_word = DAY_RE.captures(&text).map(|c| c[1].to_string());
    let default_hour = if day_word.as_deref() == Some("tonight") {
        EVENING_HOUR
    } else {
        DEFAULT_HOUR
    };
    let day = day_word.as_deref().map(|word| match word {
        "today" | "tonight" => Day::Offset(0),
        "tomorrow" => Day::Offset(1),
        "monday" => Day::Weekday(Weekday::Mon),
        "tuesday" => Day::Weekday(Weekday::Tue),
        "wednesday" => Day::Weekday(Weekday::Wed),
        "thursday" => Day::Weekday(Weekday::Thu),
        "friday" => Day::Weekday(Weekday::Fri),
        "saturday" => Day::Weekday(Weekday::Sat),
        _ => Day::Weekday(Weekday::Sun),
    });
    let clock = match CLOCK_RE.captures(&text) {
        Some(c) => Some(parse_clock(&c)?),
        None => None,
    };
    if date.is_none() && day.is_none() && clock.is_none() {
        return None;
    }

    let time = clock.unwrap_or_else(|| NaiveTime::from_hms_opt(default_hour, 0, 0).unwrap_or_default());
    let at = |date: NaiveDate| offset.from_local_datetime(&date.and_time(time)).single();

    if let Some(date) = date {
        return at(date);
    }
    match day {
        Some(Day::Offset(days)) => at(today + Duration::days(days)),
        Some(Day::Weekday(target)) => {
            let ahead = (target.num_days_from_monday() as i64
                - today.weekday().num_days_from_monday() as i64)
                .rem_euclid(7);
            let candidate = at(today + Duration::days(ahead))?;
            if candidate > now {
                Some(candidate)
            } else {
                at(today + Duration::days(ahead + 7))
            }
        }
        None => {
            let candidate = at(today)?;
            if candidate > now {
                Some(candidate)
            } else {
                at(today + Duration::days(1))
            }
        }
    }
}

fn parse_clock(c: &regex::Captures<'_>) -> Option<NaiveTime> {
    if let Some(word) = c.get(6) {
        let hour = if word.as_str() == "noon" { 12 } else { 0 };
        return NaiveTime::from_hms_opt(hour, 0, 0);
    }
    if let (Some(h), Some(m)) = (c.get(4), c.get(5)) {
        return NaiveTime::from_hms_opt(h.as_str().parse().ok()?, m.as_str().parse().ok()?, 0);
    }

    let hour: u32 = c.get(1)?.as_str().parse().ok()?;
    let minute: u32 = match c.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    if !(1..=12).contains(&hour) {
        return None;
    }
    let hour = match (c.get(3)?.as_str(), hour) {
        ("am", 12) => 0,
        ("am", h) => h,
        ("pm", 12) => 12,
        (_, h) => h + 12,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}
