//! Tool sub-loop: run the requested calls, then fold their results into state.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ToolFailurePolicy;
use crate::error::WorkflowError;
use crate::tools::{CalendarEvent, ToolName, ToolRegistry};
use crate::workflow::graph::{Node, NodeContext};
use crate::workflow::nodes::{STORE_TOOL_OUTPUTS, TOOLS, warn_if_kept};
use crate::workflow::state::{EventInfo, Message, MessageRole, TicketInfo, WorkflowState};

pub const ISSUE_TAG: &str = "issue";
pub const MEETING_TAG: &str = "meeting";

/// Executes pending tool calls sequentially, appending one `tool_result` per
/// call in request order.
pub struct ExecuteTools {
    tools: Arc<ToolRegistry>,
    policy: ToolFailurePolicy,
}

impl ExecuteTools {
    pub fn new(tools: Arc<ToolRegistry>, policy: ToolFailurePolicy) -> Self {
        Self { tools, policy }
    }
}

#[async_trait]
impl Node<WorkflowState> for ExecuteTools {
    fn name(&self) -> &str {
        TOOLS
    }

    async fn run(&self, state: &mut WorkflowState, ctx: &mut NodeContext) -> Result<(), WorkflowError> {
        // Resolve every name before running anything.
        let mut resolved: Vec<ToolName> = Vec::with_capacity(state.pending_tool_calls().len());
        for call in state.pending_tool_calls() {
            match self.tools.resolve(&call.name) {
                Some(tool) => resolved.push(tool),
                None => {
                    return Err(WorkflowError::UnknownTool {
                        name: call.name.clone(),
                        call_id: call.id.clone(),
                    });
                }
            }
        }

        let calls = state.take_pending_tool_calls();
        for (call, tool) in calls.into_iter().zip(resolved) {
            debug!(run_id = %ctx.run_id(), tool = %tool, call_id = %call.id, "Invoking tool");
            let result = self.tools.invoke(tool, &call.id, &call.arguments).await;
            state.push_message(Message::tool_result(
                &result.call_id,
                tool.as_str(),
                result.to_content(),
                result.is_error(),
            ));

            if let Err(e) = &result.outcome {
                match self.policy {
                    ToolFailurePolicy::Abort => {
                        return Err(WorkflowError::ToolExecution {
                            tool: tool.to_string(),
                            call_id: result.call_id,
                            reason: e.to_string(),
                        });
                    }
                    ToolFailurePolicy::Record => {
                        ctx.warn(format!("tool {tool} failed (call {}): {e}", result.call_id));
                    }
                }
            } else {
                info!(run_id = %ctx.run_id(), tool = %tool, call_id = %result.call_id, "Tool call succeeded");
            }
        }
        Ok(())
    }
}

/// What the tool results in a history amount to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutputs {
    pub ticket: Option<TicketInfo>,
    pub event: Option<EventInfo>,
    /// One label per recognised result, newest first.
    pub tags: Vec<&'static str>,
    /// Descriptions of results that could not be read.
    pub malformed: Vec<String>,
}

/// Scan `messages` newest-first for ticket and event results.
///
/// The newest result of each kind wins. The sender is added to the event's
/// attendees only when absent, so folding the same history twice gives the
/// same answer.
pub fn fold_tool_outputs(messages: &[Message], sender: Option<&str>) -> ToolOutputs {
    let mut out = ToolOutputs::default();

    for msg in messages.iter().rev() {
        if msg.role != MessageRole::ToolResult || msg.is_error {
            continue;
        }
        let call_id = msg.call_id.as_deref().unwrap_or("?");
        let payload: Value = match serde_json::from_str(&msg.content) {
            Ok(v) => v,
            Err(e) => {
                out.malformed
                    .push(format!("unparseable result for call {call_id}: {e}"));
                continue;
            }
        };

        if payload.get("ticket_id").is_some() {
            match read_ticket(&payload) {
                Some(ticket) => {
                    if out.ticket.is_none() {
                        out.ticket = Some(ticket);
                    }
                    out.tags.push(ISSUE_TAG);
                }
                None => out
                    .malformed
                    .push(format!("ticket result for call {call_id} has no usable ticket_id")),
            }
        }

        if payload.get("event_summary").is_some() {
            match serde_json::from_value::<CalendarEvent>(payload) {
                Ok(event) => {
                    if out.event.is_none() {
                        out.event = Some(to_event_info(event, sender));
                    }
                    out.tags.push(MEETING_TAG);
                }
                Err(e) => out
                    .malformed
                    .push(format!("event result for call {call_id} is malformed: {e}")),
            }
        }
    }
    out
}

fn read_ticket(payload: &Value) -> Option<TicketInfo> {
    let ticket_id = payload.get("ticket_id")?.as_str()?.to_string();
    let ticket_url = payload
        .get("ticket_url")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Some(TicketInfo {
        ticket_id,
        ticket_url,
    })
}

fn to_event_info(event: CalendarEvent, sender: Option<&str>) -> EventInfo {
    let mut attendees = event.event_attendees;
    if let Some(sender) = sender.map(str::trim).filter(|s| !s.is_empty())
        && !attendees.iter().any(|a| a.eq_ignore_ascii_case(sender))
    {
        attendees.push(sender.to_string());
    }
    EventInfo {
        summary: event.event_summary,
        attendees,
        start: event.event_start,
        end: event.event_end,
        meet_link: event.event_meet_link,
        calendar_link: event.event_calendar_link,
    }
}

/// Folds tool results into the ticket and event fields. Never fails.
pub struct StoreToolOutputs;

#[async_trait]
impl Node<WorkflowState> for StoreToolOutputs {
    fn name(&self) -> &str {
        STORE_TOOL_OUTPUTS
    }

    async fn run(&self, state: &mut WorkflowState, ctx: &mut NodeContext) -> Result<(), WorkflowError> {
        let outputs = fold_tool_outputs(state.messages(), state.email_from.as_deref());

        for problem in outputs.malformed {
            ctx.warn(format!("skipped tool result: {problem}"));
        }
        if let Some(ticket) = outputs.ticket {
            info!(run_id = %ctx.run_id(), ticket = %ticket.ticket_id, "Stored ticket");
            let written = state.derived_mut().set_ticket(ticket);
            warn_if_kept(ctx, written, "ticket");
        }
        if let Some(event) = outputs.event {
            info!(run_id = %ctx.run_id(), event = %event.summary, "Stored event");
            let written = state.derived_mut().set_event(event);
            warn_if_kept(ctx, written, "event");
        }
        for tag in outputs.tags {
            state.push_tag(tag);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCall;
    use crate::tools::testing::StubTickets;
    use uuid::Uuid;

    fn ticket_result(id: &str, key: &str) -> Message {
        Message::tool_result(
            id,
            "create_jira_ticket",
            serde_json::json!({"ticket_id": key, "ticket_url": format!("https://j/browse/{key}")})
                .to_string(),
            false,
        )
    }

    fn event_result(id: &str, attendees: &[&str]) -> Message {
        Message::tool_result(
            id,
            "create_calendar_event",
            serde_json::json!({
                "event_summary": "Outage sync",
                "event_id": "evt-1",
                "event_link": "https://cal/evt-1",
                "event_attendees": attendees,
                "event_start": "2025-01-09T15:00:00+05:30",
                "event_end": "2025-01-09T16:00:00+05:30",
                "event_meet_link": "https://meet/evt-1",
                "event_calendar_link": "https://cal/evt-1"
            })
            .to_string(),
            false,
        )
    }

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args,
        }
    }

    #[test]
    fn newest_ticket_wins() {
        let history = vec![ticket_result("a", "OPS-1"), ticket_result("b", "OPS-2")];
        let out = fold_tool_outputs(&history, None);
        assert_eq!(out.ticket.unwrap().ticket_id, "OPS-2");
        assert_eq!(out.tags, vec!["issue", "issue"]);
    }

    #[test]
    fn sender_added_once_and_fold_is_idempotent() {
        let history = vec![event_result("a", &["bo@x.com"])];
        let first = fold_tool_outputs(&history, Some("ana@x.com"));
        let second = fold_tool_outputs(&history, Some("ana@x.com"));
        assert_eq!(first, second);
        assert_eq!(
            first.event.unwrap().attendees,
            vec!["bo@x.com", "ana@x.com"]
        );
    }

    #[test]
    fn sender_already_listed_is_not_duplicated() {
        let history = vec![event_result("a", &["ana@x.com"])];
        let out = fold_tool_outputs(&history, Some("ana@x.com"));
        assert_eq!(out.event.unwrap().attendees, vec!["ana@x.com"]);
    }

    #[test]
    fn malformed_results_are_reported_not_fatal() {
        let history = vec![
            Message::tool_result("a", "create_jira_ticket", "not json", false),
            Message::tool_result("b", "create_jira_ticket", r#"{"ticket_id": 7}"#, false),
            ticket_result("c", "OPS-3"),
        ];
        let out = fold_tool_outputs(&history, None);
        assert_eq!(out.ticket.unwrap().ticket_id, "OPS-3");
        assert_eq!(out.malformed.len(), 2);
    }

    #[test]
    fn error_results_and_other_roles_are_ignored() {
        let history = vec![
            Message::ai(r#"{"ticket_id": "FAKE-1"}"#),
            Message::tool_result("a", "create_jira_ticket", r#"{"error": "boom"}"#, true),
        ];
        let out = fold_tool_outputs(&history, None);
        assert_eq!(out, ToolOutputs::default());
    }

    #[tokio::test]
    async fn store_node_sets_fields_and_tags() {
        let mut state = WorkflowState::new("body").with_from("ana@x.com");
        state.push_message(ticket_result("a", "OPS-9"));
        state.push_message(event_result("b", &[]));
        let mut ctx = NodeContext::new(Uuid::new_v4());

        StoreToolOutputs.run(&mut state, &mut ctx).await.unwrap();
        assert_eq!(state.derived().ticket().unwrap().ticket_id, "OPS-9");
        assert_eq!(state.derived().event().unwrap().attendees, vec!["ana@x.com"]);
        assert_eq!(state.tags(), ["meeting", "issue"]);
        assert!(ctx.warnings().is_empty());
    }

    #[tokio::test]
    async fn stored_ticket_is_not_overwritten() {
        let mut state = WorkflowState::new("body");
        state.derived_mut().set_ticket(TicketInfo {
            ticket_id: "OPS-1".into(),
            ticket_url: String::new(),
        });
        state.push_message(ticket_result("a", "OPS-9"));
        let mut ctx = NodeContext::new(Uuid::new_v4());

        StoreToolOutputs.run(&mut state, &mut ctx).await.unwrap();
        assert_eq!(state.derived().ticket().unwrap().ticket_id, "OPS-1");
        assert_eq!(ctx.warnings().len(), 1);
        assert!(ctx.warnings()[0].message.contains("ticket was already set"));
    }

    #[tokio::test]
    async fn unknown_tool_fails_before_any_call() {
        let tickets = Arc::new(StubTickets::default());
        let registry = Arc::new(ToolRegistry::new().with_tickets(tickets.clone()));
        let node = ExecuteTools::new(registry, ToolFailurePolicy::Abort);
        let mut state = WorkflowState::new("body");
        state.request_tool_calls(vec![
            call("a", "create_jira_ticket", serde_json::json!({"issue": "x"})),
            call("b", "launch_rocket", serde_json::json!({})),
        ]);

        let err = node
            .run(&mut state, &mut NodeContext::new(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownTool { ref name, ref call_id } if name == "launch_rocket" && call_id == "b"));
        assert!(tickets.issues().is_empty());
        assert!(state.messages().is_empty());
    }

    #[tokio::test]
    async fn results_follow_request_order() {
        let registry = Arc::new(ToolRegistry::new().with_tickets(Arc::new(StubTickets::default())));
        let node = ExecuteTools::new(registry, ToolFailurePolicy::Abort);
        let mut state = WorkflowState::new("body");
        state.request_tool_calls(vec![
            call("first", "create_jira_ticket", serde_json::json!({"issue": "one"})),
            call("second", "create_jira_ticket", serde_json::json!({"issue": "two"})),
        ]);

        node.run(&mut state, &mut NodeContext::new(Uuid::new_v4()))
            .await
            .unwrap();
        let ids: Vec<&str> = state
            .messages()
            .iter()
            .filter_map(|m| m.call_id.as_deref())
            .collect();
        assert_eq!(ids, vec!["first", "second"]);
        assert!(state.pending_tool_calls().is_empty());
    }

    #[tokio::test]
    async fn abort_policy_records_error_then_fails() {
        let registry = Arc::new(
            ToolRegistry::new().with_tickets(Arc::new(StubTickets::default().failing("HTTP 500"))),
        );
        let node = ExecuteTools::new(registry, ToolFailurePolicy::Abort);
        let mut state = WorkflowState::new("body");
        state.request_tool_calls(vec![call(
            "a",
            "create_jira_ticket",
            serde_json::json!({"issue": "x"}),
        )]);

        let err = node
            .run(&mut state, &mut NodeContext::new(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "tool_execution_error");
        let last = state.messages().last().unwrap();
        assert!(last.is_error);
        assert!(last.content.contains("HTTP 500"));
    }

    #[tokio::test]
    async fn record_policy_warns_and_continues() {
        let registry = Arc::new(
            ToolRegistry::new().with_tickets(Arc::new(StubTickets::default().failing("HTTP 500"))),
        );
        let node = ExecuteTools::new(registry, ToolFailurePolicy::Record);
        let mut state = WorkflowState::new("body");
        state.request_tool_calls(vec![call(
            "a",
            "create_jira_ticket",
            serde_json::json!({"issue": "x"}),
        )]);
        let mut ctx = NodeContext::new(Uuid::new_v4());

        node.run(&mut state, &mut ctx).await.unwrap();
        assert_eq!(ctx.warnings().len(), 1);
        assert_eq!(state.messages().len(), 1);
    }
}
