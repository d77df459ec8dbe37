//! End-to-end runs of the email workflow against scripted models and
//! in-memory tool backends.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{FixedOffset, TimeZone, Utc};
use serde_json::json;

use mailflow::channels::Notifier;
use mailflow::config::{ToolFailurePolicy, WorkerPoolConfig, WorkflowConfig};
use mailflow::error::{ChannelError, WorkflowError};
use mailflow::llm::{ScriptedLlm, ToolCall};
use mailflow::pipeline::{DirRecorder, EmailProcessor, InboundEmail};
use mailflow::tools::ToolRegistry;
use mailflow::tools::testing::{StubCalendar, StubTickets};
use mailflow::worker::WorkerPool;
use mailflow::workflow::nodes::{
    CLASSIFY_EMAIL, EXTRACT_TASKS, GENERATE_REPLY, GENERATE_SUMMARY, MODEL_CALL,
    SEND_NOTIFICATION, STORE_TOOL_OUTPUTS, TOOLS,
};
use mailflow::workflow::{
    EmailWorkflow, MessageRole, TaskPriority, WorkflowDeps, WorkflowState,
};

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(&self, text: &str) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

/// Replies for every text node, classifying as `tag`.
fn scripted(tag: &str) -> ScriptedLlm {
    scripted_with_tasks(tag, "[]")
}

/// Rules match first-wins, so the task reply has to be chosen up front.
fn scripted_with_tasks(tag: &str, tasks: &str) -> ScriptedLlm {
    ScriptedLlm::new()
        .with_reply_when("Classify this email", tag)
        .with_reply_when("You're an alert system", "ALERT: outage")
        .with_reply_when("concise 1-2 sentence summary", "Summary.")
        .with_reply_when("drafting a professional reply", "Reply.")
        .with_reply_when("task extraction assistant", tasks)
}

fn frozen_calendar() -> StubCalendar {
    let utc = FixedOffset::east_opt(0).unwrap();
    StubCalendar::at(utc.with_ymd_and_hms(2025, 1, 8, 10, 0, 0).unwrap())
}

#[tokio::test]
async fn urgent_email_alerts_before_reasoning() {
    let notifier = Arc::new(RecordingNotifier::default());
    let workflow = EmailWorkflow::new(
        WorkflowDeps::new(Arc::new(scripted("urgent")), Arc::new(ToolRegistry::new()))
            .with_notifier(notifier.clone()),
    )
    .unwrap();

    let out = workflow
        .run(WorkflowState::new("Production database is down").with_subject("DB down"))
        .await
        .unwrap();

    assert_eq!(
        out.visited,
        vec![
            CLASSIFY_EMAIL,
            SEND_NOTIFICATION,
            MODEL_CALL,
            GENERATE_SUMMARY,
            GENERATE_REPLY,
            EXTRACT_TASKS
        ]
    );
    assert_eq!(out.state.tags(), ["urgent"]);
    assert_eq!(out.state.derived().alert(), Some("ALERT: outage"));
    assert_eq!(*notifier.sent.lock().unwrap(), vec!["ALERT: outage"]);
}

#[tokio::test]
async fn non_urgent_email_is_not_alerted() {
    let notifier = Arc::new(RecordingNotifier::default());
    let workflow = EmailWorkflow::new(
        WorkflowDeps::new(Arc::new(scripted("high_priority")), Arc::new(ToolRegistry::new()))
            .with_notifier(notifier.clone()),
    )
    .unwrap();

    let out = workflow.run(WorkflowState::new("Quarterly numbers attached")).await.unwrap();

    assert_eq!(out.visit_count(SEND_NOTIFICATION), 0);
    assert!(out.state.derived().alert().is_none());
    assert!(notifier.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn meeting_request_schedules_event_and_mentions_it_in_reply() {
    let llm = Arc::new(
        ScriptedLlm::new()
            .with_reply_when("A meeting has been scheduled", "See you at the outage sync.")
            .with_reply_when("Classify this email", "high_priority")
            .with_reply_when("concise 1-2 sentence summary", "Sender wants an outage sync.")
            .with_reply_when("task extraction assistant", "[]")
            .with_tool_calls(vec![call(
                "call_1",
                "create_calendar_event",
                json!({"meeting": "Outage sync", "time_description": "tomorrow at 3pm"}),
            )]),
    );
    let registry = ToolRegistry::new().with_calendar(Arc::new(frozen_calendar()));
    let workflow = EmailWorkflow::new(WorkflowDeps::new(llm.clone(), Arc::new(registry))).unwrap();

    let out = workflow
        .run(
            WorkflowState::new("Let's meet tomorrow at 3pm to discuss the outage")
                .with_subject("Sync")
                .with_from("ana@example.com"),
        )
        .await
        .unwrap();

    assert_eq!(out.visit_count(MODEL_CALL), 1);
    assert_eq!(out.visit_count(TOOLS), 1);
    assert_eq!(out.visit_count(STORE_TOOL_OUTPUTS), 1);
    assert_eq!(llm.tool_request_count(), 1);
    assert_eq!(out.state.tags(), ["high_priority", "meeting"]);

    let event = out.state.derived().event().expect("event stored");
    assert_eq!(event.summary, "Outage sync");
    assert!(!event.start.as_deref().unwrap_or_default().is_empty());
    assert_eq!(
        event.start_time().unwrap(),
        Utc.with_ymd_and_hms(2025, 1, 9, 15, 0, 0).unwrap()
    );
    assert!(event.attendees.iter().any(|a| a == "ana@example.com"));
    assert_eq!(
        out.state.derived().ai_reply(),
        Some("See you at the outage sync.")
    );
    assert!(out.warnings.is_empty());
}

#[tokio::test]
async fn newest_ticket_wins_when_two_are_filed() {
    let llm = Arc::new(scripted("high_priority").with_tool_calls(vec![
        call("c1", "create_jira_ticket", json!({"issue": "Login broken"})),
        call("c2", "create_jira_ticket", json!({"issue": "Login still broken"})),
    ]));
    let tickets = Arc::new(StubTickets::default());
    let registry = ToolRegistry::new().with_tickets(tickets.clone());
    let workflow = EmailWorkflow::new(WorkflowDeps::new(llm.clone(), Arc::new(registry))).unwrap();

    let out = workflow.run(WorkflowState::new("Login is broken")).await.unwrap();

    assert_eq!(tickets.issues().len(), 2);
    assert_eq!(out.state.derived().ticket().unwrap().ticket_id, "OPS-2");

    let reply_prompt = llm
        .requests()
        .into_iter()
        .flat_map(|r| r.messages)
        .map(|m| m.content)
        .find(|c| c.contains("drafting a professional reply"))
        .unwrap();
    assert!(reply_prompt.contains("*OPS-2*"));
    assert!(!reply_prompt.contains("*OPS-1*"));
}

#[tokio::test]
async fn sender_is_added_to_attendees_once() {
    let llm = scripted("other").with_tool_calls(vec![call(
        "c1",
        "create_calendar_event",
        json!({
            "meeting": "Planning",
            "time_description": "tomorrow at 10am",
            "attendees": ["ANA@example.com", "bo@example.com"]
        }),
    )]);
    let registry = ToolRegistry::new().with_calendar(Arc::new(frozen_calendar()));
    let workflow = EmailWorkflow::new(WorkflowDeps::new(Arc::new(llm), Arc::new(registry))).unwrap();

    let out = workflow
        .run(WorkflowState::new("Can we plan tomorrow?").with_from("ana@example.com"))
        .await
        .unwrap();

    let attendees = &out.state.derived().event().unwrap().attendees;
    let ana = attendees
        .iter()
        .filter(|a| a.eq_ignore_ascii_case("ana@example.com"))
        .count();
    assert_eq!(ana, 1);
    assert!(attendees.iter().any(|a| a == "bo@example.com"));
}

#[tokio::test]
async fn history_only_grows_across_nodes() {
    let lengths: Arc<Mutex<Vec<(String, usize)>>> = Arc::default();
    let seen = lengths.clone();

    let llm = scripted("low_priority").with_tool_calls(vec![call(
        "c1",
        "create_jira_ticket",
        json!({"issue": "Printer on fire"}),
    )]);
    let registry = ToolRegistry::new().with_tickets(Arc::new(StubTickets::default()));
    let workflow = EmailWorkflow::new(WorkflowDeps::new(Arc::new(llm), Arc::new(registry)))
        .unwrap()
        .with_observer(Arc::new(move |node: &str, state: &WorkflowState| {
            seen.lock()
                .unwrap()
                .push((node.to_string(), state.messages().len()));
        }));

    let out = workflow.run(WorkflowState::new("The printer is on fire")).await.unwrap();

    let lengths = lengths.lock().unwrap();
    assert_eq!(lengths.len(), out.visited.len());
    assert!(lengths.windows(2).all(|w| w[0].1 <= w[1].1));

    let roles: Vec<_> = out.state.messages().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::System,
            MessageRole::Human,
            MessageRole::Ai,
            MessageRole::ToolResult
        ]
    );
}

#[tokio::test]
async fn unparseable_tasks_leave_an_empty_list() {
    let llm = ScriptedLlm::new()
        .with_reply_when("Classify this email", "low_priority")
        .with_reply_when("task extraction assistant", "not valid json")
        .with_reply("ok");
    let workflow =
        EmailWorkflow::new(WorkflowDeps::new(Arc::new(llm), Arc::new(ToolRegistry::new())))
            .unwrap();

    let out = workflow.run(WorkflowState::new("FYI")).await.unwrap();

    let derived = out.state.derived();
    assert!(derived.tasks_extracted());
    assert!(derived.extracted_tasks().is_empty());
    assert!(out.warnings.iter().any(|w| w.node == EXTRACT_TASKS));
}

#[tokio::test]
async fn fenced_task_list_is_parsed() {
    let tasks = "```json\n[{\"title\": \"Review doc\", \"description\": \"Review the design doc\", \
                 \"priority\": \"high\", \"due_date\": \"2025-01-10\"}]\n```";
    let llm = scripted_with_tasks("low_priority", tasks);
    let workflow =
        EmailWorkflow::new(WorkflowDeps::new(Arc::new(llm), Arc::new(ToolRegistry::new())))
            .unwrap();

    let out = workflow
        .run(WorkflowState::new("Please review the design doc by Friday"))
        .await
        .unwrap();

    let tasks = out.state.derived().extracted_tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Review doc");
    assert_eq!(tasks[0].priority, TaskPriority::High);
    assert_eq!(
        tasks[0].due_date,
        Some(Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn unknown_tool_stops_before_composition() {
    let llm = scripted("low_priority").with_tool_calls(vec![call(
        "c9",
        "launch_rocket",
        json!({}),
    )]);
    let registry = ToolRegistry::new().with_tickets(Arc::new(StubTickets::default()));
    let workflow =
        EmailWorkflow::new(WorkflowDeps::new(Arc::new(llm), Arc::new(registry))).unwrap();

    let mut state = WorkflowState::new("Launch it");
    let err = workflow.execute(&mut state).await.unwrap_err();

    assert!(matches!(
        err,
        WorkflowError::UnknownTool { ref name, ref call_id } if name == "launch_rocket" && call_id == "c9"
    ));
    assert!(state.derived().ai_summary().is_none());
    assert!(state.derived().ai_reply().is_none());
    assert!(
        state
            .messages()
            .iter()
            .all(|m| m.role != MessageRole::ToolResult)
    );
}

#[tokio::test]
async fn recorded_tool_failure_falls_back_to_acknowledgment() {
    let llm = Arc::new(scripted("low_priority").with_tool_calls(vec![call(
        "c1",
        "create_calendar_event",
        json!({"meeting": "Sync", "time_description": "tomorrow at 3pm"}),
    )]));
    let registry =
        ToolRegistry::new().with_calendar(Arc::new(frozen_calendar().failing("calendar offline")));
    let config = WorkflowConfig {
        tool_failure: ToolFailurePolicy::Record,
        ..Default::default()
    };
    let workflow = EmailWorkflow::new(
        WorkflowDeps::new(llm.clone(), Arc::new(registry)).with_config(config),
    )
    .unwrap();

    let out = workflow.run(WorkflowState::new("Meet tomorrow?")).await.unwrap();

    assert!(out.state.derived().event().is_none());
    assert!(out.warnings.iter().any(|w| w.node == TOOLS));
    let reply_prompt = llm
        .requests()
        .into_iter()
        .flat_map(|r| r.messages)
        .map(|m| m.content)
        .find(|c| c.contains("drafting a professional reply"))
        .unwrap();
    assert!(reply_prompt.contains("We are reviewing your message"));
}

#[tokio::test]
async fn aborted_tool_failure_fails_the_run() {
    let llm = scripted("low_priority").with_tool_calls(vec![call(
        "c1",
        "create_jira_ticket",
        json!({"issue": "Broken"}),
    )]);
    let registry =
        ToolRegistry::new().with_tickets(Arc::new(StubTickets::default().failing("jira down")));
    let workflow =
        EmailWorkflow::new(WorkflowDeps::new(Arc::new(llm), Arc::new(registry))).unwrap();

    let mut state = WorkflowState::new("Broken");
    let err = workflow.execute(&mut state).await.unwrap_err();

    assert_eq!(err.kind(), "tool_execution_error");
    let last = state.messages().last().unwrap();
    assert_eq!(last.role, MessageRole::ToolResult);
    assert!(last.is_error);
}

#[tokio::test]
async fn worker_pool_processes_payload_files() {
    let dir = tempfile::tempdir().unwrap();
    let inbox = dir.path().join("inbox");
    let outbox = dir.path().join("processed");
    std::fs::create_dir_all(&inbox).unwrap();
    for (i, body) in ["First email", "Second email", "Third email"].iter().enumerate() {
        let payload = json!({
            "From": "ana@example.com",
            "To": "ops@example.com",
            "Subject": format!("Note {i}"),
            "TextBody": body,
            "HtmlBody": ""
        });
        std::fs::write(inbox.join(format!("{i}.json")), payload.to_string()).unwrap();
    }

    let workflow = Arc::new(
        EmailWorkflow::new(WorkflowDeps::new(
            Arc::new(scripted("low_priority")),
            Arc::new(ToolRegistry::new()),
        ))
        .unwrap(),
    );
    let processor = Arc::new(
        EmailProcessor::new(workflow).with_recorder(Arc::new(DirRecorder::new(&outbox))),
    );
    let pool = WorkerPool::start(
        WorkerPoolConfig {
            workers: 2,
            queue_capacity: 1,
        },
        processor,
    );

    let mut handles = Vec::new();
    for i in 0..3 {
        let email = InboundEmail::load(inbox.join(format!("{i}.json"))).await.unwrap();
        handles.push(pool.submit(email).await.unwrap());
    }
    let mut ids = Vec::new();
    for handle in handles {
        let processed = handle.wait().await.unwrap();
        assert!(processed.succeeded());
        assert_eq!(processed.ai_reply.as_deref(), Some("Reply."));
        ids.push(processed.email_id);
    }
    pool.shutdown().await;

    for id in ids {
        assert!(outbox.join(format!("{id}.json")).exists());
    }
}
