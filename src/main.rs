use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use mailflow::channels::{TelegramConfig, TelegramNotifier};
use mailflow::config::{WorkerPoolConfig, WorkflowConfig, non_empty_var};
use mailflow::llm::{LlmBackend, LlmConfig, create_provider};
use mailflow::pipeline::{DirRecorder, EmailProcessor, InboundEmail, RunRecorder, StdoutRecorder};
use mailflow::tools::ToolRegistry;
use mailflow::tools::calendar::{CalendarConfig, GoogleCalendar};
use mailflow::tools::jira::{JiraConfig, JiraTickets};
use mailflow::worker::WorkerPool;
use mailflow::workflow::{EmailWorkflow, WorkflowDeps};

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("Usage: mailflow <inbound.json>...");
        eprintln!("  Each file holds one inbound webhook body (From, To, Subject, TextBody, HtmlBody).");
        std::process::exit(2);
    }

    let api_key = non_empty_var("ANTHROPIC_API_KEY").unwrap_or_else(|| {
        eprintln!("Error: ANTHROPIC_API_KEY not set");
        eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...");
        std::process::exit(1);
    });
    let model = non_empty_var("MAILFLOW_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let tool_model = non_empty_var("MAILFLOW_TOOL_MODEL");

    let workflow_config = WorkflowConfig::from_env()?;
    let pool_config = WorkerPoolConfig::from_env();

    eprintln!("📬 Mailflow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", model);
    if let Some(tool_model) = &tool_model {
        eprintln!("   Tool model: {}", tool_model);
    }
    eprintln!("   Workers: {}", pool_config.workers);

    // ── LLM ─────────────────────────────────────────────────────────────
    let llm_config = |model: String| LlmConfig {
        backend: LlmBackend::Anthropic,
        api_key: secrecy::SecretString::from(api_key.clone()),
        model,
    };
    let llm = create_provider(&llm_config(model))?;

    // ── Tools ───────────────────────────────────────────────────────────
    let mut registry = ToolRegistry::new();
    match CalendarConfig::from_env() {
        Some(config) => registry = registry.with_calendar(Arc::new(GoogleCalendar::new(config))),
        None => warn!("GOOGLE_CALENDAR_TOKEN not set, create_calendar_event disabled"),
    }
    match JiraConfig::from_env() {
        Some(config) => registry = registry.with_tickets(Arc::new(JiraTickets::new(config))),
        None => warn!("JIRA_* not set, create_jira_ticket disabled"),
    }
    eprintln!("   Tools: {:?}", registry.list());

    let mut deps = WorkflowDeps::new(llm, Arc::new(registry)).with_config(workflow_config);
    if let Some(tool_model) = tool_model {
        deps = deps.with_tool_llm(create_provider(&llm_config(tool_model))?);
    }

    // ── Notifications ───────────────────────────────────────────────────
    if let Some(config) = TelegramConfig::from_env() {
        eprintln!("   Alerts: telegram chat {}", config.chat_id);
        deps = deps.with_notifier(Arc::new(TelegramNotifier::new(config)));
    }

    let workflow = Arc::new(EmailWorkflow::new(deps).context("building workflow")?);

    let recorder: Arc<dyn RunRecorder> = match non_empty_var("MAILFLOW_OUT_DIR") {
        Some(dir) => {
            eprintln!("   Output: {}", dir);
            Arc::new(DirRecorder::new(dir))
        }
        None => Arc::new(StdoutRecorder),
    };
    eprintln!();

    let processor = Arc::new(EmailProcessor::new(workflow).with_recorder(recorder));
    let pool = WorkerPool::start(pool_config, processor);

    let mut handles = Vec::new();
    for path in &paths {
        match InboundEmail::load(path).await {
            Ok(email) => handles.push(pool.submit(email).await?),
            Err(e) => warn!("Skipping {path}: {e:#}"),
        }
    }

    let mut failed = 0usize;
    for handle in handles {
        let processed = handle.wait().await?;
        if !processed.succeeded() {
            failed += 1;
        }
    }
    pool.shutdown().await;

    info!(total = paths.len(), failed, "Done");
    Ok(())
}
