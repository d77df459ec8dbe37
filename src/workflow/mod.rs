//! The email workflow: a fixed graph of classification, optional alerting,
//! reasoning with a single tool round, and reply composition.
//!
//! ```text
//! START -> classify_email -[notify]-> send_notification -> model_call
//!                         -[skip]---------------------->  model_call
//! model_call -[tools]-> tools -> store_tool_outputs -> generate_summary
//!            -[summarize]----------------------------> generate_summary
//! generate_summary -> generate_reply -> extract_tasks -> END
//! ```

pub mod graph;
pub mod nodes;
pub mod routers;
pub mod state;

pub use graph::{
    CompiledGraph, END, GraphBuilder, Node, NodeContext, Observer, RunOutput, RunTrace,
    RunWarning, START,
};
pub use state::{
    DerivedFields, EventInfo, ExtractedTask, Message, MessageRole, TaskPriority, TicketInfo,
    WorkflowState,
};

use std::sync::Arc;

use crate::channels::Notifier;
use crate::config::WorkflowConfig;
use crate::error::WorkflowError;
use crate::llm::LlmProvider;
use crate::tools::ToolRegistry;

use nodes::{
    CLASSIFY_EMAIL, ClassifyEmail, EXTRACT_TASKS, ExecuteTools, ExtractTasks, GENERATE_REPLY,
    GENERATE_SUMMARY, GenerateReply, GenerateSummary, MODEL_CALL, ModelCall, SEND_NOTIFICATION,
    STORE_TOOL_OUTPUTS, SendNotification, StoreToolOutputs, TOOLS,
};

/// Collaborators the workflow is built from.
pub struct WorkflowDeps {
    /// Text completions: classification, alert, summary, reply, tasks.
    pub llm: Arc<dyn LlmProvider>,
    /// Tool-calling reasoning step. Falls back to `llm`.
    pub tool_llm: Option<Arc<dyn LlmProvider>>,
    pub tools: Arc<ToolRegistry>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub config: WorkflowConfig,
}

impl WorkflowDeps {
    pub fn new(llm: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            llm,
            tool_llm: None,
            tools,
            notifier: None,
            config: WorkflowConfig::default(),
        }
    }

    pub fn with_tool_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.tool_llm = Some(llm);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }
}

/// The compiled email-processing graph. Cheap to share across workers.
pub struct EmailWorkflow {
    graph: CompiledGraph<WorkflowState>,
}

impl EmailWorkflow {
    pub fn new(deps: WorkflowDeps) -> Result<Self, WorkflowError> {
        let WorkflowDeps {
            llm,
            tool_llm,
            tools,
            notifier,
            config,
        } = deps;
        let tool_llm = tool_llm.unwrap_or_else(|| llm.clone());

        let graph = GraphBuilder::new()
            .add_node(ClassifyEmail::new(llm.clone(), config.preferences))
            .add_node(SendNotification::new(llm.clone(), notifier))
            .add_node(ModelCall::new(tool_llm, tools.clone()))
            .add_node(ExecuteTools::new(tools, config.tool_failure))
            .add_node(StoreToolOutputs)
            .add_node(GenerateSummary::new(llm.clone()))
            .add_node(GenerateReply::new(llm.clone()))
            .add_node(ExtractTasks::new(llm))
            .add_edge(START, CLASSIFY_EMAIL)
            .add_conditional_edges(
                CLASSIFY_EMAIL,
                routers::priority_check,
                [(routers::NOTIFY, SEND_NOTIFICATION), (routers::SKIP, MODEL_CALL)],
            )
            .add_edge(SEND_NOTIFICATION, MODEL_CALL)
            .add_conditional_edges(
                MODEL_CALL,
                routers::tool_route,
                [(routers::TOOLS, TOOLS), (routers::SUMMARIZE, GENERATE_SUMMARY)],
            )
            .add_edge(TOOLS, STORE_TOOL_OUTPUTS)
            .add_edge(STORE_TOOL_OUTPUTS, GENERATE_SUMMARY)
            .add_edge(GENERATE_SUMMARY, GENERATE_REPLY)
            .add_edge(GENERATE_REPLY, EXTRACT_TASKS)
            .add_edge(EXTRACT_TASKS, END)
            .compile()?;

        Ok(Self { graph })
    }

    /// Attach a callback invoked after every node.
    pub fn with_observer(mut self, observer: Observer<WorkflowState>) -> Self {
        self.graph = self.graph.with_observer(observer);
        self
    }

    /// Process one email to completion.
    pub async fn run(&self, state: WorkflowState) -> Result<RunOutput<WorkflowState>, WorkflowError> {
        validate_input(&state)?;
        self.graph.run(state).await
    }

    /// Process one email in place. On error `state` reflects every node that
    /// completed before the failure.
    pub async fn execute(&self, state: &mut WorkflowState) -> Result<RunTrace, WorkflowError> {
        validate_input(state)?;
        self.graph.execute(state).await
    }
}

fn validate_input(state: &WorkflowState) -> Result<(), WorkflowError> {
    if state.email_body.trim().is_empty() {
        return Err(WorkflowError::MissingInput {
            field: "email_body".to_string(),
        });
    }
    Ok(())
}
