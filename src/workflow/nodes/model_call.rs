//! The reasoning step: decides whether the email needs tool calls.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::WorkflowError;
use crate::llm::{Decision, LlmProvider, Reasoning};
use crate::tools::ToolRegistry;
use crate::workflow::graph::{Node, NodeContext};
use crate::workflow::nodes::{MODEL_CALL, warn_if_kept};
use crate::workflow::state::{Message, WorkflowState};

const MODEL_CALL_INSTRUCTION: &str = "You are a helpful assistant that calls relevant tools \
    based on the email content. If the email talks about a meeting, create a calendar event. \
    If it mentions an issue, create a JIRA ticket.";

fn render_email(state: &WorkflowState) -> String {
    let mut rendered = format!(
        "Email:\nSubject: {}\n",
        state.email_subject.as_deref().unwrap_or("")
    );
    if let Some(from) = &state.email_from {
        rendered.push_str(&format!("From: {from}\n"));
    }
    rendered.push('\n');
    rendered.push_str(&state.email_body);
    rendered
}

/// Appends the instruction and email, asks the reasoning step, and records
/// either its text or its tool requests.
pub struct ModelCall {
    reasoning: Reasoning,
}

impl ModelCall {
    pub fn new(llm: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            reasoning: Reasoning::new(llm, tools.tool_definitions()),
        }
    }
}

#[async_trait]
impl Node<WorkflowState> for ModelCall {
    fn name(&self) -> &str {
        MODEL_CALL
    }

    async fn run(&self, state: &mut WorkflowState, ctx: &mut NodeContext) -> Result<(), WorkflowError> {
        state.push_message(Message::system(MODEL_CALL_INSTRUCTION));
        state.push_message(Message::human(render_email(state)));

        let turn = self
            .reasoning
            .decide(state.chat_history(), &ctx.run_id().to_string())
            .await
            .map_err(|e| WorkflowError::node(MODEL_CALL, e))?;

        match turn.decision {
            Decision::Answer(text) => {
                info!(
                    run_id = %ctx.run_id(),
                    model = self.reasoning.model_name(),
                    tokens = turn.tokens,
                    "Reasoning step answered without tools"
                );
                state.push_message(Message::ai(text.clone()));
                state.request_tool_calls(Vec::new());
                let written = state.derived_mut().set_model_output(text);
                warn_if_kept(ctx, written, "model_output");
            }
            Decision::UseTools { calls, preamble } => {
                info!(
                    run_id = %ctx.run_id(),
                    model = self.reasoning.model_name(),
                    tokens = turn.tokens,
                    calls = calls.len(),
                    "Reasoning step requested tools"
                );
                state.push_message(Message::ai_with_tool_calls(preamble, calls.clone()));
                state.request_tool_calls(calls);
            }
        }
        Ok(())
    }
}
