//! The concrete steps of the email workflow.

mod classify;
mod compose;
mod model_call;
mod tool_loop;

pub use classify::{ClassifyEmail, SendNotification};
pub use compose::{ExtractTasks, GenerateReply, GenerateSummary, parse_tasks, strip_code_fence};
pub use model_call::ModelCall;
pub use tool_loop::{ExecuteTools, StoreToolOutputs, ToolOutputs, fold_tool_outputs};

use crate::error::WorkflowError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::workflow::graph::NodeContext;

pub const CLASSIFY_EMAIL: &str = "classify_email";
pub const SEND_NOTIFICATION: &str = "send_notification";
pub const MODEL_CALL: &str = "model_call";
pub const TOOLS: &str = "tools";
pub const STORE_TOOL_OUTPUTS: &str = "store_tool_outputs";
pub const GENERATE_SUMMARY: &str = "generate_summary";
pub const GENERATE_REPLY: &str = "generate_reply";
pub const EXTRACT_TASKS: &str = "extract_tasks";

/// One plain completion, trimmed. Provider failures become a `NodeError` for `node`.
async fn complete_text(
    llm: &dyn LlmProvider,
    node: &str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
) -> Result<String, WorkflowError> {
    let request = CompletionRequest::new(messages).with_max_tokens(max_tokens);
    let response = llm
        .complete(request)
        .await
        .map_err(|e| WorkflowError::node(node, e))?;
    Ok(response.content.trim().to_string())
}

/// Derived fields are write-once; a refused write keeps the earlier value.
fn warn_if_kept(ctx: &mut NodeContext, written: bool, field: &str) {
    if !written {
        ctx.warn(format!("{field} was already set; kept the earlier value"));
    }
}
