//! The reasoning step: one model turn that either answers or asks for tools.

use std::sync::Arc;

use crate::error::LlmError;
use crate::llm::{
    ChatMessage, CompletionRequest, LlmProvider, ToolCall, ToolCompletionRequest, ToolDefinition,
};

/// Low temperature for the tool-selecting call.
const TOOL_TEMPERATURE: f32 = 0.1;

/// What the model chose to do on its turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Answer(String),
    UseTools {
        calls: Vec<ToolCall>,
        /// Text the model sent alongside the calls, if any.
        preamble: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub decision: Decision,
    pub tokens: u32,
}

/// A provider paired with the fixed set of tools it may request.
pub struct Reasoning {
    llm: Arc<dyn LlmProvider>,
    tools: Vec<ToolDefinition>,
}

impl Reasoning {
    pub fn new(llm: Arc<dyn LlmProvider>, tools: Vec<ToolDefinition>) -> Self {
        Self { llm, tools }
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Ask for a decision on `history`. With no tools registered this is a
    /// plain completion and always yields an answer.
    pub async fn decide(&self, history: Vec<ChatMessage>, run_id: &str) -> Result<Turn, LlmError> {
        if self.tools.is_empty() {
            let request = CompletionRequest::new(history).with_temperature(TOOL_TEMPERATURE);
            let response = self.llm.complete(request).await?;
            return Ok(Turn {
                decision: Decision::Answer(response.content),
                tokens: response.input_tokens + response.output_tokens,
            });
        }

        let mut request = ToolCompletionRequest::new(history, self.tools.clone())
            .with_temperature(TOOL_TEMPERATURE);
        request.metadata.insert("run_id".into(), run_id.into());
        let response = self.llm.complete_with_tools(request).await?;

        let decision = if response.tool_calls.is_empty() {
            Decision::Answer(response.content.unwrap_or_default())
        } else {
            Decision::UseTools {
                calls: response.tool_calls,
                preamble: response.content,
            }
        };
        Ok(Turn {
            decision,
            tokens: response.input_tokens + response.output_tokens,
        })
    }
}
