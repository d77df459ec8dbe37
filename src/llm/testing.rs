//! Scripted `LlmProvider` for tests.
//!
//! Plain completions are answered by the first rule whose needle appears in
//! any request message; tool completions pop a queue of scripted turns.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse,
};

enum Scripted {
    Reply(String),
    Fail(String),
}

enum ToolTurn {
    Text(String),
    Calls(Vec<ToolCall>),
    Fail(String),
}

/// Deterministic LLM double.
pub struct ScriptedLlm {
    rules: Vec<(String, Scripted)>,
    default_reply: String,
    tool_turns: Mutex<VecDeque<ToolTurn>>,
    requests: Mutex<Vec<CompletionRequest>>,
    tool_requests: Mutex<Vec<ToolCompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default_reply: String::new(),
            tool_turns: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            tool_requests: Mutex::new(Vec::new()),
        }
    }

    /// Fallback reply for plain completions no rule matched.
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    /// Reply with `reply` when any message contains `needle`.
    pub fn with_reply_when(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules
            .push((needle.into(), Scripted::Reply(reply.into())));
        self
    }

    /// Fail plain completions whose messages contain `needle`.
    pub fn failing_when(mut self, needle: impl Into<String>, reason: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Scripted::Fail(reason.into())));
        self
    }

    /// Queue a tool-completion turn that requests `calls`.
    pub fn with_tool_calls(self, calls: Vec<ToolCall>) -> Self {
        self.push_turn(ToolTurn::Calls(calls))
    }

    /// Queue a tool-completion turn that answers with text only.
    pub fn with_tool_text(self, text: impl Into<String>) -> Self {
        self.push_turn(ToolTurn::Text(text.into()))
    }

    /// Queue a failing tool-completion turn.
    pub fn with_tool_failure(self, reason: impl Into<String>) -> Self {
        self.push_turn(ToolTurn::Fail(reason.into()))
    }

    fn push_turn(self, turn: ToolTurn) -> Self {
        if let Ok(mut turns) = self.tool_turns.lock() {
            turns.push_back(turn);
        }
        self
    }

    /// Plain completion requests seen so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of tool completion requests seen so far.
    pub fn tool_request_count(&self) -> usize {
        self.tool_requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self::new()
    }
}

fn failure(reason: &str) -> LlmError {
    LlmError::RequestFailed {
        provider: "scripted".into(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let matched = self.rules.iter().find(|(needle, _)| {
            request
                .messages
                .iter()
                .any(|m| m.content.contains(needle.as_str()))
        });
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request.clone());
        }

        let content = match matched {
            Some((_, Scripted::Fail(reason))) => return Err(failure(reason)),
            Some((_, Scripted::Reply(reply))) => reply.clone(),
            None => self.default_reply.clone(),
        };

        Ok(CompletionResponse {
            content,
            input_tokens: 10,
            output_tokens: 5,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        if let Ok(mut seen) = self.tool_requests.lock() {
            seen.push(request);
        }
        let turn = self
            .tool_turns
            .lock()
            .ok()
            .and_then(|mut turns| turns.pop_front())
            .unwrap_or_else(|| ToolTurn::Text(String::new()));

        let (content, tool_calls, finish_reason) = match turn {
            ToolTurn::Fail(reason) => return Err(failure(&reason)),
            ToolTurn::Text(text) => (Some(text), Vec::new(), FinishReason::Stop),
            ToolTurn::Calls(calls) => (None, calls, FinishReason::ToolUse),
        };

        Ok(ToolCompletionResponse {
            content,
            tool_calls,
            input_tokens: 10,
            output_tokens: 5,
            finish_reason,
        })
    }
}
