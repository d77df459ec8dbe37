//! Classification and the urgent-alert step.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::channels::Notifier;
use crate::config::ClassificationPreferences;
use crate::error::WorkflowError;
use crate::llm::{ChatMessage, LlmProvider};
use crate::workflow::graph::{Node, NodeContext};
use crate::workflow::nodes::{CLASSIFY_EMAIL, SEND_NOTIFICATION, complete_text, warn_if_kept};
use crate::workflow::state::WorkflowState;

const CLASSIFY_MAX_TOKENS: u32 = 20;
const ALERT_MAX_TOKENS: u32 = 256;

/// Labels the model is asked to choose from.
pub const CATEGORIES: [&str; 5] = ["urgent", "high_priority", "low_priority", "spam", "other"];

/// Tag used when the model answers with nothing.
const FALLBACK_TAG: &str = "other";

fn build_classify_system_prompt(preferences: &ClassificationPreferences) -> String {
    let mut prompt = String::from(
        "You are a helpful assistant that classifies emails based on their content. \
         Classify the email into one of these categories: 'urgent', 'high_priority', \
         'low_priority', 'spam', or 'other'. Just return the tag.",
    );
    if !preferences.is_empty() {
        prompt.push_str(&format!(
            "\n\nUser preferences for classification:\n\
             - Urgent criteria: {}\n\
             - High priority criteria: {}\n\
             Use these preferences to improve your classification.",
            preferences.urgent_criteria.as_deref().unwrap_or(""),
            preferences.high_priority_criteria.as_deref().unwrap_or(""),
        ));
    }
    prompt
}

/// Normalise the model's answer into a tag: trimmed, unquoted, lowercase.
fn normalize_tag(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| c == '\'' || c == '"' || c == '`' || c == '.')
        .trim()
        .to_ascii_lowercase()
}

/// Appends one classification tag.
pub struct ClassifyEmail {
    llm: Arc<dyn LlmProvider>,
    preferences: ClassificationPreferences,
}

impl ClassifyEmail {
    pub fn new(llm: Arc<dyn LlmProvider>, preferences: ClassificationPreferences) -> Self {
        Self { llm, preferences }
    }
}

#[async_trait]
impl Node<WorkflowState> for ClassifyEmail {
    fn name(&self) -> &str {
        CLASSIFY_EMAIL
    }

    async fn run(&self, state: &mut WorkflowState, ctx: &mut NodeContext) -> Result<(), WorkflowError> {
        let messages = vec![
            ChatMessage::system(build_classify_system_prompt(&self.preferences)),
            ChatMessage::user(format!("Classify this email:\n\n{}", state.email_body)),
        ];
        let raw = complete_text(self.llm.as_ref(), CLASSIFY_EMAIL, messages, CLASSIFY_MAX_TOKENS).await?;

        let mut tag = normalize_tag(&raw);
        if tag.is_empty() {
            ctx.warn(format!("empty classification; tagging as '{FALLBACK_TAG}'"));
            tag = FALLBACK_TAG.to_string();
        } else if !CATEGORIES.contains(&tag.as_str()) {
            ctx.warn(format!("classification '{tag}' is not a known category"));
        }

        info!(run_id = %ctx.run_id(), tag = %tag, "Classified email");
        state.push_tag(tag);
        Ok(())
    }
}

fn build_alert_prompt(state: &WorkflowState) -> String {
    format!(
        "You're an alert system. Generate a short, high-priority alert message \
         based on the following email.\n\n\
         Subject: {}\n\
         Body: {}\n\n\
         Respond only with the alert message.",
        state.email_subject.as_deref().unwrap_or("No Subject"),
        state.email_body,
    )
}

/// Generates an alert and delivers it. Delivery problems are warnings.
pub struct SendNotification {
    llm: Arc<dyn LlmProvider>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl SendNotification {
    pub fn new(llm: Arc<dyn LlmProvider>, notifier: Option<Arc<dyn Notifier>>) -> Self {
        Self { llm, notifier }
    }
}

#[async_trait]
impl Node<WorkflowState> for SendNotification {
    fn name(&self) -> &str {
        SEND_NOTIFICATION
    }

    async fn run(&self, state: &mut WorkflowState, ctx: &mut NodeContext) -> Result<(), WorkflowError> {
        let alert = complete_text(
            self.llm.as_ref(),
            SEND_NOTIFICATION,
            vec![ChatMessage::user(build_alert_prompt(state))],
            ALERT_MAX_TOKENS,
        )
        .await?;

        match &self.notifier {
            Some(notifier) => match notifier.notify(&alert).await {
                Ok(()) => info!(run_id = %ctx.run_id(), channel = notifier.name(), "Alert delivered"),
                Err(e) => ctx.warn(format!("alert delivery via {} failed: {e}", notifier.name())),
            },
            None => ctx.warn("no notifier configured; alert not delivered"),
        }

        let written = state.derived_mut().set_alert(alert);
        warn_if_kept(ctx, written, "alert");
        Ok(())
    }
}
