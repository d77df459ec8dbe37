//! Runs inbound emails through the workflow and records the outcome.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::recorder::RunRecorder;
use super::types::{InboundEmail, ProcessedEmail};
use crate::workflow::EmailWorkflow;

pub struct EmailProcessor {
    workflow: Arc<EmailWorkflow>,
    recorder: Option<Arc<dyn RunRecorder>>,
}

impl EmailProcessor {
    pub fn new(workflow: Arc<EmailWorkflow>) -> Self {
        Self {
            workflow,
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn RunRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Process one email. Never fails: a workflow error becomes a record
    /// with `processing_error` set, and the email is still marked processed.
    pub async fn process(&self, email: &InboundEmail) -> ProcessedEmail {
        debug!(email_id = %email.id, from = %email.from, "Processing email");

        let processed = match self.workflow.run(email.to_state()).await {
            Ok(output) => {
                info!(
                    email_id = %email.id,
                    run_id = %output.run_id,
                    tags = ?output.state.tags(),
                    warnings = output.warnings.len(),
                    elapsed_ms = output.elapsed.as_millis() as u64,
                    "Email processed"
                );
                ProcessedEmail::from_run(email, &output)
            }
            Err(e) => {
                error!(email_id = %email.id, kind = e.kind(), "Email processing failed: {e}");
                ProcessedEmail::failed(email, &e)
            }
        };

        if let Some(recorder) = &self.recorder
            && let Err(e) = recorder.record(&processed).await
        {
            warn!(email_id = %email.id, "Failed to record processed email: {e:#}");
        }

        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;
    use crate::pipeline::recorder::MemoryRecorder;
    use crate::pipeline::types::PostmarkInbound;
    use crate::tools::ToolRegistry;
    use crate::workflow::WorkflowDeps;

    fn processor(llm: ScriptedLlm, recorder: Arc<MemoryRecorder>) -> EmailProcessor {
        let workflow =
            EmailWorkflow::new(WorkflowDeps::new(Arc::new(llm), Arc::new(ToolRegistry::new())))
                .unwrap();
        EmailProcessor::new(Arc::new(workflow)).with_recorder(recorder)
    }

    fn email(body: &str) -> InboundEmail {
        InboundEmail::from_postmark(PostmarkInbound {
            from: "ana@example.com".into(),
            subject: "Status".into(),
            text_body: body.into(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn success_is_recorded() {
        let llm = ScriptedLlm::new()
            .with_reply_when("Classify this email", "low_priority")
            .with_reply_when("concise 1-2 sentence summary", "Status update.")
            .with_reply_when("drafting a professional reply", "Noted, thanks.")
            .with_reply_when("task extraction assistant", "[]");
        let recorder = Arc::new(MemoryRecorder::new());
        let processed = processor(llm, recorder.clone())
            .process(&email("All systems nominal."))
            .await;

        assert!(processed.succeeded());
        assert_eq!(processed.tags, vec!["low_priority"]);
        assert_eq!(processed.ai_reply.as_deref(), Some("Noted, thanks."));
        assert_eq!(recorder.records().await.len(), 1);
    }

    #[tokio::test]
    async fn failure_is_recorded_as_processed() {
        let llm = ScriptedLlm::new().failing_when("Classify this email", "overloaded");
        let recorder = Arc::new(MemoryRecorder::new());
        let processed = processor(llm, recorder.clone())
            .process(&email("Hello"))
            .await;

        assert!(!processed.succeeded());
        assert!(processed.is_processed);
        assert_eq!(processed.error_kind.as_deref(), Some("node_error"));

        let records = recorder.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].email_id, processed.email_id);
    }

    #[tokio::test]
    async fn blank_body_fails_without_llm_calls() {
        let llm = ScriptedLlm::new();
        let recorder = Arc::new(MemoryRecorder::new());
        let processed = processor(llm, recorder).process(&email("   ")).await;
        assert_eq!(processed.error_kind.as_deref(), Some("missing_input"));
    }
}
