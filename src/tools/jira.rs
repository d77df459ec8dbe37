//! Jira Cloud backend for `create_jira_ticket`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::info;

use crate::config::non_empty_var;
use crate::error::ToolError;
use crate::tools::tool::{Ticket, TicketArgs, TicketBackend, ToolName};

/// Issue type every ticket is filed as.
const ISSUE_TYPE: &str = "Task";

/// Jira configuration.
#[derive(Debug, Clone)]
pub struct JiraConfig {
    /// Site host, e.g. `acme.atlassian.net`.
    pub domain: String,
    pub project_key: String,
    pub email: String,
    pub api_token: SecretString,
}

impl JiraConfig {
    /// Build from environment. Returns `None` unless all four variables are set.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            domain: non_empty_var("JIRA_DOMAIN")?,
            project_key: non_empty_var("JIRA_PROJECT_KEY")?,
            email: non_empty_var("JIRA_EMAIL")?,
            api_token: SecretString::from(non_empty_var("JIRA_API_TOKEN")?),
        })
    }

    pub fn browse_url(&self, key: &str) -> String {
        format!("https://{}/browse/{key}", self.domain)
    }
}

pub struct JiraTickets {
    config: JiraConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct CreatedIssue {
    key: String,
}

impl JiraTickets {
    pub fn new(config: JiraConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn failed(reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            name: ToolName::CreateJiraTicket.to_string(),
            reason: reason.into(),
        }
    }
}

/// Request body for a new issue: summary plus an Atlassian-document description.
pub fn build_issue_payload(project_key: &str, issue: &str) -> serde_json::Value {
    serde_json::json!({
        "fields": {
            "project": {"key": project_key},
            "summary": issue,
            "description": {
                "type": "doc",
                "version": 1,
                "content": [{
                    "type": "paragraph",
                    "content": [{"type": "text", "text": issue}]
                }]
            },
            "issuetype": {"name": ISSUE_TYPE}
        }
    })
}

#[async_trait]
impl TicketBackend for JiraTickets {
    async fn create_ticket(&self, args: &TicketArgs) -> Result<Ticket, ToolError> {
        let url = format!("https://{}/rest/api/3/issue", self.config.domain);
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.config.email, Some(self.config.api_token.expose_secret()))
            .header("Accept", "application/json")
            .json(&build_issue_payload(&self.config.project_key, &args.issue))
            .send()
            .await
            .map_err(|e| Self::failed(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ToolError::AuthRequired {
                name: ToolName::CreateJiraTicket.to_string(),
            });
        }
        if status != reqwest::StatusCode::CREATED {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::failed(format!(
                "Failed to create issue (HTTP {status}): {text}"
            )));
        }

        let created: CreatedIssue = resp
            .json()
            .await
            .map_err(|e| Self::failed(format!("invalid response: {e}")))?;
        info!(ticket = %created.key, "Created Jira ticket");

        Ok(Ticket {
            ticket_url: self.config.browse_url(&created.key),
            ticket_id: created.key,
        })
    }
}
