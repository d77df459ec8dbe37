//! Pure routing functions. They read the post-node state and never mutate it.

use crate::workflow::state::WorkflowState;

pub const NOTIFY: &str = "notify";
pub const SKIP: &str = "skip";
pub const TOOLS: &str = "tools";
pub const SUMMARIZE: &str = "summarize";

/// Tag that sends an email through the notification node.
pub const URGENT_TAG: &str = "urgent";

/// After classification: alert on `urgent`, otherwise go straight to reasoning.
pub fn priority_check(state: &WorkflowState) -> &'static str {
    if state.has_tag(URGENT_TAG) {
        NOTIFY
    } else {
        SKIP
    }
}

/// After the reasoning node: enter the tool sub-loop only when calls were requested.
pub fn tool_route(state: &WorkflowState) -> &'static str {
    if state.tool_call_requested() {
        TOOLS
    } else {
        SUMMARIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCall;

    #[test]
    fn urgent_anywhere_in_tags_notifies() {
        let mut state = WorkflowState::new("server down");
        state.push_tag("issue");
        state.push_tag("urgent");
        assert_eq!(priority_check(&state), NOTIFY);
    }

    #[test]
    fn non_urgent_skips() {
        let mut state = WorkflowState::new("newsletter");
        state.push_tag("high_priority");
        assert_eq!(priority_check(&state), SKIP);
        assert_eq!(priority_check(&WorkflowState::new("untagged")), SKIP);
    }

    #[test]
    fn tool_route_follows_flag() {
        let mut state = WorkflowState::new("body");
        assert_eq!(tool_route(&state), SUMMARIZE);

        state.request_tool_calls(vec![ToolCall {
            id: "c1".into(),
            name: "create_calendar_event".into(),
            arguments: serde_json::json!({"meeting": "Sync"}),
        }]);
        assert_eq!(tool_route(&state), TOOLS);
    }
}
