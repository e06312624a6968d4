use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};

use super::calendar::CalendarTool;
use super::crm::{CrmContactsTool, CrmDealsTool};
use super::docs::DocsTool;
use super::history::{ToolAction, ToolHistory};
use super::linkedin::LinkedinTool;
use super::meet::MeetTool;
use super::slack::SlackTool;
use super::teams::TeamsTool;
use super::zoom::ZoomTool;
use super::{Tool, ToolConfig, ToolContext, ToolId, ToolResponse};

fn build_tool(id: ToolId, ctx: Arc<ToolContext>) -> Arc<dyn Tool> {
    match id {
        ToolId::GoogleCalendar => Arc::new(CalendarTool::new(ctx)),
        ToolId::CrmContacts => Arc::new(CrmContactsTool::new(ctx)),
        ToolId::CrmDeals => Arc::new(CrmDealsTool::new(ctx)),
        ToolId::Zoom => Arc::new(ZoomTool::new(ctx)),
        ToolId::GoogleMeet => Arc::new(MeetTool::new(ctx)),
        ToolId::Slack => Arc::new(SlackTool::new(ctx)),
        ToolId::Linkedin => Arc::new(LinkedinTool::new(ctx)),
        ToolId::MicrosoftTeams => Arc::new(TeamsTool::new(ctx)),
        ToolId::GoogleDocs => Arc::new(DocsTool::new(ctx)),
    }
}

/// Tool lookup and uniform execution.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<ToolId, Arc<dyn Tool>>,
    history: Arc<ToolHistory>,
}

impl ToolRegistry {
    /// An empty registry. Mostly useful in tests.
    pub fn new(history: Arc<ToolHistory>) -> Self {
        Self {
            tools: BTreeMap::new(),
            history,
        }
    }

    /// Registry with every built-in tool.
    pub fn standard(ctx: Arc<ToolContext>, history: Arc<ToolHistory>) -> Self {
        let mut registry = Self::new(history);
        for id in ToolId::ALL {
            registry.register(build_tool(id, Arc::clone(&ctx)));
        }
        registry
    }

    /// Add or replace the tool registered under its config id.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let id = tool.config().id;
        if self.tools.insert(id, tool).is_some() {
            tracing::debug!(tool = %id, "Replaced registered tool");
        }
    }

    pub fn get_tool(&self, id: ToolId) -> Option<&Arc<dyn Tool>> {
        self.tools.get(&id)
    }

    pub fn get_all_tools(&self) -> Vec<&ToolConfig> {
        self.tools.values().map(|t| t.config()).collect()
    }

    /// Tools with a capability containing `keyword` (case-insensitive).
    pub fn find_by_capability(&self, keyword: &str) -> Vec<&ToolConfig> {
        let keyword = keyword.to_lowercase();
        self.tools
            .values()
            .map(|t| t.config())
            .filter(|cfg| {
                cfg.capabilities
                    .iter()
                    .any(|c| c.to_lowercase().contains(&keyword))
            })
            .collect()
    }

    pub fn history(&self) -> &ToolHistory {
        &self.history
    }

    /// Validate, execute and record a tool call. Never fails: every outcome
    /// is a [`ToolResponse`].
    pub async fn execute_with_logging(
        &self,
        id: ToolId,
        user_id: &str,
        input: Value,
    ) -> ToolResponse {
        let Some(tool) = self.tools.get(&id) else {
            tracing::warn!(tool = %id, "Tool not registered");
            return ToolResponse::error(format!("The {id} tool is not available."));
        };

        let started = Instant::now();
        let response = if let Some(invalid) = tool.validate(&input) {
            tracing::debug!(tool = %id, user_id, "Tool input rejected");
            invalid
        } else {
            match tool.execute(user_id, input).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(tool = %id, user_id, error = %err, "Tool execution failed");
                    err.into_response(id.provider())
                }
            }
        };

        tracing::info!(
            name: "tool.executed",
            tool = %id,
            user_id,
            success = response.success,
            ui = ?response.ui_kind(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tool executed"
        );

        self.history
            .record(user_id, ToolAction::from_response(id, &response));
        response
    }

    /// Execute by LLM function name.
    pub async fn execute_named(&self, name: &str, user_id: &str, input: Value) -> ToolResponse {
        match name.parse::<ToolId>() {
            Ok(id) => self.execute_with_logging(id, user_id, input).await,
            Err(e) => {
                tracing::warn!(tool = name, "Unknown tool requested");
                ToolResponse::error(e.to_string())
            }
        }
    }

    /// Function definitions in the Chat Completions `tools` format.
    pub fn openai_tools_json(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|t| {
                let cfg = t.config();
                json!({
                    "type": "function",
                    "function": {
                        "name": cfg.id.as_str(),
                        "description": cfg.description,
                        "parameters": cfg.parameters,
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tools::{ToolError, UiKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records how often `execute` runs. Rejects input without `ok: true`.
    #[derive(Debug)]
    pub(crate) struct SpyTool {
        config: ToolConfig,
        pub executed: AtomicUsize,
        outcome: fn() -> Result<ToolResponse, ToolError>,
    }

    impl SpyTool {
        pub(crate) fn new(id: ToolId, outcome: fn() -> Result<ToolResponse, ToolError>) -> Self {
            Self {
                config: ToolConfig::new(id, "Spy", "Test double")
                    .capabilities(&["send messages", "spy"]),
                executed: AtomicUsize::new(0),
                outcome,
            }
        }
    }

    #[async_trait]
    impl Tool for SpyTool {
        fn config(&self) -> &ToolConfig {
            &self.config
        }

        fn validate(&self, input: &Value) -> Option<ToolResponse> {
            if input.get("ok").and_then(Value::as_bool) == Some(true) {
                None
            } else {
                Some(ToolResponse::needs_input("ok", "Set ok to true"))
            }
        }

        async fn execute(&self, _user_id: &str, _input: Value) -> Result<ToolResponse, ToolError> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn registry_with(spy: Arc<SpyTool>) -> ToolRegistry {
        let mut registry =
            ToolRegistry::new(Arc::new(ToolHistory::new(Duration::from_secs(60), 10)));
        registry.register(spy);
        registry
    }

    #[tokio::test]
    async fn failed_validation_short_circuits_execute() {
        let spy = Arc::new(SpyTool::new(ToolId::Slack, || {
            Ok(ToolResponse::ok(json!({"message": "sent"})))
        }));
        let registry = registry_with(Arc::clone(&spy));

        let resp = registry
            .execute_with_logging(ToolId::Slack, "u1", json!({}))
            .await;
        assert!(!resp.success);
        assert_eq!(resp.needs_input.unwrap().field, "ok");
        assert_eq!(spy.executed.load(Ordering::SeqCst), 0);

        let resp = registry
            .execute_with_logging(ToolId::Slack, "u1", json!({"ok": true}))
            .await;
        assert!(resp.success);
        assert_eq!(spy.executed.load(Ordering::SeqCst), 1);
        assert_eq!(registry.history().recent("u1").len(), 2);
    }

    #[tokio::test]
    async fn errors_become_responses() {
        let spy = Arc::new(SpyTool::new(ToolId::Slack, || {
            Err(ToolError::provider("slack", "channel_not_found"))
        }));
        let registry = registry_with(spy);
        let resp = registry
            .execute_named("slack", "u1", json!({"ok": true}))
            .await;
        assert_eq!(resp.ui_kind(), Some(UiKind::Error));

        let missing = registry
            .execute_with_logging(ToolId::Zoom, "u1", json!({}))
            .await;
        assert!(!missing.success);

        let unknown = registry.execute_named("telegraph", "u1", json!({})).await;
        assert!(unknown.error.unwrap().contains("telegraph"));
    }

    #[test]
    fn capability_search_and_function_defs() {
        let registry = registry_with(Arc::new(SpyTool::new(ToolId::Slack, || {
            Ok(ToolResponse::ok(Value::Null))
        })));
        assert_eq!(registry.find_by_capability("MESSAGES").len(), 1);
        assert!(registry.find_by_capability("calendar").is_empty());
        assert_eq!(registry.get_all_tools().len(), 1);
        assert!(registry.get_tool(ToolId::Slack).is_some());

        let defs = registry.openai_tools_json();
        assert_eq!(defs[0]["function"]["name"], "slack");
        assert_eq!(defs[0]["type"], "function");
    }
}
