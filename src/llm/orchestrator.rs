//! LLM tool loop.
//!
//! Each step streams one model response. When the model finishes with tool
//! calls, they run one after another through the [`ToolRegistry`], their
//! results are appended to the conversation and the next step starts. The
//! loop ends when the model answers without tools or after
//! [`MAX_TOOL_STEPS`] model calls.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::normalized::NormalizedEvent;
use crate::tools::ToolRegistry;

use super::{ChatCompletionsDriver, LlmDriver, LlmRequest, LlmSettings, Message, ToolCall, ToolCallFunction};

/// Upper bound on model calls per chat turn.
pub const MAX_TOOL_STEPS: usize = 5;

#[derive(Debug, Default, Clone)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<ToolRegistry>,
    driver: Arc<dyn LlmDriver>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Orchestrator backed by the Chat Completions driver.
    pub fn new(settings: LlmSettings, registry: Arc<ToolRegistry>) -> Self {
        Self::with_driver(Arc::new(ChatCompletionsDriver::new(settings)), registry)
    }

    pub fn with_driver(driver: Arc<dyn LlmDriver>, registry: Arc<ToolRegistry>) -> Self {
        Self { registry, driver }
    }

    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run the tool loop for one chat turn.
    ///
    /// Emits `StreamStart`, the model's deltas, a `ToolResult` per executed
    /// call, and finally `Done` or `Error`. Tools are only offered to the
    /// model when `use_tools` is set.
    #[allow(clippy::too_many_lines)]
    pub fn chat_with_history(
        &self,
        user_id: &str,
        messages: Vec<Message>,
        use_tools: bool,
    ) -> impl Stream<Item = NormalizedEvent> + Send + 'static {
        let request_id = Uuid::new_v4().to_string();
        let tools = if use_tools {
            self.registry.openai_tools_json()
        } else {
            Vec::new()
        };

        tracing::info!(
            request_id = %request_id,
            user_id,
            message_count = messages.len(),
            tool_count = tools.len(),
            "Starting orchestrator chat"
        );

        let orchestrator = self.clone();
        let user_id = user_id.to_string();

        async_stream::stream! {
            yield NormalizedEvent::StreamStart {
                request_id: request_id.clone(),
            };

            let mut message_json: Vec<Value> = messages
                .iter()
                .map(|m| serde_json::to_value(m).unwrap_or_default())
                .collect();

            for step in 1..=MAX_TOOL_STEPS {
                tracing::debug!(
                    request_id = %request_id,
                    step,
                    message_count = message_json.len(),
                    "Starting tool loop step"
                );

                let req = LlmRequest {
                    messages: message_json.clone(),
                    tools: tools.clone(),
                };

                let driver_stream = match orchestrator.driver.stream(req).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!(request_id = %request_id, step, error = %e, "Failed to create driver stream");
                        yield NormalizedEvent::Error {
                            message: e.to_string(),
                            code: Some("LLM_UNAVAILABLE".to_string()),
                        };
                        return;
                    }
                };

                let mut tool_accumulators: BTreeMap<usize, ToolCallAccumulator> = BTreeMap::new();
                let mut assistant_text = String::new();
                let mut tool_phase = false;

                futures::pin_mut!(driver_stream);
                while let Some(result) = driver_stream.next().await {
                    let event = match result {
                        Ok(event) => event,
                        Err(e) => {
                            tracing::error!(request_id = %request_id, step, error = %e, "Driver stream failed");
                            yield NormalizedEvent::Error {
                                message: e.to_string(),
                                code: None,
                            };
                            return;
                        }
                    };

                    match &event {
                        NormalizedEvent::MessageDelta { text } => assistant_text.push_str(text),
                        NormalizedEvent::ToolCallDelta {
                            call_index,
                            id,
                            name,
                            arguments_delta,
                        } => {
                            let acc = tool_accumulators.entry(*call_index).or_default();
                            if acc.id.is_none() {
                                acc.id.clone_from(id);
                            }
                            if acc.name.is_none() {
                                acc.name.clone_from(name);
                            }
                            if let Some(delta) = arguments_delta {
                                acc.arguments.push_str(delta);
                            }
                        }
                        NormalizedEvent::ToolCallComplete { call_index, id, name, arguments_json } => {
                            tool_phase = true;
                            // Drivers that skip deltas still report the full call here.
                            let acc = tool_accumulators.entry(*call_index).or_default();
                            acc.id = Some(id.clone());
                            acc.name = Some(name.clone());
                            acc.arguments.clone_from(arguments_json);
                        }
                        // The turn's Done is emitted once, after the last step.
                        NormalizedEvent::Done | NormalizedEvent::StreamStart { .. } => continue,
                        NormalizedEvent::Error { .. } => {
                            yield event;
                            return;
                        }
                        NormalizedEvent::ToolResult { .. } => {}
                    }
                    yield event;
                }

                let tool_calls: Vec<ToolCall> = if tool_phase {
                    tool_accumulators
                        .into_values()
                        .filter_map(|acc| {
                            Some(ToolCall {
                                id: acc.id?,
                                call_type: "function".to_string(),
                                function: ToolCallFunction {
                                    name: acc.name?,
                                    arguments: acc.arguments,
                                },
                            })
                        })
                        .collect()
                } else {
                    Vec::new()
                };

                if tool_calls.is_empty() {
                    tracing::info!(request_id = %request_id, step, "Model answered without tools");
                    yield NormalizedEvent::Done;
                    return;
                }

                message_json.push(json!({
                    "role": "assistant",
                    "content": if assistant_text.is_empty() { Value::Null } else { Value::String(assistant_text.clone()) },
                    "tool_calls": &tool_calls,
                }));

                for tool_call in &tool_calls {
                    let name = &tool_call.function.name;
                    let arguments: Value = serde_json::from_str(&tool_call.function.arguments)
                        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

                    tracing::info!(
                        request_id = %request_id,
                        step,
                        tool_call_id = %tool_call.id,
                        tool = %name,
                        "Executing tool call"
                    );

                    let result = orchestrator
                        .registry
                        .execute_named(name, &user_id, arguments)
                        .await;
                    let content = serde_json::to_string(&result).unwrap_or_default();

                    yield NormalizedEvent::ToolResult {
                        id: tool_call.id.clone(),
                        name: name.clone(),
                        result,
                    };

                    message_json.push(json!({
                        "role": "tool",
                        "tool_call_id": tool_call.id,
                        "content": content,
                    }));
                }
            }

            tracing::warn!(
                request_id = %request_id,
                max_steps = MAX_TOOL_STEPS,
                "Tool loop reached its step limit"
            );
            yield NormalizedEvent::Done;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm::EventStream;
    use crate::tools::registry::tests::SpyTool;
    use crate::tools::{ToolHistory, ToolId, ToolResponse};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Plays back one script per call; the last script repeats.
    #[derive(Debug)]
    pub(crate) struct ScriptedDriver {
        scripts: Vec<Vec<NormalizedEvent>>,
        pub calls: AtomicUsize,
        pub requests: Mutex<Vec<Vec<Value>>>,
    }

    impl ScriptedDriver {
        pub(crate) fn new(scripts: Vec<Vec<NormalizedEvent>>) -> Self {
            Self {
                scripts,
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmDriver for ScriptedDriver {
        async fn stream(&self, req: LlmRequest) -> anyhow::Result<EventStream> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(req.tools);
            let script = self.scripts[n.min(self.scripts.len() - 1)].clone();
            Ok(Box::pin(futures::stream::iter(script.into_iter().map(Ok))))
        }
    }

    pub(crate) fn tool_call(id: &str, name: &str, args: &str) -> NormalizedEvent {
        NormalizedEvent::ToolCallComplete {
            call_index: 0,
            id: id.into(),
            name: name.into(),
            arguments_json: args.into(),
        }
    }

    fn registry(spy: Arc<SpyTool>) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new(Arc::new(ToolHistory::new(Duration::from_secs(60), 10)));
        registry.register(spy);
        Arc::new(registry)
    }

    #[tokio::test]
    async fn runs_tools_then_answers() {
        let spy = Arc::new(SpyTool::new(ToolId::Slack, || {
            Ok(ToolResponse::ok(json!({"message": "sent"})))
        }));
        let driver = Arc::new(ScriptedDriver::new(vec![
            vec![tool_call("call_1", "slack", r#"{"ok": true}"#), NormalizedEvent::Done],
            vec![
                NormalizedEvent::MessageDelta { text: "Done!".into() },
                NormalizedEvent::Done,
            ],
        ]));
        let orchestrator = Orchestrator::with_driver(Arc::clone(&driver) as Arc<dyn LlmDriver>, registry(Arc::clone(&spy)));

        let events: Vec<_> = orchestrator
            .chat_with_history("u1", vec![Message::user("post it")], true)
            .collect()
            .await;

        assert!(matches!(events.first(), Some(NormalizedEvent::StreamStart { .. })));
        assert!(matches!(events.last(), Some(NormalizedEvent::Done)));
        assert_eq!(
            events.iter().filter(|e| matches!(e, NormalizedEvent::Done)).count(),
            1
        );
        let result = events.iter().find_map(|e| match e {
            NormalizedEvent::ToolResult { result, .. } => Some(result),
            _ => None,
        });
        assert!(result.unwrap().success);
        assert_eq!(spy.executed.load(Ordering::SeqCst), 1);
        assert_eq!(driver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stops_after_step_limit() {
        let spy = Arc::new(SpyTool::new(ToolId::Slack, || {
            Ok(ToolResponse::ok(json!({"message": "again"})))
        }));
        let driver = Arc::new(ScriptedDriver::new(vec![vec![
            tool_call("call_n", "slack", r#"{"ok": true}"#),
            NormalizedEvent::Done,
        ]]));
        let orchestrator = Orchestrator::with_driver(Arc::clone(&driver) as Arc<dyn LlmDriver>, registry(Arc::clone(&spy)));

        let events: Vec<_> = orchestrator
            .chat_with_history("u1", vec![Message::user("loop")], true)
            .collect()
            .await;

        assert_eq!(driver.calls.load(Ordering::SeqCst), MAX_TOOL_STEPS);
        assert_eq!(spy.executed.load(Ordering::SeqCst), MAX_TOOL_STEPS);
        assert!(matches!(events.last(), Some(NormalizedEvent::Done)));
    }

    #[tokio::test]
    async fn tools_withheld_when_disabled() {
        let spy = Arc::new(SpyTool::new(ToolId::Slack, || Ok(ToolResponse::ok(Value::Null))));
        let driver = Arc::new(ScriptedDriver::new(vec![vec![
            NormalizedEvent::MessageDelta { text: "Hi".into() },
            NormalizedEvent::Done,
        ]]));
        let orchestrator = Orchestrator::with_driver(Arc::clone(&driver) as Arc<dyn LlmDriver>, registry(spy));

        let _: Vec<_> = orchestrator
            .chat_with_history("u1", vec![Message::user("hello")], false)
            .collect()
            .await;

        assert!(driver.requests.lock().unwrap()[0].is_empty());
    }
}
