//! OpenAI Chat Completions streaming driver.

use std::collections::BTreeMap;

use futures::StreamExt;
use serde_json::{Value, json};

use crate::normalized::NormalizedEvent;

use super::{EventStream, LlmDriver, LlmRequest, LlmSettings};

/// Accumulated state for a streaming tool call.
#[derive(Debug, Default)]
struct ToolAccum {
    id: Option<String>,
    name: Option<String>,
    args: String,
}

/// Driver for `/v1/chat/completions` with `stream: true`.
#[derive(Debug, Clone)]
pub struct ChatCompletionsDriver {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl ChatCompletionsDriver {
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }
}

#[async_trait::async_trait]
impl LlmDriver for ChatCompletionsDriver {
    async fn stream(&self, req: LlmRequest) -> anyhow::Result<EventStream> {
        let url = self
            .settings
            .provider
            .build_chat_url(&self.settings.base_url, &self.settings.model);

        let mut body = json!({
            "model": self.settings.model,
            "stream": true,
            "messages": req.messages,
        });
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools);
            body["tool_choice"] = json!("auto");
        }

        let mut rb = self.http.post(&url).json(&body);
        if let Some(k) = &self.settings.api_key {
            rb = if self.settings.provider.uses_api_key_header() {
                rb.header("api-key", k)
            } else {
                rb.bearer_auth(k)
            };
        }

        let resp = rb.send().await?.error_for_status()?;
        let byte_stream = resp.bytes_stream();

        let out = async_stream::try_stream! {
            let mut buf = Vec::<u8>::new();
            let mut tool_accum: BTreeMap<usize, ToolAccum> = BTreeMap::new();

            futures::pin_mut!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk?;
                buf.extend_from_slice(&chunk);

                while let Some(pos) = find_double_newline(&buf) {
                    let frame = buf.drain(..pos + 2).collect::<Vec<_>>();
                    let text = String::from_utf8_lossy(&frame);

                    for line in text.lines() {
                        let Some(data) = line.trim().strip_prefix("data:") else {
                            continue;
                        };
                        let data = data.trim();

                        if data == "[DONE]" {
                            yield NormalizedEvent::Done;
                            continue;
                        }

                        let v: Value = serde_json::from_str(data)?;
                        for event in parse_chunk(&v, &mut tool_accum) {
                            yield event;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(out))
    }
}

/// Translate one streamed completion chunk into events, assembling tool
/// call fragments in `tool_accum`.
fn parse_chunk(v: &Value, tool_accum: &mut BTreeMap<usize, ToolAccum>) -> Vec<NormalizedEvent> {
    let mut events = Vec::new();
    let choice = &v["choices"][0];
    let delta = &choice["delta"];

    if let Some(s) = delta.get("content").and_then(Value::as_str)
        && !s.is_empty()
    {
        events.push(NormalizedEvent::MessageDelta {
            text: s.to_string(),
        });
    }

    if let Some(arr) = delta.get("tool_calls").and_then(Value::as_array) {
        for tc in arr {
            let idx = tc.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
            let id = tc.get("id").and_then(Value::as_str).map(ToString::to_string);
            let name = tc
                .pointer("/function/name")
                .and_then(Value::as_str)
                .map(ToString::to_string);
            let args_delta = tc
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .map(ToString::to_string);

            let entry = tool_accum.entry(idx).or_default();
            if entry.id.is_none() {
                entry.id.clone_from(&id);
            }
            if entry.name.is_none() {
                entry.name.clone_from(&name);
            }
            if let Some(ad) = &args_delta {
                entry.args.push_str(ad);
            }

            events.push(NormalizedEvent::ToolCallDelta {
                call_index: idx,
                id,
                name,
                arguments_delta: args_delta,
            });
        }
    }

    if choice.get("finish_reason").and_then(Value::as_str) == Some("tool_calls") {
        for (idx, a) in std::mem::take(tool_accum) {
            if let (Some(id), Some(name)) = (a.id, a.name) {
                events.push(NormalizedEvent::ToolCallComplete {
                    call_index: idx,
                    id,
                    name,
                    arguments_json: a.args,
                });
            }
        }
    }

    events
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_deltas() {
        let mut acc = BTreeMap::new();
        let events = parse_chunk(
            &json!({"choices": [{"delta": {"content": "Hel"}}]}),
            &mut acc,
        );
        assert_eq!(
            events,
            vec![NormalizedEvent::MessageDelta {
                text: "Hel".into()
            }]
        );
        assert!(parse_chunk(&json!({"choices": [{"delta": {"content": ""}}]}), &mut acc).is_empty());
    }

    #[test]
    fn tool_call_fragments_assemble_on_finish() {
        let mut acc = BTreeMap::new();
        parse_chunk(
            &json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "function": {"name": "zoom", "arguments": "{\"topic\":"}}
            ]}}]}),
            &mut acc,
        );
        parse_chunk(
            &json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"Sync\"}"}}
            ]}}]}),
            &mut acc,
        );
        let events = parse_chunk(
            &json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
            &mut acc,
        );
        assert_eq!(
            events,
            vec![NormalizedEvent::ToolCallComplete {
                call_index: 0,
                id: "call_1".into(),
                name: "zoom".into(),
                arguments_json: "{\"topic\":\"Sync\"}".into(),
            }]
        );
        assert!(acc.is_empty());
    }

    #[test]
    fn frames_split_on_blank_line() {
        assert_eq!(find_double_newline(b"data: x\n\ndata: y"), Some(7));
        assert_eq!(find_double_newline(b"data: x\n"), None);
    }
}
