//! Anthropic Messages API adapter.
//!
//! Anthropic's stream is explicitly typed (`message_start`,
//! `content_block_start/delta/stop`, `message_delta`, `message_stop`), which
//! maps onto the canonical event stream almost one-to-one — this adapter is
//! mostly a rename, plus the one piece of real logic: partial JSON for
//! `input_json_delta` is accumulated per block index and parsed best-effort
//! at `content_block_stop`, and a tool_use left open when `message_delta`
//! reports `stop_reason: "max_tokens"` is flushed with `truncated: true`
//! before `turn_end`.

use super::ProviderAdapter;
use crate::events::{AgentEvent, BlockDelta, BlockStartKind, StopReason};
use crate::tools::Tool;
use crate::types::{ContentBlock, Message, MessageRole};
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Adapter for the Anthropic Messages API (`/v1/messages`, `stream: true`).
#[derive(Debug, Default)]
pub struct AnthropicAdapter {
    /// Block indices currently open as `tool_use`, so `message_delta`'s
    /// `max_tokens` stop reason knows which ones to flush truncated.
    open_tool_use: Vec<u32>,
}

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    MessageStart {
        #[serde(default)]
        message: Option<AnthropicMessageStart>,
    },
    ContentBlockStart {
        index: u32,
        content_block: AnthropicContentBlockStart,
    },
    ContentBlockDelta {
        index: u32,
        delta: AnthropicDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: AnthropicMessageDelta,
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Ping,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicMessageStart {
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlockStart {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

impl ProviderAdapter for AnthropicAdapter {
    fn build_request(
        &self,
        model: &str,
        system_prompt: &str,
        history: &[Message],
        tools: &[Arc<Tool>],
        max_tokens: Option<u32>,
        temperature: f32,
    ) -> Result<Value> {
        let messages = history
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(anthropic_message)
            .collect::<Result<Vec<_>>>()?;

        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": max_tokens.unwrap_or(4096),
            "temperature": temperature,
            "stream": true,
        });

        if !system_prompt.is_empty() {
            body["system"] = json!(system_prompt);
        }

        if !tools.is_empty() {
            let tool_specs: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name(),
                        "description": t.description(),
                        "input_schema": t.input_schema(),
                    })
                })
                .collect();
            body["tools"] = json!(tool_specs);
        }

        Ok(body)
    }

    fn parse_sse_payload(&mut self, payload: &str) -> Result<Vec<AgentEvent>> {
        super::reject_empty_payload(payload)?;

        let event: AnthropicStreamEvent = serde_json::from_str(payload)
            .map_err(|e| Error::stream(format!("invalid anthropic event: {e}")))?;

        let mut events = Vec::new();
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                if let Some(usage) = message.and_then(|m| m.usage) {
                    push_usage(&mut events, usage);
                }
            }
            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                AnthropicContentBlockStart::Text { text } => {
                    events.push(AgentEvent::BlockStart {
                        index,
                        block: BlockStartKind::Text,
                    });
                    if !text.is_empty() {
                        events.push(AgentEvent::BlockDelta {
                            index,
                            delta: BlockDelta::TextDelta { text },
                        });
                    }
                }
                AnthropicContentBlockStart::ToolUse { id, name } => {
                    self.open_tool_use.push(index);
                    events.push(AgentEvent::BlockStart {
                        index,
                        block: BlockStartKind::ToolUse { id, name, thought_signature: None },
                    });
                }
                AnthropicContentBlockStart::Unknown => {}
            },
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicDelta::TextDelta { text } => {
                    events.push(AgentEvent::BlockDelta {
                        index,
                        delta: BlockDelta::TextDelta { text },
                    });
                }
                AnthropicDelta::InputJsonDelta { partial_json } => {
                    events.push(AgentEvent::BlockDelta {
                        index,
                        delta: BlockDelta::InputJsonDelta { partial_json },
                    });
                }
                AnthropicDelta::Unknown => {}
            },
            AnthropicStreamEvent::ContentBlockStop { index } => {
                self.open_tool_use.retain(|i| *i != index);
                events.push(AgentEvent::BlockStop {
                    index,
                    truncated: false,
                });
            }
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    push_usage(&mut events, usage);
                }
                if delta.stop_reason.as_deref() == Some("max_tokens") {
                    for index in self.open_tool_use.drain(..) {
                        events.push(AgentEvent::BlockStop {
                            index,
                            truncated: true,
                        });
                    }
                    events.push(AgentEvent::TurnEnd {
                        reason: StopReason::MaxTokens,
                    });
                } else if let Some(reason) = delta.stop_reason.as_deref() {
                    events.push(AgentEvent::TurnEnd {
                        reason: map_stop_reason(reason),
                    });
                }
            }
            AnthropicStreamEvent::MessageStop | AnthropicStreamEvent::Ping => {}
            AnthropicStreamEvent::Unknown => {}
        }

        Ok(events)
    }

    fn extract_usage(&self, events: &[AgentEvent]) -> Option<(u32, u32)> {
        events.iter().find_map(|e| match e {
            AgentEvent::Usage {
                input_tokens,
                output_tokens,
                ..
            } => Some((*input_tokens, *output_tokens)),
            _ => None,
        })
    }

    fn reset_state(&mut self) {
        self.open_tool_use.clear();
    }
}

fn push_usage(events: &mut Vec<AgentEvent>, usage: AnthropicUsage) {
    events.push(AgentEvent::Usage {
        input_tokens: usage.input_tokens.unwrap_or(0),
        output_tokens: usage.output_tokens.unwrap_or(0),
        estimated_cost_usd: None,
    });
}

fn map_stop_reason(reason: &str) -> StopReason {
    match reason {
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

/// Anthropic only accepts base64 image sources; a `data:` URI splits
/// directly into `media_type`/`data`, while a plain `http(s)://` URL has
/// no base64 payload to extract and is passed through as a `url` source
/// (Anthropic's Messages API also accepts `source: {type: "url", url}`).
fn anthropic_image_block(url: &str) -> Value {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((media_type, data)) = rest.split_once(";base64,") {
            return json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": media_type,
                    "data": data,
                },
            });
        }
    }
    json!({
        "type": "image",
        "source": { "type": "url", "url": url },
    })
}

fn anthropic_message(msg: &Message) -> Result<Value> {
    let role = match msg.role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => {
            return Err(Error::invalid_input(
                "system messages must be carried in the request's top-level `system` field",
            ))
        }
    };

    let content: Vec<Value> = msg.content.iter().map(anthropic_block).collect();
    Ok(json!({ "role": role, "content": content }))
}

fn anthropic_block(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text(text) => json!({ "type": "text", "text": text.text }),
        ContentBlock::Image(image) => anthropic_image_block(image.url()),
        ContentBlock::ToolUse(tool_use) => json!({
            "type": "tool_use",
            "id": tool_use.id,
            "name": tool_use.name,
            "input": tool_use.input,
        }),
        ContentBlock::ToolResult(result) => {
            let mut value = json!({
                "type": "tool_result",
                "tool_use_id": result.tool_use_id,
                "content": result.content,
            });
            if result.is_error == Some(true) {
                value["is_error"] = json!(true);
            }
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentBlock, ImageBlock, Message, TextBlock, ToolUseBlock};

    fn adapter() -> AnthropicAdapter {
        AnthropicAdapter::new()
    }

    #[test]
    fn message_start_surfaces_initial_usage() {
        let mut a = adapter();
        let events = a
            .parse_sse_payload(r#"{"type":"message_start","message":{"usage":{"input_tokens":12,"output_tokens":0}}}"#)
            .unwrap();
        assert!(matches!(events[0], AgentEvent::Usage { input_tokens: 12, .. }));
    }

    #[test]
    fn text_block_streams_start_then_delta() {
        let mut a = adapter();
        let start = a
            .parse_sse_payload(r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#)
            .unwrap();
        assert!(matches!(
            start[0],
            AgentEvent::BlockStart { index: 0, block: BlockStartKind::Text }
        ));

        let delta = a
            .parse_sse_payload(r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#)
            .unwrap();
        match &delta[0] {
            AgentEvent::BlockDelta { index: 0, delta: BlockDelta::TextDelta { text } } => {
                assert_eq!(text, "hi");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn tool_use_accumulates_input_json_across_deltas() {
        let mut a = adapter();
        a.parse_sse_payload(
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"tu1","name":"runjs"}}"#,
        )
        .unwrap();
        a.parse_sse_payload(
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"code\":"}}"#,
        )
        .unwrap();
        let stop = a
            .parse_sse_payload(
                r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"2+2\"}"}}"#,
            )
            .unwrap();
        assert!(matches!(
            stop[0],
            AgentEvent::BlockDelta { index: 1, delta: BlockDelta::InputJsonDelta { .. } }
        ));

        let closed = a
            .parse_sse_payload(r#"{"type":"content_block_stop","index":1}"#)
            .unwrap();
        assert!(matches!(
            closed[0],
            AgentEvent::BlockStop { index: 1, truncated: false }
        ));
    }

    #[test]
    fn max_tokens_while_tool_open_flushes_truncated_then_turn_end() {
        let mut a = adapter();
        a.parse_sse_payload(
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"tu1","name":"runjs"}}"#,
        )
        .unwrap();

        let events = a
            .parse_sse_payload(
                r#"{"type":"message_delta","delta":{"stop_reason":"max_tokens"},"usage":{"input_tokens":5,"output_tokens":5}}"#,
            )
            .unwrap();

        assert!(matches!(
            events[1],
            AgentEvent::BlockStop { index: 0, truncated: true }
        ));
        assert!(matches!(
            events[2],
            AgentEvent::TurnEnd { reason: StopReason::MaxTokens }
        ));
    }

    #[test]
    fn stop_reason_tool_use_maps_through() {
        let mut a = adapter();
        let events = a
            .parse_sse_payload(r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"}}"#)
            .unwrap();
        assert!(matches!(
            events[0],
            AgentEvent::TurnEnd { reason: StopReason::ToolUse }
        ));
    }

    #[test]
    fn builds_request_with_system_and_tool_result_blocks() {
        let a = adapter();
        let history = vec![Message::user("2+2"), {
            let mut m = Message::new(MessageRole::User, Vec::new());
            m.content.push(ContentBlock::ToolResult(
                crate::types::ToolResultBlock::new("tu1", serde_json::json!(4)),
            ));
            m
        }];
        let body = a
            .build_request("claude-3-5-sonnet-latest", "be terse", &history, &[], Some(256), 0.5)
            .unwrap();
        assert_eq!(body["model"], "claude-3-5-sonnet-latest");
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"][1]["content"][0]["type"], "tool_result");
    }

    #[test]
    fn image_block_round_trips_into_anthropic_source_shape() {
        let a = adapter();
        let image = ImageBlock::from_base64("base64data", "image/png").unwrap();
        let msg = Message::new(MessageRole::User, vec![ContentBlock::Image(image)]);
        let body = a
            .build_request("claude-3-5-sonnet-latest", "", &[msg], &[], None, 0.5)
            .unwrap();
        assert_eq!(body["messages"][0]["content"][0]["type"], "image");
        assert_eq!(
            body["messages"][0]["content"][0]["source"]["data"],
            "base64data"
        );
    }

    #[test]
    fn tool_use_block_serializes_with_id_name_input() {
        let a = adapter();
        let msg = Message::new(
            MessageRole::Assistant,
            vec![ContentBlock::ToolUse(ToolUseBlock::new(
                "tu1",
                "runjs",
                serde_json::json!({"code": "2+2"}),
            ))],
        );
        let body = a
            .build_request("claude-3-5-sonnet-latest", "", &[msg], &[], None, 0.5)
            .unwrap();
        let block = &body["messages"][0]["content"][0];
        assert_eq!(block["type"], "tool_use");
        assert_eq!(block["id"], "tu1");
    }

    #[test]
    fn text_block_round_trips() {
        let a = adapter();
        let msg = Message::new(
            MessageRole::Assistant,
            vec![ContentBlock::Text(TextBlock::new("hi"))],
        );
        let body = a
            .build_request("claude-3-5-sonnet-latest", "", &[msg], &[], None, 0.5)
            .unwrap();
        assert_eq!(body["messages"][0]["content"][0]["text"], "hi");
    }
}
