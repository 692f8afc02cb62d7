//! OpenAI-compatible Chat Completions adapter.
//!
//! Builds request bodies in the shape `slb350/src/client.rs::send` used, and
//! turns the resulting `data:` stream into canonical [`AgentEvent`]s instead
//! of `ContentBlock`s directly. The delta-accumulation logic is the
//! teacher's `ToolCallAggregator`/`PartialToolCall` (`src/utils.rs`),
//! generalized to emit `BlockStart`/`BlockDelta`/`BlockStop` instead of
//! building a finished block in place.

use super::ProviderAdapter;
use crate::events::{AgentEvent, BlockDelta, BlockStartKind, StopReason};
use crate::tools::Tool;
use crate::types::{
    ContentBlock, Message, MessageRole, OpenAIChunk, OpenAIContent, OpenAIContentPart,
    OpenAIFunction, OpenAIImageUrl, OpenAIMessage, OpenAIRequest, OpenAIStreamOptions,
    OpenAIToolCall,
};
use crate::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// An in-progress tool call being assembled from `tool_calls` deltas.
///
/// Arguments are buffered until `id` and `name` are both known, since a
/// `BlockStart` event needs them up front; any argument fragments that
/// arrive before that point are held in `buffered_args` and flushed as a
/// single `InputJsonDelta` the moment the block starts.
#[derive(Debug, Default)]
struct PendingTool {
    id: Option<String>,
    name: Option<String>,
    buffered_args: String,
    started: bool,
}

/// Adapter for OpenAI's Chat Completions streaming API and any
/// OpenAI-compatible server (LM Studio, vLLM, Ollama's OpenAI shim, etc).
pub struct OpenAiAdapter {
    text_started: bool,
    tools: HashMap<u32, PendingTool>,
    tool_order: Vec<u32>,
    any_tool_started: bool,
}

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self {
            text_started: false,
            tools: HashMap::new(),
            tool_order: Vec::new(),
            any_tool_started: false,
        }
    }

    /// Pseudo block index for a tool call at OpenAI's own `index`. Offset by
    /// one so it never collides with the text block, which always lives at
    /// index 0.
    fn tool_block_index(index: u32) -> u32 {
        index + 1
    }
}

impl Default for OpenAiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn build_request(
        &self,
        model: &str,
        system_prompt: &str,
        history: &[Message],
        tools: &[Arc<Tool>],
        max_tokens: Option<u32>,
        temperature: f32,
    ) -> Result<Value> {
        let mut messages = Vec::new();

        if !system_prompt.is_empty() {
            messages.push(OpenAIMessage {
                role: "system".to_string(),
                content: Some(OpenAIContent::Text(system_prompt.to_string())),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        for msg in history {
            if matches!(msg.role, MessageRole::System) {
                // Already represented by `system_prompt`; avoid duplicating it.
                continue;
            }
            push_message(&mut messages, msg)?;
        }

        let tools_field = if tools.is_empty() {
            None
        } else {
            Some(tools.iter().map(|t| t.to_openai_format()).collect())
        };

        let request = OpenAIRequest {
            model: model.to_string(),
            messages,
            stream: true,
            max_tokens,
            temperature: Some(temperature),
            tools: tools_field,
            stream_options: Some(OpenAIStreamOptions {
                include_usage: true,
            }),
        };

        serde_json::to_value(request).map_err(Error::Json)
    }

    fn parse_sse_payload(&mut self, payload: &str) -> Result<Vec<AgentEvent>> {
        super::reject_empty_payload(payload)?;
        if payload.trim() == "[DONE]" {
            return Ok(Vec::new());
        }

        let chunk: OpenAIChunk = serde_json::from_str(payload)
            .map_err(|e| Error::stream(format!("failed to parse OpenAI chunk: {}", e)))?;

        let mut events = Vec::new();

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                if !self.text_started {
                    events.push(AgentEvent::BlockStart {
                        index: 0,
                        block: BlockStartKind::Text,
                    });
                    self.text_started = true;
                }
                events.push(AgentEvent::BlockDelta {
                    index: 0,
                    delta: BlockDelta::TextDelta { text: content },
                });
            }

            if let Some(tool_calls) = choice.delta.tool_calls {
                for delta in tool_calls {
                    let block_index = Self::tool_block_index(delta.index);
                    let entry = self.tools.entry(delta.index).or_default();
                    if !self.tool_order.contains(&delta.index) {
                        self.tool_order.push(delta.index);
                    }

                    if let Some(id) = delta.id {
                        entry.id = Some(id);
                    }

                    let mut fresh_args = None;
                    if let Some(function) = delta.function {
                        if let Some(name) = function.name {
                            entry.name = Some(name);
                        }
                        if let Some(args) = function.arguments {
                            if entry.started {
                                fresh_args = Some(args);
                            } else {
                                entry.buffered_args.push_str(&args);
                            }
                        }
                    }

                    if !entry.started {
                        if let (Some(id), Some(name)) = (entry.id.clone(), entry.name.clone()) {
                            events.push(AgentEvent::BlockStart {
                                index: block_index,
                                block: BlockStartKind::ToolUse { id, name, thought_signature: None },
                            });
                            entry.started = true;
                            self.any_tool_started = true;
                            if !entry.buffered_args.is_empty() {
                                events.push(AgentEvent::BlockDelta {
                                    index: block_index,
                                    delta: BlockDelta::InputJsonDelta {
                                        partial_json: std::mem::take(&mut entry.buffered_args),
                                    },
                                });
                            }
                        }
                    }

                    if let Some(args) = fresh_args {
                        events.push(AgentEvent::BlockDelta {
                            index: block_index,
                            delta: BlockDelta::InputJsonDelta { partial_json: args },
                        });
                    }
                }
            }

            if let Some(finish_reason) = choice.finish_reason {
                if self.text_started {
                    events.push(AgentEvent::BlockStop { index: 0, truncated: false });
                }
                for index in self.tool_order.drain(..) {
                    if self.tools.get(&index).map(|t| t.started).unwrap_or(false) {
                        events.push(AgentEvent::BlockStop {
                            index: Self::tool_block_index(index),
                            truncated: false,
                        });
                    }
                }

                // Some OpenAI-compatible servers report finish_reason "stop"
                // even when tool calls were accumulated; the runner needs
                // StopReason::ToolUse to know to dispatch them.
                let reason = match finish_reason.as_str() {
                    "tool_calls" => StopReason::ToolUse,
                    "length" => StopReason::MaxTokens,
                    "stop" if self.any_tool_started => StopReason::ToolUse,
                    _ => StopReason::EndTurn,
                };
                events.push(AgentEvent::TurnEnd { reason });

                self.reset_state();
            }
        }

        if let Some(usage) = chunk.usage {
            events.push(AgentEvent::Usage {
                input_tokens: usage.prompt_tokens.unwrap_or(0),
                output_tokens: usage.completion_tokens.unwrap_or(0),
                estimated_cost_usd: None,
            });
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
        self.text_started = false;
        self.tools.clear();
        self.tool_order.clear();
        self.any_tool_started = false;
    }
}

/// Converts one canonical [`Message`] into zero or more [`OpenAIMessage`]s.
///
/// Most messages map one-to-one; a message containing a `ToolResult` block
/// is special-cased into its own `"tool"`-role message per block, since the
/// OpenAI wire format requires tool results as standalone messages keyed by
/// `tool_call_id` rather than embedded content.
fn push_message(messages: &mut Vec<OpenAIMessage>, msg: &Message) -> Result<()> {
    let role = match msg.role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    };

    let mut texts = Vec::new();
    let mut parts = Vec::new();
    let mut has_image = false;
    let mut tool_calls = Vec::new();

    for block in &msg.content {
        match block {
            ContentBlock::Text(text) => {
                texts.push(text.text.clone());
                parts.push(OpenAIContentPart::Text {
                    text: text.text.clone(),
                });
            }
            ContentBlock::Image(image) => {
                has_image = true;
                parts.push(OpenAIContentPart::ImageUrl {
                    image_url: OpenAIImageUrl {
                        url: image.url().to_string(),
                        detail: Some(image.detail().to_string()),
                    },
                });
            }
            ContentBlock::ToolUse(tool_use) => {
                tool_calls.push(OpenAIToolCall {
                    id: tool_use.id.clone(),
                    call_type: "function".to_string(),
                    function: OpenAIFunction {
                        name: tool_use.name.clone(),
                        arguments: serde_json::to_string(&tool_use.input)
                            .map_err(Error::Json)?,
                    },
                });
            }
            ContentBlock::ToolResult(tool_result) => {
                let content = match &tool_result.content {
                    Value::String(s) => s.clone(),
                    other => serde_json::to_string(other).map_err(Error::Json)?,
                };
                messages.push(OpenAIMessage {
                    role: "tool".to_string(),
                    content: Some(OpenAIContent::Text(content)),
                    tool_calls: None,
                    tool_call_id: Some(tool_result.tool_use_id.clone()),
                });
            }
        }
    }

    let content = if has_image && !parts.is_empty() {
        Some(OpenAIContent::Parts(parts))
    } else if !texts.is_empty() {
        Some(OpenAIContent::Text(texts.join("\n")))
    } else {
        None
    };

    if content.is_some() || !tool_calls.is_empty() {
        messages.push(OpenAIMessage {
            role: role.to_string(),
            content,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
        });
    }

    Ok(())
}
