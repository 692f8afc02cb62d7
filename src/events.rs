//! Canonical agent event stream.
//!
//! Every provider adapter (Anthropic, OpenAI-compatible, Gemini) translates its
//! own wire format into this single tagged-union vocabulary. The rest of the
//! runtime — the runner, the dispatcher, the hub — only ever sees `AgentEvent`,
//! never a provider-specific chunk type. This is the "narrow waist" the design
//! notes call for: one place where new providers are onboarded, one place
//! where downstream consumers read events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event in the canonical agent output stream.
///
/// Block-indexed variants (`BlockStart`/`BlockDelta`/`BlockStop`) mirror the
/// teacher's per-index tool-call accumulation idiom
/// (`ToolCallAggregator`/`PartialToolCall` in the OpenAI adapter), generalized
/// so text blocks accumulate the same way tool-call blocks do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A new content block has started at `index`.
    BlockStart { index: u32, block: BlockStartKind },
    /// An incremental update to the block at `index`.
    BlockDelta { index: u32, delta: BlockDelta },
    /// The block at `index` is complete. `truncated` is set when the stream
    /// ended (typically via `max_tokens`) before the block closed normally —
    /// Anthropic's "flush the open tool_use on max_tokens" behavior.
    BlockStop {
        index: u32,
        #[serde(default)]
        truncated: bool,
    },
    /// Token/cost accounting for the turn so far.
    Usage {
        input_tokens: u32,
        output_tokens: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        estimated_cost_usd: Option<f64>,
    },
    /// The turn ended; `reason` is one of the canonical stop reasons below.
    TurnEnd { reason: StopReason },
    /// A provider- or runtime-level error that aborted the turn.
    Error { message: String, retryable: bool },
}

/// What kind of block is starting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockStartKind {
    Text,
    ToolUse {
        id: String,
        name: String,
        /// Gemini's opaque per-call `thoughtSignature`, preserved so it can
        /// be round-tripped into a later request's matching `tool_use`
        /// part (spec §4.2).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought_signature: Option<String>,
    },
}

/// Incremental content for a block already announced by `BlockStart`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockDelta {
    TextDelta { text: String },
    /// Fragment of a tool call's JSON-encoded input, to be concatenated and
    /// parsed once the block stops (mirrors `PartialToolCall::arguments`).
    InputJsonDelta { partial_json: String },
}

/// Canonical stop reason, independent of any provider's own vocabulary
/// (`finish_reason` for OpenAI, `stop_reason` for Anthropic, `finishReason`
/// for Gemini).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    /// The adapter recovered a tool call that the provider emitted as plain
    /// text instead of a structured call (spec's text-as-tool-call fallback).
    RecoveredToolUse,
}

/// A fully materialized content block, built by accumulating `AgentEvent`s.
/// This is the shape the runner hands to the dispatcher and to hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MaterializedBlock {
    Text { text: String },
    ToolUse {
        id: String,
        name: String,
        input: Value,
        #[serde(default)]
        truncated: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought_signature: Option<String>,
    },
}

/// Accumulates `AgentEvent`s into `MaterializedBlock`s, the canonical
/// equivalent of the teacher's `ToolCallAggregator` but provider-agnostic.
#[derive(Debug, Default)]
pub struct EventAccumulator {
    text: std::collections::HashMap<u32, String>,
    tool_use: std::collections::HashMap<u32, (String, String, String, Option<String>)>,
    truncated: std::collections::HashMap<u32, bool>,
    order: Vec<u32>,
}

impl EventAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event; returns `Some(usage)` / `Some(stop_reason)` when those
    /// events pass through, otherwise accumulates silently.
    pub fn feed(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::BlockStart { index, block } => {
                if !self.order.contains(index) {
                    self.order.push(*index);
                }
                match block {
                    BlockStartKind::Text => {
                        self.text.entry(*index).or_default();
                    }
                    BlockStartKind::ToolUse { id, name, thought_signature } => {
                        self.tool_use.entry(*index).or_insert_with(|| {
                            (id.clone(), name.clone(), String::new(), thought_signature.clone())
                        });
                    }
                }
            }
            AgentEvent::BlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => {
                    self.text.entry(*index).or_default().push_str(text);
                }
                BlockDelta::InputJsonDelta { partial_json } => {
                    if let Some(entry) = self.tool_use.get_mut(index) {
                        entry.2.push_str(partial_json);
                    }
                }
            },
            AgentEvent::BlockStop { index, truncated } => {
                if *truncated {
                    self.truncated.insert(*index, true);
                }
            }
            AgentEvent::Usage { .. } | AgentEvent::TurnEnd { .. } | AgentEvent::Error { .. } => {}
        }
    }

    /// Drain all accumulated blocks in first-seen index order. Tool-use
    /// blocks with unparseable JSON input are silently dropped, matching the
    /// teacher's `ToolCallAggregator::process_chunk` behavior for incomplete
    /// calls.
    pub fn drain(&mut self) -> Vec<MaterializedBlock> {
        let mut out = Vec::new();
        for index in self.order.drain(..) {
            if let Some(text) = self.text.remove(&index) {
                if !text.is_empty() {
                    out.push(MaterializedBlock::Text { text });
                }
                continue;
            }
            if let Some((id, name, args, thought_signature)) = self.tool_use.remove(&index) {
                if let Ok(input) = serde_json::from_str::<Value>(&args) {
                    let truncated = self.truncated.remove(&index).unwrap_or(false);
                    out.push(MaterializedBlock::ToolUse {
                        id,
                        name,
                        input,
                        truncated,
                        thought_signature,
                    });
                }
            }
        }
        self.text.clear();
        self.tool_use.clear();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_text_across_deltas() {
        let mut acc = EventAccumulator::new();
        acc.feed(&AgentEvent::BlockStart { index: 0, block: BlockStartKind::Text });
        acc.feed(&AgentEvent::BlockDelta {
            index: 0,
            delta: BlockDelta::TextDelta { text: "Hello, ".into() },
        });
        acc.feed(&AgentEvent::BlockDelta {
            index: 0,
            delta: BlockDelta::TextDelta { text: "world!".into() },
        });
        acc.feed(&AgentEvent::BlockStop { index: 0, truncated: false });

        let blocks = acc.drain();
        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            MaterializedBlock::Text { text } => assert_eq!(text, "Hello, world!"),
            _ => panic!("expected text block"),
        }
    }

    #[test]
    fn accumulates_tool_call_json_fragments() {
        let mut acc = EventAccumulator::new();
        acc.feed(&AgentEvent::BlockStart {
            index: 0,
            block: BlockStartKind::ToolUse { id: "call_1".into(), name: "search".into(), thought_signature: None },
        });
        for frag in ["{\"q", "uery\":\"h", "ello\"}"] {
            acc.feed(&AgentEvent::BlockDelta {
                index: 0,
                delta: BlockDelta::InputJsonDelta { partial_json: frag.into() },
            });
        }
        acc.feed(&AgentEvent::BlockStop { index: 0, truncated: false });

        let blocks = acc.drain();
        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            MaterializedBlock::ToolUse { id, name, input, .. } => {
                assert_eq!(id, "call_1");
                assert_eq!(name, "search");
                assert_eq!(input["query"], "hello");
            }
            _ => panic!("expected tool_use block"),
        }
    }

    #[test]
    fn drops_tool_call_with_unparseable_input() {
        let mut acc = EventAccumulator::new();
        acc.feed(&AgentEvent::BlockStart {
            index: 0,
            block: BlockStartKind::ToolUse { id: "call_1".into(), name: "search".into(), thought_signature: None },
        });
        acc.feed(&AgentEvent::BlockDelta {
            index: 0,
            delta: BlockDelta::InputJsonDelta { partial_json: "{not json".into() },
        });
        assert!(acc.drain().is_empty());
    }
}
