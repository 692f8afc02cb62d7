//! Google Gemini `generateContent`/`streamGenerateContent` adapter.
//!
//! Gemini's wire shape differs from the other two providers in three ways
//! that this adapter exists to absorb: JSON Schema needs translating (types
//! uppercased, `additionalProperties` stripped, a bare `OBJECT` gains an
//! empty `properties`), consecutive same-role turns must be merged into one
//! `Content` entry, and tool calls have no id of their own so this adapter
//! mints synthetic ones (`gemini_tc_<n>`) and remembers the name long enough
//! to build the matching `functionResponse` later.

use super::ProviderAdapter;
use crate::events::{AgentEvent, BlockDelta, BlockStartKind, StopReason};
use crate::tools::Tool;
use crate::types::{ContentBlock, Message, MessageRole};
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Adapter for Gemini's `streamGenerateContent` SSE endpoint.
#[derive(Debug, Default)]
pub struct GeminiAdapter {
    /// Monotonic counter minting `gemini_tc_<n>` ids, since Gemini's
    /// `functionCall` parts carry no id of their own.
    next_call_id: u64,
    /// Names of tool calls seen in assistant history, most recent last, so
    /// a later `functionResponse` can be built with the right tool name
    /// even though the canonical `tool_result` block only carries the
    /// synthetic call id.
    call_names: Vec<(String, String)>,
    /// Set once a `functionCall` part has been seen in the current
    /// streamed turn; a later `STOP` in the same turn is then reclassified
    /// as `tool_use` since Gemini can split the call and the finish reason
    /// across separate chunks.
    saw_function_call: bool,
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint_call_id(&mut self) -> String {
        self.next_call_id += 1;
        format!("gemini_tc_{}", self.next_call_id)
    }

    /// Translates one [`Message`]'s blocks into Gemini `Part`s.
    fn gemini_parts(&self, msg: &Message) -> Result<Vec<Value>> {
        let mut parts = Vec::new();
        for block in &msg.content {
            match block {
                ContentBlock::Text(text) => {
                    if !text.text.is_empty() {
                        parts.push(json!({ "text": text.text }));
                    }
                }
                ContentBlock::Image(image) => {
                    if let Some((media_type, data)) = image
                        .url()
                        .strip_prefix("data:")
                        .and_then(|rest| rest.split_once(";base64,"))
                    {
                        parts.push(json!({
                            "inlineData": { "mimeType": media_type, "data": data }
                        }));
                    }
                }
                ContentBlock::ToolUse(tool_use) => {
                    let mut call = json!({
                        "functionCall": { "name": tool_use.name, "args": tool_use.input },
                    });
                    if let Some(sig) = &tool_use.thought_signature {
                        call["thoughtSignature"] = json!(sig);
                    }
                    parts.push(call);
                }
                ContentBlock::ToolResult(result) => {
                    parts.push(json!({ "functionResponse": self.function_response(result) }));
                }
            }
        }
        Ok(parts)
    }

    /// Builds a `functionResponse` part, looking the tool's original name
    /// up from `call_names` by the synthetic call id carried in
    /// `tool_use_id` (Gemini's own wire format has no id to round-trip, so
    /// the canonical `tool_result` block's id is this adapter's own mint).
    fn function_response(&self, result: &crate::types::ToolResultBlock) -> Value {
        let name = self
            .call_names
            .iter()
            .rev()
            .find(|(id, _)| id == &result.tool_use_id)
            .map(|(_, name)| name.clone())
            .unwrap_or_else(|| result.tool_use_id.clone());

        let response = if result.is_error == Some(true) {
            json!({ "error": result.content })
        } else if result.content.is_object() {
            result.content.clone()
        } else {
            json!({ "result": result.content })
        };
        json!({ "name": name, "response": response })
    }
}

#[derive(Debug, Deserialize)]
struct GeminiChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Default, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "functionCall")]
    function_call: Option<GeminiFunctionCall>,
    #[serde(default)]
    thought: bool,
    #[serde(default, rename = "thoughtSignature")]
    thought_signature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Default, Deserialize)]
struct GeminiUsage {
    #[serde(default, rename = "promptTokenCount")]
    prompt_token_count: Option<u32>,
    #[serde(default, rename = "candidatesTokenCount")]
    candidates_token_count: Option<u32>,
}

impl ProviderAdapter for GeminiAdapter {
    fn build_request(
        &self,
        _model: &str,
        system_prompt: &str,
        history: &[Message],
        tools: &[Arc<Tool>],
        max_tokens: Option<u32>,
        temperature: f32,
    ) -> Result<Value> {
        let mut contents: Vec<Value> = Vec::new();
        for msg in history {
            if msg.role == MessageRole::System {
                continue;
            }
            let role = match msg.role {
                MessageRole::Assistant => "model",
                _ => "user",
            };
            let parts = self.gemini_parts(msg)?;
            if parts.is_empty() {
                continue;
            }
            match contents.last_mut() {
                Some(prev) if prev["role"] == role => {
                    let merged = prev["parts"]
                        .as_array_mut()
                        .expect("parts is always an array");
                    merged.extend(parts);
                }
                _ => {
                    contents.push(json!({ "role": role, "parts": parts }));
                }
            }
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": temperature,
                "maxOutputTokens": max_tokens.unwrap_or(4096),
            },
        });

        if !system_prompt.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system_prompt }] });
        }

        if !tools.is_empty() {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name(),
                        "description": t.description(),
                        "parameters": translate_schema(t.input_schema()),
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }

        Ok(body)
    }

    fn parse_sse_payload(&mut self, payload: &str) -> Result<Vec<AgentEvent>> {
        super::reject_empty_payload(payload)?;

        let chunk: GeminiChunk = serde_json::from_str(payload)
            .map_err(|e| Error::stream(format!("invalid gemini chunk: {e}")))?;

        let mut events = Vec::new();

        if let Some(usage) = chunk.usage_metadata {
            events.push(AgentEvent::Usage {
                input_tokens: usage.prompt_token_count.unwrap_or(0),
                output_tokens: usage.candidates_token_count.unwrap_or(0),
                estimated_cost_usd: None,
            });
        }

        for candidate in chunk.candidates {
            let mut index = 0u32;
            if let Some(content) = candidate.content {
                for part in content.parts {
                    if part.thought {
                        continue;
                    }
                    if let Some(text) = part.text {
                        events.push(AgentEvent::BlockStart {
                            index,
                            block: BlockStartKind::Text,
                        });
                        events.push(AgentEvent::BlockDelta {
                            index,
                            delta: BlockDelta::TextDelta { text },
                        });
                        events.push(AgentEvent::BlockStop {
                            index,
                            truncated: false,
                        });
                        index += 1;
                    } else if let Some(call) = part.function_call {
                        self.saw_function_call = true;
                        let id = self.mint_call_id();
                        self.call_names.push((id.clone(), call.name.clone()));
                        events.push(AgentEvent::BlockStart {
                            index,
                            block: BlockStartKind::ToolUse {
                                id: id.clone(),
                                name: call.name,
                                thought_signature: part.thought_signature,
                            },
                        });
                        let partial_json = serde_json::to_string(&call.args)
                            .map_err(Error::Json)?;
                        events.push(AgentEvent::BlockDelta {
                            index,
                            delta: BlockDelta::InputJsonDelta { partial_json },
                        });
                        events.push(AgentEvent::BlockStop {
                            index,
                            truncated: false,
                        });
                        index += 1;
                    }
                }
            }

            if let Some(reason) = candidate.finish_reason {
                let stop = match reason.as_str() {
                    "STOP" if self.saw_function_call => StopReason::ToolUse,
                    "STOP" => StopReason::EndTurn,
                    "MAX_TOKENS" => StopReason::MaxTokens,
                    "SAFETY" | "RECITATION" => {
                        events.push(AgentEvent::Error {
                            message: format!("gemini stopped generation: {reason}"),
                            retryable: false,
                        });
                        StopReason::EndTurn
                    }
                    _ => StopReason::EndTurn,
                };
                events.push(AgentEvent::TurnEnd { reason: stop });
            }
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
        self.next_call_id = 0;
        self.call_names.clear();
        self.saw_function_call = false;
    }
}

/// Recursively translates a JSON Schema fragment into Gemini's dialect:
/// `type` values are uppercased, `additionalProperties` is stripped (Gemini
/// rejects it), and a bare `object` schema with no `properties` gains an
/// empty one (Gemini requires the key to be present).
fn translate_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, value) in map {
                if key == "additionalProperties" {
                    continue;
                }
                if key == "type" {
                    if let Value::String(t) = value {
                        out.insert(key.clone(), json!(t.to_uppercase()));
                        continue;
                    }
                }
                if key == "properties" {
                    out.insert(key.clone(), translate_schema(value));
                    continue;
                }
                out.insert(key.clone(), translate_schema(value));
            }
            if out.get("type").and_then(|t| t.as_str()) == Some("OBJECT")
                && !out.contains_key("properties")
            {
                out.insert("properties".to_string(), json!({}));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(translate_schema).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentBlock, Message, MessageRole, ToolResultBlock, ToolUseBlock};

    fn adapter() -> GeminiAdapter {
        GeminiAdapter::new()
    }

    #[test]
    fn schema_types_are_uppercased_and_additional_properties_stripped() {
        let schema = json!({
            "type": "object",
            "additionalProperties": false,
            "properties": { "x": { "type": "string" } }
        });
        let translated = translate_schema(&schema);
        assert_eq!(translated["type"], "OBJECT");
        assert_eq!(translated["properties"]["x"]["type"], "STRING");
        assert!(translated.get("additionalProperties").is_none());
    }

    #[test]
    fn bare_object_schema_gains_empty_properties() {
        let schema = json!({ "type": "object" });
        let translated = translate_schema(&schema);
        assert_eq!(translated["properties"], json!({}));
    }

    #[test]
    fn consecutive_same_role_messages_are_merged() {
        let a = adapter();
        let history = vec![
            Message::user("first"),
            Message::user("second"),
        ];
        let body = a
            .build_request("gemini-1.5-pro", "", &history, &[], None, 0.5)
            .unwrap();
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["parts"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn assistant_role_is_renamed_to_model() {
        let a = adapter();
        let history = vec![Message::assistant(vec![ContentBlock::Text(
            crate::types::TextBlock::new("hi"),
        )])];
        let body = a
            .build_request("gemini-1.5-pro", "", &history, &[], None, 0.5)
            .unwrap();
        assert_eq!(body["contents"][0]["role"], "model");
    }

    #[test]
    fn function_call_mints_synthetic_ids_sequentially() {
        let mut a = adapter();
        let events = a
            .parse_sse_payload(
                r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"runjs","args":{"code":"2+2"}}}]}}]}"#,
            )
            .unwrap();
        match &events[0] {
            AgentEvent::BlockStart {
                block: BlockStartKind::ToolUse { id, name, .. },
                ..
            } => {
                assert_eq!(id, "gemini_tc_1");
                assert_eq!(name, "runjs");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn function_call_thought_signature_survives_onto_block_start() {
        let mut a = adapter();
        let events = a
            .parse_sse_payload(
                r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"runjs","args":{}},"thoughtSignature":"sig123"}]}}]}"#,
            )
            .unwrap();
        match &events[0] {
            AgentEvent::BlockStart {
                block: BlockStartKind::ToolUse { thought_signature, .. },
                ..
            } => {
                assert_eq!(thought_signature.as_deref(), Some("sig123"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn reset_state_clears_call_id_counter() {
        let mut a = adapter();
        a.parse_sse_payload(
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"runjs","args":{}}}]}}]}"#,
        )
        .unwrap();
        a.reset_state();
        let events = a
            .parse_sse_payload(
                r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"runjs","args":{}}}]}}]}"#,
            )
            .unwrap();
        match &events[0] {
            AgentEvent::BlockStart {
                block: BlockStartKind::ToolUse { id, .. },
                ..
            } => assert_eq!(id, "gemini_tc_1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn thought_parts_are_discarded() {
        let mut a = adapter();
        let events = a
            .parse_sse_payload(
                r#"{"candidates":[{"content":{"parts":[{"text":"reasoning...","thought":true}]}}]}"#,
            )
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn stop_after_function_call_in_same_turn_reclassifies_as_tool_use() {
        let mut a = adapter();
        a.parse_sse_payload(
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"runjs","args":{}}}]}}]}"#,
        )
        .unwrap();
        let events = a
            .parse_sse_payload(r#"{"candidates":[{"finishReason":"STOP"}]}"#)
            .unwrap();
        assert!(matches!(
            events[0],
            AgentEvent::TurnEnd {
                reason: StopReason::ToolUse
            }
        ));
    }

    #[test]
    fn stop_without_prior_function_call_is_end_turn() {
        let mut a = adapter();
        let events = a
            .parse_sse_payload(r#"{"candidates":[{"finishReason":"STOP"}]}"#)
            .unwrap();
        assert!(matches!(
            events[0],
            AgentEvent::TurnEnd {
                reason: StopReason::EndTurn
            }
        ));
    }

    #[test]
    fn max_tokens_finish_reason_maps_through() {
        let mut a = adapter();
        let events = a
            .parse_sse_payload(r#"{"candidates":[{"finishReason":"MAX_TOKENS"}]}"#)
            .unwrap();
        assert!(matches!(
            events[0],
            AgentEvent::TurnEnd {
                reason: StopReason::MaxTokens
            }
        ));
    }

    #[test]
    fn safety_finish_reason_emits_error_and_end_turn() {
        let mut a = adapter();
        let events = a
            .parse_sse_payload(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#)
            .unwrap();
        assert!(matches!(events[0], AgentEvent::Error { retryable: false, .. }));
        assert!(matches!(
            events[1],
            AgentEvent::TurnEnd {
                reason: StopReason::EndTurn
            }
        ));
    }

    #[test]
    fn tool_result_looks_up_tool_name_from_call_history() {
        let mut a = adapter();
        a.parse_sse_payload(
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"runjs","args":{}}}]}}]}"#,
        )
        .unwrap();
        let result = ToolResultBlock::new("gemini_tc_1", json!({"value": 4}));
        let response = a.function_response(&result);
        assert_eq!(response["name"], "runjs");
        assert_eq!(response["response"]["value"], 4);
    }

    #[test]
    fn tool_result_wraps_non_object_content() {
        let a = adapter();
        let result = ToolResultBlock::new("runjs", json!(4));
        let response = a.function_response(&result);
        assert_eq!(response["response"]["result"], 4);
    }

    #[test]
    fn tool_result_error_wraps_as_error_key() {
        let a = adapter();
        let result = ToolResultBlock::error("runjs", json!("boom"));
        let response = a.function_response(&result);
        assert_eq!(response["response"]["error"], "boom");
    }

    #[test]
    fn assistant_tool_use_block_serializes_as_function_call_with_signature() {
        let a = adapter();
        let tool_use = ToolUseBlock::new("gemini_tc_1", "runjs", json!({"code": "2+2"}))
            .with_thought_signature("sig123");
        let msg = Message::assistant(vec![ContentBlock::ToolUse(tool_use)]);
        let parts = a.gemini_parts(&msg).unwrap();
        assert_eq!(parts[0]["functionCall"]["name"], "runjs");
        assert_eq!(parts[0]["thoughtSignature"], "sig123");
    }
}
