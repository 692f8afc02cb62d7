//! Provider adapters: translate between the canonical [`crate::events::AgentEvent`]
//! stream and each upstream model API's own wire format.
//!
//! Generalizes the teacher's single hardwired request/response path
//! (`client.rs::send`, tied to the OpenAI chat completions shape) into a
//! trait any of the three providers named in the spec can implement.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod pricing;
pub mod text_fallback;

use crate::events::AgentEvent;
use crate::tools::Tool;
use crate::types::Message;
use crate::{Error, Result};
use std::sync::Arc;

/// One request-shaping/response-parsing strategy for a model provider.
///
/// An adapter is stateful across a single turn (it owns whatever
/// index-keyed accumulation buffers it needs) but stateless across turns:
/// `reset_state` is called before each new turn begins.
pub trait ProviderAdapter: Send + Sync {
    /// Build the provider-specific request body for one turn.
    fn build_request(
        &self,
        model: &str,
        system_prompt: &str,
        history: &[Message],
        tools: &[Arc<Tool>],
        max_tokens: Option<u32>,
        temperature: f32,
    ) -> Result<serde_json::Value>;

    /// Parse one raw SSE payload (the `data:` line body) into zero or more
    /// canonical events. Returns an empty vec for payloads that carry no
    /// semantic content (e.g. the OpenAI `[DONE]` sentinel).
    fn parse_sse_payload(&mut self, payload: &str) -> Result<Vec<AgentEvent>>;

    /// Extract usage figures from the final event seen this turn, if the
    /// provider reports them inline rather than via a dedicated event.
    fn extract_usage(&self, _events: &[AgentEvent]) -> Option<(u32, u32)> {
        None
    }

    /// Estimate the USD cost of a turn given token counts, using this
    /// provider's pricing table entry for `model`.
    fn estimate_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> Option<f64> {
        pricing::estimate_cost(model, input_tokens, output_tokens)
    }

    /// Clear any per-turn accumulation state before starting a new turn.
    fn reset_state(&mut self);
}

/// Picks the concrete adapter for a `ProviderKind`.
pub fn for_provider(kind: crate::types::ProviderKind) -> Box<dyn ProviderAdapter> {
    match kind {
        crate::types::ProviderKind::Anthropic => Box::new(anthropic::AnthropicAdapter::new()),
        crate::types::ProviderKind::OpenAiChat => Box::new(openai::OpenAiAdapter::new()),
        crate::types::ProviderKind::Gemini => Box::new(gemini::GeminiAdapter::new()),
    }
}

/// Shared helper: reject a completely empty response body, which every
/// adapter treats as a stream-level protocol error rather than silently
/// producing zero events.
pub(crate) fn reject_empty_payload(payload: &str) -> Result<()> {
    if payload.trim().is_empty() {
        return Err(Error::stream("empty SSE payload"));
    }
    Ok(())
}
