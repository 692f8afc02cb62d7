//! # Open Agent Runtime
//!
//! A sandboxed multi-agent LLM execution runtime: an agentic loop with
//! pluggable provider adapters (Anthropic, OpenAI-compatible, Gemini), a
//! capability-bounded tool dispatcher, a hook/decision pipeline gating every
//! tool call and prompt, and a hub that hosts agents centrally — scheduling
//! their wake-ups, proxying browser-only tools, streaming their viewport,
//! and notifying devices over web push.
//!
//! ## Architecture
//!
//! - **types**: messages, content blocks, and `AgentOptions` configuration.
//! - **events**: the canonical `AgentEvent` stream every adapter normalizes
//!   into, and the accumulator that materializes it into content blocks.
//! - **adapters**: one [`adapters::ProviderAdapter`] per upstream API,
//!   translating to/from the canonical event stream.
//! - **sse**: low-level Server-Sent Events framing shared by every adapter.
//! - **tools**: tool definition with automatic JSON schema generation.
//! - **dispatcher**: routes a tool call to either a tagged capability
//!   ([`dispatcher::CapabilityHost`]) or a registered plugin.
//! - **hooks**: the six-point lifecycle hook/decision pipeline.
//! - **runner**: [`runner::AgentRunner`], the agentic loop itself.
//! - **container**: [`container::AgentContainer`], the lifecycle wrapper
//!   (pause/resume/stop/kill/restart, DOM snapshotting) around a runner.
//! - **relay**: [`relay::ShellRelay`], the message broker that authorizes
//!   hub-connected operations and owns the plugin registry.
//! - **hub**: the hub-side subsystems — [`hub::HubRunner`] (server-hosted
//!   agent + browser tool proxy), [`hub::Scheduler`] (cron/event wake-ups),
//!   [`hub::PushManager`] (web push), [`hub::StateStore`] (bounded per-agent
//!   state), and [`hub::ViewportServer`] (binary frame streaming).
//! - **config**: convenience helpers for local OpenAI-compatible servers.
//! - **context**: token estimation and history truncation utilities.
//! - **retry**: exponential backoff with jitter.
//! - **error**: the crate's `Error`/`Result` types.

mod adapters;
mod config;
mod container;
mod context;
mod dispatcher;
mod error;
mod events;
mod hooks;
pub mod hub;
mod relay;
pub mod retry;
mod runner;
mod sse;
mod tools;
mod types;

// --- Agentic loop & provider adapters ---

pub use adapters::ProviderAdapter;
pub use events::{AgentEvent, BlockDelta, BlockStartKind, EventAccumulator, MaterializedBlock, StopReason};
pub use runner::{AgentRunner, AgentState, BudgetReason, RunnerInbound, RunnerOutbound};
pub use sse::{SseEvent, SseFramer};

// --- Lifecycle wrapper ---

pub use container::{AgentContainer, DomSnapshot, LifecycleObserver};

// --- Tool dispatch & capability boundary ---

pub use dispatcher::{CapabilityHost, ToolDispatcher};
pub use relay::{ClientSubscriptions, PluginRegistration, RegisteredAgent, ShellRelay};

// --- Hook / decision pipeline ---

pub use hooks::{
    AgentEndEvent, AgentStartEvent, EvalContext, HOOK_AGENT_END, HOOK_AGENT_START,
    HOOK_POST_TOOL_USE, HOOK_PRE_TOOL_USE, HOOK_STOP, HOOK_USER_PROMPT_SUBMIT, HookDecision,
    HookOutcome, HookType, Hooks, PostToolUseEvent, PreToolUseEvent, StopEvent,
    UserPromptSubmitEvent,
};

// --- Tool system ---

pub use tools::{Tool, ToolBuilder, tool};

// --- Core types ---

pub use types::{
    AgentOptions, AgentOptionsBuilder, ContentBlock, Message, MessageRole, ProviderKind, TextBlock,
    ToolResultBlock, ToolUseBlock,
};

// --- Local-server configuration convenience ---

pub use config::{Provider, get_base_url, get_model};

// --- Context management ---

pub use context::{estimate_tokens, is_approaching_limit, truncate_messages};

// --- Error handling ---

pub use error::{Error, Result};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// The most commonly used types for hosting a single agent locally.
/// Import with `use open_agent_runtime::prelude::*;`.
pub mod prelude {
    pub use crate::{
        AgentContainer, AgentOptions, AgentOptionsBuilder, AgentRunner, CapabilityHost,
        ContentBlock, Error, HookDecision, Hooks, Result, TextBlock, Tool, ToolDispatcher,
        ToolUseBlock, tool,
    };
}
