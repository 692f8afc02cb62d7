//! Tool dispatcher: routes one LLM-issued tool call to its implementation.
//!
//! The teacher dispatches tools in-process via `execute_tool_internal` with
//! no timeout or per-call tracking (`tools.rs::Tool::execute`). This module
//! keeps that direct-call shape but adds the two things a sandboxed runtime
//! needs: a per-call timeout (spec.md §5's pending-dispatch table, realized
//! here as `tokio::time::timeout` rather than a literal `{resolve, reject,
//! timer}` map — the async equivalent of the same contract) and the tagged
//! dispatch of spec.md §9: tool names with a host-specific request shape
//! (`runjs`, `dom`, `fetch`, `storage`, `files`, `capabilities`, `state`,
//! `view_state`) route to a [`CapabilityHost`], `agent_respond`/
//! `worker_message` are acknowledged inline, and anything else falls
//! through to the generic plugin registry of user-registered [`Tool`]s —
//! never to dynamic method lookup, so the dispatch surface stays auditable.

use crate::tools::Tool;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Default per-tool-call execution timeout.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for a hook's allow/deny decision.
pub const HOOK_DECISION_TIMEOUT: Duration = Duration::from_secs(10);

/// Host-provided capabilities for the tagged tool names of spec.md §9. In
/// the browser-based original these round-trip through `postMessage` to the
/// host page; here they are a trait object the embedder implements once per
/// runtime (a headless host can return `Error::tool("unsupported")` for
/// whichever tags it doesn't need).
#[async_trait]
pub trait CapabilityHost: Send + Sync {
    /// Evaluates `code` in whatever sandboxed script context the host owns.
    async fn runjs(&self, code: &str) -> Result<Value>;
    /// DOM read/write requests (`{action, ...}`).
    async fn dom(&self, input: Value) -> Result<Value>;
    /// Outbound HTTP requests made on the agent's behalf.
    async fn fetch(&self, input: Value) -> Result<Value>;
    /// Key/value storage reads and writes scoped to the agent.
    async fn storage(&self, input: Value) -> Result<Value>;
    /// Filesystem-shaped reads and writes under the host's sandboxed root.
    /// `path` has already passed [`validate_files_path`].
    async fn files(&self, path: &str, input: Value) -> Result<Value>;
    /// Reports the capability set this host actually supports.
    async fn capabilities(&self) -> Result<Value>;
    /// Reads or writes entries in the per-agent state store.
    async fn state(&self, input: Value) -> Result<Value>;
    /// Reads or writes view (viewport/visibility) state.
    async fn view_state(&self, input: Value) -> Result<Value>;
}

/// Routes one tool call by name to either a tagged [`CapabilityHost`]
/// method or the generic plugin registry, enforcing a timeout on every
/// dispatch.
pub struct ToolDispatcher {
    tools: HashMap<String, Arc<Tool>>,
    host: Option<Arc<dyn CapabilityHost>>,
    tool_timeout: Duration,
}

impl ToolDispatcher {
    /// Builds a dispatcher over a fixed set of plugin tools with no
    /// capability host; tagged dispatch calls will fail until
    /// [`Self::with_host`] attaches one.
    pub fn new(tools: Vec<Arc<Tool>>) -> Self {
        Self {
            tools: tools
                .into_iter()
                .map(|t| (t.name().to_string(), t))
                .collect(),
            host: None,
            tool_timeout: TOOL_TIMEOUT,
        }
    }

    /// Attaches the capability host backing tagged dispatch.
    pub fn with_host(mut self, host: Arc<dyn CapabilityHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Overrides the default 60s per-call timeout.
    pub fn with_timeout(mut self, tool_timeout: Duration) -> Self {
        self.tool_timeout = tool_timeout;
        self
    }

    /// Dispatches one tool call, returning `Error::Timeout` if it doesn't
    /// resolve within the configured timeout.
    pub async fn dispatch(&self, tool_name: &str, input: Value) -> Result<Value> {
        match timeout(self.tool_timeout, self.dispatch_untimed(tool_name, input)).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout()),
        }
    }

    async fn dispatch_untimed(&self, tool_name: &str, input: Value) -> Result<Value> {
        match tool_name {
            "agent_respond" | "worker_message" => Ok(serde_json::json!({ "acknowledged": true })),
            "runjs" => {
                let code = input.get("code").and_then(Value::as_str).unwrap_or_default();
                self.host()?.runjs(code).await
            }
            "dom" => self.host()?.dom(input).await,
            "fetch" => self.host()?.fetch(input).await,
            "storage" => self.host()?.storage(input).await,
            "files" => {
                let path = input
                    .get("path")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::invalid_input("files tool requires a `path` field"))?;
                validate_files_path(path)?;
                let path = path.to_string();
                self.host()?.files(&path, input).await
            }
            "capabilities" => self.host()?.capabilities().await,
            "state" => self.host()?.state(input).await,
            "view_state" => self.host()?.view_state(input).await,
            _ => self.dispatch_plugin(tool_name, input).await,
        }
    }

    async fn dispatch_plugin(&self, tool_name: &str, input: Value) -> Result<Value> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| Error::tool(format!("unknown tool: {tool_name}")))?;
        tool.execute(input).await
    }

    fn host(&self) -> Result<&Arc<dyn CapabilityHost>> {
        self.host
            .as_ref()
            .ok_or_else(|| Error::tool("no capability host registered for this dispatcher"))
    }
}

/// Validates a `files` tool path: no NUL byte, at most 512 characters, and
/// at least one path segment — unless the whole path is one of spec.md
/// §4.4's root shorthands (`.`, `/`, `root`, or the empty string), each of
/// which is itself a valid root reference.
pub(crate) fn validate_files_path(path: &str) -> Result<()> {
    if path.contains('\0') {
        return Err(Error::invalid_input(
            "files path must not contain a NUL byte",
        ));
    }
    if path.len() > 512 {
        return Err(Error::invalid_input("files path exceeds 512 characters"));
    }
    if matches!(path, "." | "/" | "root" | "") {
        return Ok(());
    }
    let stripped = path.trim_start_matches('/');
    if stripped.is_empty() {
        return Err(Error::invalid_input(
            "files path must have at least one segment",
        ));
    }
    Ok(())
}
