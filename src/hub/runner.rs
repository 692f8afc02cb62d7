//! Hub agent runner (spec.md §4.8): the server-side mirror of the agentic
//! loop. Reuses `container::AgentContainer`/`runner::AgentRunner` verbatim
//! for the loop itself and adds exactly what hosting an agent centrally
//! needs on top: a tool partition between hub-native capabilities and
//! browser-only ones proxied to a subscribed browser client, authoritative
//! server-side DOM state, canonical-event fan-out to subscribed clients, and
//! a `busy` signal the scheduler gates dispatch on.
//!
//! Grounded in spec.md §4.8's three numbered responsibilities; the
//! tool-proxy/pending-request shape mirrors the teacher's dependency-free
//! "resolve whatever is waiting" idiom (`client.rs`'s single in-flight
//! request) generalized to many concurrent outstanding browser round-trips,
//! keyed by request id the way spec.md §3's stream/pending-response tables
//! are.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};

use crate::container::AgentContainer;
use crate::dispatcher::{CapabilityHost, ToolDispatcher};
use crate::events::AgentEvent;
use crate::hub::push::PushManager;
use crate::hub::state_store::StateStore;
use crate::relay::ShellRelay;
use crate::runner::{AgentState, RunnerOutbound};
use crate::tools::Tool;
use crate::types::AgentOptions;
use crate::{Error, Result};

/// Default time to wait for a subscribed browser client to answer a
/// proxied tool call before giving up (spec.md §4.8 step 1).
pub const BROWSER_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Tool names the spec calls out as browser-only: they require a live DOM
/// / iframe the hub itself doesn't have (spec.md §4.8 step 1).
const BROWSER_ONLY_TOOLS: &[&str] = &["dom", "view_state", "runjs"];

/// One frame queued for delivery to a subscribed client's websocket
/// connection — either a canonical event fan-out or a tool-proxy request
/// the hub server's read loop is expected to answer via
/// [`BrowserToolRouter::resolve`].
pub type ClientSink = mpsc::UnboundedSender<Value>;

/// Routes browser-only tool calls (and canonical event fan-out) to
/// whichever client a hub agent's subscribers happen to include, and
/// tracks requests awaiting a browser-side reply.
///
/// One instance is shared across every [`HubRunner`] in a hub process; it
/// has no notion of hub agent ids itself, only client ids, since a single
/// browser tab may be subscribed to several hub agents over one
/// connection.
#[derive(Default)]
pub struct BrowserToolRouter {
    clients: RwLock<HashMap<String, ClientSink>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Result<Value>>>>,
}

impl BrowserToolRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the outbound sink for `client_id`, called by
    /// the hub server when a client's websocket connects.
    pub async fn register_client(&self, client_id: impl Into<String>, sink: ClientSink) {
        self.clients.write().await.insert(client_id.into(), sink);
    }

    /// Drops the outbound sink and fails any requests still awaiting this
    /// client's reply, so a disconnect resolves pending tool calls as
    /// errors rather than hanging them indefinitely.
    pub async fn unregister_client(&self, client_id: &str) {
        self.clients.write().await.remove(client_id);
    }

    pub async fn is_registered(&self, client_id: &str) -> bool {
        self.clients.read().await.contains_key(client_id)
    }

    /// The first of `candidates` that currently has a live connection, if
    /// any (spec.md §4.8 step 1, "routed... to any subscribed browser
    /// client").
    pub async fn first_registered(&self, candidates: &[String]) -> Option<String> {
        let clients = self.clients.read().await;
        candidates.iter().find(|id| clients.contains_key(*id)).cloned()
    }

    /// Sends an arbitrary JSON frame to `client_id` if it is connected.
    /// Used both for event fan-out (`agent_loop_event`/`agent_event`) and
    /// tool-proxy requests.
    pub async fn send_to(&self, client_id: &str, frame: Value) -> bool {
        let clients = self.clients.read().await;
        match clients.get(client_id) {
            Some(sink) => sink.send(frame).is_ok(),
            None => false,
        }
    }

    /// Proxies one tool call to `client_id` and waits up to `timeout` for
    /// [`Self::resolve`] to be called with the matching request id.
    pub async fn dispatch(
        &self,
        client_id: &str,
        tool_name: &str,
        input: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        let frame = json!({
            "type": "tool_execute",
            "id": request_id,
            "tool": tool_name,
            "input": input,
        });
        if !self.send_to(client_id, frame).await {
            self.pending.lock().await.remove(&request_id);
            return Err(Error::tool(format!(
                "browser client {client_id} disconnected before dispatch"
            )));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::tool("browser client dropped without a result")),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(Error::timeout())
            }
        }
    }

    /// Resolves a pending proxied call, called by the hub server's read
    /// loop on an inbound `*_result{id}` message (spec.md §3's "pending
    /// response table").
    pub async fn resolve(&self, request_id: &str, result: Result<Value>) {
        if let Some(tx) = self.pending.lock().await.remove(request_id) {
            let _ = tx.send(result);
        }
    }
}

/// The [`CapabilityHost`] a [`HubRunner`] attaches to its `ToolDispatcher`:
/// hub-native tags are served locally, browser-only tags are proxied
/// through the shared [`BrowserToolRouter`] to whichever browser client the
/// hub agent has subscribed, and DOM writes update the runner's
/// authoritative copy before being broadcast onward.
struct HubCapabilityHost {
    hub_agent_id: String,
    relay: Arc<ShellRelay>,
    router: Arc<BrowserToolRouter>,
    state_store: Arc<Mutex<StateStore>>,
    dom_state: Arc<Mutex<Value>>,
    http: reqwest::Client,
}

impl HubCapabilityHost {
    async fn proxy_to_browser(&self, tool_name: &str, input: Value) -> Result<Value> {
        let subscribers = self.relay.subscribers_of(&self.hub_agent_id).await;
        let client_id = self
            .router
            .first_registered(&subscribers)
            .await
            .ok_or_else(|| {
                Error::tool(format!(
                    "browser-only tool {tool_name} requires a subscribed browser client"
                ))
            })?;
        self.router
            .dispatch(&client_id, tool_name, input, BROWSER_TOOL_TIMEOUT)
            .await
    }

    /// Broadcasts a DOM update to every subscriber of this hub agent other
    /// than `exclude_client_id` (spec.md §4.8 step 2).
    async fn broadcast_dom_update(&self, exclude_client_id: Option<&str>, state: &Value) {
        let frame = json!({ "type": "dom_state_update", "hubAgentId": self.hub_agent_id, "state": state });
        for client_id in self.relay.subscribers_of(&self.hub_agent_id).await {
            if Some(client_id.as_str()) == exclude_client_id {
                continue;
            }
            self.router.send_to(&client_id, frame.clone()).await;
        }
    }
}

#[async_trait]
impl CapabilityHost for HubCapabilityHost {
    async fn runjs(&self, code: &str) -> Result<Value> {
        self.proxy_to_browser("runjs", json!({ "code": code })).await
    }

    async fn dom(&self, input: Value) -> Result<Value> {
        let result = self.proxy_to_browser("dom", input).await?;
        *self.dom_state.lock().await = result.clone();
        self.broadcast_dom_update(None, &result).await;
        Ok(result)
    }

    async fn fetch(&self, input: Value) -> Result<Value> {
        let url = input
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_input("fetch tool requires a `url` field"))?;
        let response = self.http.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(json!({ "status": status, "body": body }))
    }

    async fn storage(&self, input: Value) -> Result<Value> {
        // Hub-side storage reuses the per-agent state store rather than a
        // separate key/value backend: same bounds, same escalation rules.
        self.state(input).await
    }

    async fn files(&self, _path: &str, _input: Value) -> Result<Value> {
        Err(Error::tool(
            "files tool is not supported by a headless hub runner",
        ))
    }

    async fn capabilities(&self) -> Result<Value> {
        Ok(json!({
            "dom": true,
            "view_state": true,
            "runjs": true,
            "fetch": true,
            "storage": true,
            "state": true,
            "files": false,
        }))
    }

    async fn state(&self, input: Value) -> Result<Value> {
        let action = input.get("action").and_then(Value::as_str).unwrap_or("get");
        let key = input
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_input("state tool requires a `key` field"))?;
        let mut store = self.state_store.lock().await;
        match action {
            "set" => {
                let value = input.get("value").cloned().unwrap_or(Value::Null);
                let fired = store.set(&self.hub_agent_id, key, value)?;
                Ok(json!({ "ok": true, "escalations": fired }))
            }
            "delete" => {
                store.delete(&self.hub_agent_id, key);
                Ok(json!({ "ok": true }))
            }
            _ => Ok(store.get(&self.hub_agent_id, key).cloned().unwrap_or(Value::Null)),
        }
    }

    async fn view_state(&self, input: Value) -> Result<Value> {
        self.proxy_to_browser("view_state", input).await
    }
}

/// The server-side mirror of one hosted agent: an [`AgentContainer`] plus
/// the hub-only bookkeeping spec.md §4.8 calls for.
pub struct HubRunner {
    hub_agent_id: String,
    container: Arc<AgentContainer>,
    dispatcher: Arc<ToolDispatcher>,
    busy: Arc<AtomicBool>,
    total_cost_usd: Arc<Mutex<f64>>,
    push: Option<Arc<Mutex<PushManager>>>,
}

impl HubRunner {
    /// Builds a hub runner for `hub_agent_id`, wiring a [`HubCapabilityHost`]
    /// into a fresh [`ToolDispatcher`] and starting the event-fan-out pump.
    pub fn new(
        hub_agent_id: impl Into<String>,
        options: AgentOptions,
        tools: Vec<Arc<Tool>>,
        relay: Arc<ShellRelay>,
        router: Arc<BrowserToolRouter>,
        state_store: Arc<Mutex<StateStore>>,
        push: Option<Arc<Mutex<PushManager>>>,
    ) -> Self {
        let hub_agent_id = hub_agent_id.into();

        let host = Arc::new(HubCapabilityHost {
            hub_agent_id: hub_agent_id.clone(),
            relay: relay.clone(),
            router: router.clone(),
            state_store,
            dom_state: Arc::new(Mutex::new(Value::Null)),
            http: reqwest::Client::new(),
        });
        let dispatcher = Arc::new(ToolDispatcher::new(tools).with_host(host.clone()));

        let container = Arc::new(AgentContainer::new(
            hub_agent_id.clone(),
            options,
            dispatcher.clone(),
            Some(host as Arc<dyn CapabilityHost>),
        ));

        let busy = Arc::new(AtomicBool::new(false));
        let total_cost_usd = Arc::new(Mutex::new(0.0));

        let fanout_container = container.clone();
        let fanout_hub_agent_id = hub_agent_id.clone();
        let fanout_busy = busy.clone();
        let fanout_total_cost_usd = total_cost_usd.clone();
        let fanout_push = push.clone();
        tokio::spawn(async move {
            let outbound = fanout_container.subscribe_events().await;
            Self::run_fanout(
                fanout_hub_agent_id,
                relay,
                router,
                fanout_busy,
                fanout_total_cost_usd,
                fanout_push,
                outbound,
            )
            .await;
        });

        Self {
            hub_agent_id,
            container,
            dispatcher,
            busy,
            total_cost_usd,
            push,
        }
    }

    pub fn hub_agent_id(&self) -> &str {
        &self.hub_agent_id
    }

    pub async fn state(&self) -> AgentState {
        self.container.state().await
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Scheduler dispatch precondition (spec.md §4.9): the runner must
    /// exist, be `running`, and not be mid-turn.
    pub async fn is_eligible_for_scheduled_dispatch(&self) -> bool {
        self.state().await == AgentState::Running && !self.is_busy()
    }

    pub async fn start(&self, initial_user_message: Option<String>) -> Result<()> {
        self.container.start(initial_user_message).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.container.pause().await
    }

    pub async fn resume(&self) -> Result<()> {
        self.container.resume().await
    }

    pub async fn stop(&self) -> Result<()> {
        self.container.stop().await
    }

    pub async fn kill(&self) {
        self.container.kill().await
    }

    /// Cron/event-triggered message delivery (spec.md §4.9,
    /// `runner.sendMessage`).
    pub async fn send_message(&self, text: impl Into<String>) -> Result<()> {
        self.container.send_message(text).await
    }

    /// Direct tool execution bypassing the loop, for the scheduler's
    /// tool-style entries (spec.md §4.9, `executeToolForAgent`).
    pub async fn execute_tool_for_agent(&self, tool_name: &str, input: Value) -> Result<Value> {
        self.dispatcher.dispatch(tool_name, input).await
    }

    pub async fn total_cost_usd(&self) -> f64 {
        *self.total_cost_usd.lock().await
    }

    pub async fn mirror_subscribe(&self, client_id: impl Into<String>) {
        self.container.mirror_subscribe(client_id).await
    }

    pub async fn mirror_unsubscribe(&self, client_id: &str) {
        self.container.mirror_unsubscribe(client_id).await
    }

    /// Drains `outbound` forever, fanning canonical events out to every
    /// subscriber of this hub agent as `agent_loop_event`/`agent_event`
    /// frames and toggling `busy` around a turn's lifetime (spec.md §4.8
    /// step 3, §4.9's busy gate). Spawned once by [`HubRunner::new`] against
    /// a receiver obtained from the container's `subscribe_events`; events
    /// published before that subscription completes (a brief window right
    /// at construction, before the caller's own `start` call) are only
    /// reflected in `container.state()`, not fanned out — acceptable for a
    /// best-effort notification channel with no delivery guarantee.
    async fn run_fanout(
        hub_agent_id: String,
        relay: Arc<ShellRelay>,
        router: Arc<BrowserToolRouter>,
        busy: Arc<AtomicBool>,
        total_cost_usd: Arc<Mutex<f64>>,
        push: Option<Arc<Mutex<PushManager>>>,
        mut outbound: mpsc::UnboundedReceiver<RunnerOutbound>,
    ) {
        while let Some(event) = outbound.recv().await {
            match &event {
                RunnerOutbound::ToolDispatched { .. } => busy.store(true, Ordering::SeqCst),
                RunnerOutbound::LoopComplete => {
                    busy.store(false, Ordering::SeqCst);
                    // The loop finished a full turn with nothing left to dispatch:
                    // the natural "the agent has something to tell you" moment
                    // (spec.md §4.8 step 3, "A `notify_user` event also triggers
                    // push"). `send_notify` itself fans out to subscribers and,
                    // via `push`, suppresses when a device is active.
                    Self::send_notify(
                        &hub_agent_id,
                        &relay,
                        &router,
                        push.as_deref(),
                        "your agent has a response waiting",
                    )
                    .await;
                }
                RunnerOutbound::AgentEvent(AgentEvent::Usage {
                    estimated_cost_usd: Some(cost),
                    ..
                }) => {
                    *total_cost_usd.lock().await += cost;
                }
                _ => {}
            }

            let frame = match &event {
                RunnerOutbound::AgentEvent(agent_event) => Some(json!({
                    "type": "agent_loop_event",
                    "hubAgentId": hub_agent_id,
                    "event": agent_event,
                })),
                RunnerOutbound::StateChanged { state } => Some(json!({
                    "type": "agent_event",
                    "hubAgentId": hub_agent_id,
                    "state": format!("{state:?}"),
                })),
                _ => None,
            };
            if let Some(frame) = frame {
                let subscribers = relay.subscribers_of(&hub_agent_id).await;
                for client_id in subscribers {
                    router.send_to(&client_id, frame.clone()).await;
                }
            }
        }
    }

    /// Sends `message` to every subscriber of `hub_agent_id` and, via `push`,
    /// to devices the user isn't actively looking at (spec.md §4.8 step 3,
    /// "A `notify_user` event also triggers push"). Shared by the automatic
    /// `LoopComplete` trigger in `run_fanout` and the public `notify_user`.
    async fn send_notify(
        hub_agent_id: &str,
        relay: &ShellRelay,
        router: &BrowserToolRouter,
        push: Option<&Mutex<PushManager>>,
        message: &str,
    ) {
        let frame = json!({
            "type": "agent_event",
            "hubAgentId": hub_agent_id,
            "event": "notify_user",
            "message": message,
        });
        for client_id in relay.subscribers_of(hub_agent_id).await {
            router.send_to(&client_id, frame.clone()).await;
        }
        if let Some(push) = push {
            let payload = json!({ "title": "flo.monster", "body": message }).to_string();
            push.lock().await.broadcast(payload.as_bytes()).await;
        }
    }

    /// Public entry point for hub-native tools (or an embedding application)
    /// to proactively notify the user outside the automatic `LoopComplete`
    /// trigger above, using this runner's own subscriptions and push manager.
    pub async fn notify_user(
        &self,
        relay: &ShellRelay,
        router: &BrowserToolRouter,
        push: Option<&Mutex<PushManager>>,
        message: impl Into<String>,
    ) {
        let message = message.into();
        let push = push.or(self.push.as_deref());
        Self::send_notify(&self.hub_agent_id, relay, router, push, &message).await;
    }
}

/// `true` if `tool_name` must be proxied to a browser client rather than
/// served locally (spec.md §4.8 step 1).
pub fn is_browser_only_tool(tool_name: &str) -> bool {
    BROWSER_ONLY_TOOLS.contains(&tool_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::push::{PushTransport, VapidKeyPair};
    use crate::hub::state_store::StateLimits;
    use crate::types::ProviderKind;

    fn opts() -> AgentOptions {
        AgentOptions::builder()
            .model("gpt-test")
            .base_url("http://localhost:1234/v1")
            .provider(ProviderKind::OpenAiChat)
            .build()
            .unwrap()
    }

    #[test]
    fn browser_only_tools_are_named_correctly() {
        assert!(is_browser_only_tool("dom"));
        assert!(is_browser_only_tool("view_state"));
        assert!(is_browser_only_tool("runjs"));
        assert!(!is_browser_only_tool("fetch"));
        assert!(!is_browser_only_tool("storage"));
    }

    #[tokio::test]
    async fn tool_proxy_without_subscribed_browser_errors() {
        let relay = Arc::new(ShellRelay::new());
        let router = Arc::new(BrowserToolRouter::new());
        let state_store = Arc::new(Mutex::new(StateStore::new(StateLimits::default())));
        let hub_runner = HubRunner::new(
            "hub-agent-1",
            opts(),
            Vec::new(),
            relay,
            router,
            state_store,
            None,
        );
        let err = hub_runner
            .execute_tool_for_agent("dom", json!({ "action": "snapshot" }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tool(_)));
    }

    #[tokio::test]
    async fn state_tool_round_trips_through_shared_store() {
        let relay = Arc::new(ShellRelay::new());
        let router = Arc::new(BrowserToolRouter::new());
        let state_store = Arc::new(Mutex::new(StateStore::new(StateLimits::default())));
        let hub_runner = HubRunner::new(
            "hub-agent-1",
            opts(),
            Vec::new(),
            relay,
            router,
            state_store,
            None,
        );
        hub_runner
            .execute_tool_for_agent(
                "state",
                json!({ "action": "set", "key": "counter", "value": 1 }),
            )
            .await
            .unwrap();
        let result = hub_runner
            .execute_tool_for_agent("state", json!({ "action": "get", "key": "counter" }))
            .await
            .unwrap();
        assert_eq!(result, json!(1));
    }

    #[tokio::test]
    async fn scheduled_dispatch_requires_running_and_not_busy() {
        let relay = Arc::new(ShellRelay::new());
        let router = Arc::new(BrowserToolRouter::new());
        let state_store = Arc::new(Mutex::new(StateStore::new(StateLimits::default())));
        let hub_runner = HubRunner::new(
            "hub-agent-1",
            opts(),
            Vec::new(),
            relay,
            router,
            state_store,
            None,
        );
        assert!(!hub_runner.is_eligible_for_scheduled_dispatch().await);
        hub_runner.busy.store(false, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn browser_router_resolves_pending_dispatch() {
        let router = Arc::new(BrowserToolRouter::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.register_client("client-1", tx).await;

        let router_clone = router.clone();
        let handle = tokio::spawn(async move {
            router_clone
                .dispatch("client-1", "dom", json!({}), Duration::from_secs(1))
                .await
        });

        let frame = rx.recv().await.unwrap();
        let id = frame["id"].as_str().unwrap().to_string();
        router.resolve(&id, Ok(json!({ "ok": true }))).await;

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result["ok"], true);
    }

    #[tokio::test]
    async fn browser_router_times_out_without_a_reply() {
        let router = Arc::new(BrowserToolRouter::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        router.register_client("client-1", tx).await;

        let err = router
            .dispatch("client-1", "dom", json!({}), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[tokio::test]
    async fn dispatch_to_unregistered_client_errors_immediately() {
        let router = BrowserToolRouter::new();
        let err = router
            .dispatch("ghost", "dom", json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tool(_)));
    }

    struct NullTransport;
    #[async_trait]
    impl PushTransport for NullTransport {
        async fn send(
            &self,
            _subscription: &crate::hub::push::PushSubscription,
            _payload: &[u8],
        ) -> Result<u16> {
            Ok(201)
        }
    }

    #[tokio::test]
    async fn notify_user_fans_out_to_subscribers_and_push() {
        let relay = ShellRelay::new();
        relay.subscribe("client-1", "hub-agent-1").await;
        let router = BrowserToolRouter::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.register_client("client-1", tx).await;
        let push = Mutex::new(PushManager::from_keys(
            VapidKeyPair::generate(),
            Box::new(NullTransport),
        ));

        let hub_runner = HubRunner::new(
            "hub-agent-1",
            opts(),
            Vec::new(),
            Arc::new(ShellRelay::new()),
            Arc::new(BrowserToolRouter::new()),
            Arc::new(Mutex::new(StateStore::new(StateLimits::default()))),
            None,
        );

        hub_runner
            .notify_user(&relay, &router, Some(&push), "hello")
            .await;
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame["event"], "notify_user");
    }

    struct CountingTransport {
        sends: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl PushTransport for CountingTransport {
        async fn send(
            &self,
            _subscription: &crate::hub::push::PushSubscription,
            _payload: &[u8],
        ) -> Result<u16> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(201)
        }
    }

    /// The bug this guards against: `HubRunner::new`'s `push` argument used
    /// to be accepted and silently discarded, so a production hub never
    /// actually pushed anything. `run_fanout` now fires a push automatically
    /// when a turn completes.
    #[tokio::test]
    async fn loop_complete_triggers_automatic_push() {
        let sends = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut push_manager =
            PushManager::from_keys(VapidKeyPair::generate(), Box::new(CountingTransport {
                sends: sends.clone(),
            }));
        push_manager.restore_verified(vec![crate::hub::push::PushSubscription {
            device_id: "d1".into(),
            endpoint: "https://example.test/push".into(),
            p256dh: "p256dh".into(),
            auth: "auth".into(),
            connected: false,
            visible: false,
            verified: true,
        }]);
        let push = Arc::new(Mutex::new(push_manager));

        let relay = Arc::new(ShellRelay::new());
        relay.subscribe("client-1", "hub-agent-1").await;
        let router = Arc::new(BrowserToolRouter::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.register_client("client-1", tx).await;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let busy = Arc::new(AtomicBool::new(true));
        let total_cost_usd = Arc::new(Mutex::new(0.0));
        let fanout = tokio::spawn(HubRunner::run_fanout(
            "hub-agent-1".to_string(),
            relay,
            router,
            busy.clone(),
            total_cost_usd,
            Some(push),
            outbound_rx,
        ));

        outbound_tx.send(RunnerOutbound::LoopComplete).unwrap();
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame["event"], "notify_user");
        assert!(!busy.load(Ordering::SeqCst));
        assert_eq!(sends.load(Ordering::SeqCst), 1);

        drop(outbound_tx);
        let _ = fanout.await;
    }
}
