//! Agent container (spec.md §4.7): owns one [`AgentRunner`]'s task handle
//! and the lifecycle around it — observer callbacks, `kill` (terminal but
//! inspectable until `close`), `restart` (fresh runner, back to `pending`),
//! and DOM-snapshot capture/restore through the same [`CapabilityHost`] the
//! dispatcher already talks to.
//!
//! The teacher has no equivalent: `client.rs::Client` is used and dropped by
//! its caller with no persistent identity. This container is grounded in
//! that same drop-on-scope-exit simplicity for the actual request plumbing
//! (it delegates everything turn-related to `runner.rs`) while adding just
//! the bookkeeping a multi-agent host needs to keep several of them alive
//! side by side.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::dispatcher::{CapabilityHost, ToolDispatcher};
use crate::runner::{AgentRunner, AgentState, RunnerOutbound};
use crate::types::AgentOptions;
use crate::{Error, Result};

/// Observer invoked on every lifecycle transition an [`AgentContainer`]
/// goes through. Kept as a plain boxed closure, matching the teacher's
/// preference for `Fn`-trait callbacks over a heavier observer trait
/// (`hooks.rs::NativeHandler` uses the same shape for its callbacks).
pub type LifecycleObserver = Arc<dyn Fn(&str, AgentState) + Send + Sync>;

/// A captured DOM/view snapshot, opaque to the container itself — it is
/// whatever the [`CapabilityHost`] considers a faithful restore point.
#[derive(Debug, Clone)]
pub struct DomSnapshot {
    pub value: Value,
}

enum RunnerSlot {
    /// Not yet started, or killed/closed: no background task exists.
    Idle,
    /// A runner task is in flight.
    Running {
        runner: Arc<AgentRunner>,
        handle: JoinHandle<Result<()>>,
    },
}

/// Owns one agent's runner across restarts, tracking the last known state
/// and, optionally, a DOM snapshot to restore into a fresh runner.
pub struct AgentContainer {
    agent_id: String,
    options: AgentOptions,
    dispatcher: Arc<ToolDispatcher>,
    host: Option<Arc<dyn CapabilityHost>>,
    slot: Mutex<RunnerSlot>,
    last_state: Arc<Mutex<AgentState>>,
    snapshot: Mutex<Option<DomSnapshot>>,
    observers: Mutex<Vec<LifecycleObserver>>,
    /// Subscribed hub client ids mirrored here so a container can be asked
    /// "does anyone still care about you" without reaching back into the
    /// relay (spec.md §4.7, "hub-linked subscribe/unsubscribe mirroring").
    hub_subscribers: Mutex<Vec<String>>,
    /// Additional sinks that want the full `RunnerOutbound` stream, not just
    /// lifecycle transitions — the hub runner's event fan-out and busy
    /// tracking attach here rather than duplicating the runner task
    /// themselves (spec.md §4.8). `Arc`-wrapped so the outbound-event pump
    /// spawned in `start` can hold its own handle to the same list.
    event_subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<RunnerOutbound>>>>,
}

impl AgentContainer {
    pub fn new(
        agent_id: impl Into<String>,
        options: AgentOptions,
        dispatcher: Arc<ToolDispatcher>,
        host: Option<Arc<dyn CapabilityHost>>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            options,
            dispatcher,
            host,
            slot: Mutex::new(RunnerSlot::Idle),
            last_state: Arc::new(Mutex::new(AgentState::Pending)),
            snapshot: Mutex::new(None),
            observers: Mutex::new(Vec::new()),
            hub_subscribers: Mutex::new(Vec::new()),
            event_subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Registers for the full `RunnerOutbound` stream (agent events, tool
    /// dispatch markers, budget/loop-complete signals), not just lifecycle
    /// transitions. Each call adds an independent receiver; a closed
    /// receiver is pruned lazily the next time an event is published.
    pub async fn subscribe_events(&self) -> mpsc::UnboundedReceiver<RunnerOutbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.event_subscribers.lock().await.push(tx);
        rx
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub async fn add_observer(&self, observer: LifecycleObserver) {
        self.observers.lock().await.push(observer);
    }

    async fn notify(&self, state: AgentState) {
        *self.last_state.lock().await = state;
        let observers = self.observers.lock().await;
        for observer in observers.iter() {
            observer(&self.agent_id, state);
        }
    }

    pub async fn state(&self) -> AgentState {
        *self.last_state.lock().await
    }

    /// Starts the runner task if one is not already running. Spawns an
    /// outbound-event pump that relays `StateChanged` into the container's
    /// own observers, mirroring `tracing`-style structured transitions the
    /// teacher emits from `Client::send_message`'s state checks.
    pub async fn start(&self, initial_user_message: Option<String>) -> Result<()> {
        let mut slot = self.slot.lock().await;
        if matches!(&*slot, RunnerSlot::Running { .. }) {
            return Err(Error::invalid_input("agent container already running"));
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<RunnerOutbound>();
        let runner = Arc::new(AgentRunner::new(
            self.agent_id.clone(),
            self.options.clone(),
            self.dispatcher.clone(),
            tx,
        ));

        let pump_last_state = self.last_state.clone();
        let pump_event_subscribers = self.event_subscribers.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let RunnerOutbound::StateChanged { state } = &event {
                    *pump_last_state.lock().await = *state;
                }
                let mut subscribers = pump_event_subscribers.lock().await;
                subscribers.retain(|tx| tx.send(event.clone()).is_ok());
            }
        });

        let run_handle_runner = runner.clone();
        let handle = tokio::spawn(async move { run_handle_runner.run(initial_user_message).await });

        *slot = RunnerSlot::Running { runner, handle };
        drop(slot);
        self.notify(AgentState::Running).await;
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        match &*self.slot.lock().await {
            RunnerSlot::Running { runner, .. } => {
                runner.pause();
                Ok(())
            }
            RunnerSlot::Idle => Err(Error::invalid_input("agent container is not running")),
        }
    }

    pub async fn resume(&self) -> Result<()> {
        match &*self.slot.lock().await {
            RunnerSlot::Running { runner, .. } => {
                runner.resume();
                Ok(())
            }
            RunnerSlot::Idle => Err(Error::invalid_input("agent container is not running")),
        }
    }

    /// Stops the loop cooperatively; the runner exits at its next
    /// suspension point and the container transitions to `stopped`, which
    /// unlike `killed`/`error` can be restarted.
    pub async fn stop(&self) -> Result<()> {
        match &*self.slot.lock().await {
            RunnerSlot::Running { runner, .. } => {
                runner.stop();
                Ok(())
            }
            RunnerSlot::Idle => Err(Error::invalid_input("agent container is not running")),
        }
    }

    /// Forcibly ends the agent: aborts the task outright rather than
    /// waiting for a cooperative suspension point, and marks the state
    /// terminal (spec.md §4.7, "kill is terminal-but-retained until
    /// close"). The container itself survives so callers can still inspect
    /// its last known state and snapshot.
    pub async fn kill(&self) {
        let mut slot = self.slot.lock().await;
        if let RunnerSlot::Running { handle, .. } = &*slot {
            handle.abort();
        }
        *slot = RunnerSlot::Idle;
        drop(slot);
        self.notify(AgentState::Killed).await;
    }

    /// Drops all retained state for this container. Callers remove the
    /// container from whatever registry (`relay.rs::ShellRelay`) holds it
    /// after calling this; the container itself has nothing left to track.
    pub async fn close(&self) {
        self.kill().await;
        *self.snapshot.lock().await = None;
        self.observers.lock().await.clear();
    }

    /// Restarts a killed or stopped agent: builds a fresh runner task and
    /// re-enters `pending`, matching spec.md §4.7's "restart produces a new
    /// runner task, not a resumed one" rule — killed runners cannot be
    /// resumed in place because their task has already been aborted.
    pub async fn restart(&self, initial_user_message: Option<String>) -> Result<()> {
        {
            let mut slot = self.slot.lock().await;
            if let RunnerSlot::Running { handle, .. } = &*slot {
                handle.abort();
            }
            *slot = RunnerSlot::Idle;
        }
        self.notify(AgentState::Pending).await;
        self.start(initial_user_message).await
    }

    /// Captures the current DOM/view state through the capability host for
    /// later restore, e.g. before suspending an agent that may be revived
    /// in a different process (spec.md §4.7, "DOM-snapshot capture").
    pub async fn capture_snapshot(&self) -> Result<()> {
        let host = self
            .host
            .as_ref()
            .ok_or_else(|| Error::invalid_input("no capability host attached to this container"))?;
        let value = host.dom(serde_json::json!({ "action": "snapshot" })).await?;
        *self.snapshot.lock().await = Some(DomSnapshot { value });
        Ok(())
    }

    pub async fn snapshot(&self) -> Option<DomSnapshot> {
        self.snapshot.lock().await.clone()
    }

    /// Replays a previously captured snapshot through the host, e.g. after
    /// `restart` brings the agent back to `pending` with no DOM state of
    /// its own.
    pub async fn restore_snapshot(&self) -> Result<()> {
        let host = self
            .host
            .as_ref()
            .ok_or_else(|| Error::invalid_input("no capability host attached to this container"))?;
        let snapshot = self.snapshot.lock().await.clone();
        let Some(snapshot) = snapshot else {
            return Err(Error::invalid_input("no snapshot captured for this agent"));
        };
        host.dom(serde_json::json!({ "action": "restore", "state": snapshot.value }))
            .await?;
        Ok(())
    }

    /// Pushes an external message into the running runner's event queue
    /// (spec.md §4.9, `runner.sendMessage` for cron/event-triggered
    /// delivery). Errors if the agent isn't currently running rather than
    /// silently queuing against a runner that no longer exists.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<()> {
        match &*self.slot.lock().await {
            RunnerSlot::Running { runner, .. } => {
                runner.push_external_event(text.into()).await;
                Ok(())
            }
            RunnerSlot::Idle => Err(Error::invalid_input("agent container is not running")),
        }
    }

    pub async fn mirror_subscribe(&self, client_id: impl Into<String>) {
        let client_id = client_id.into();
        let mut subs = self.hub_subscribers.lock().await;
        if !subs.contains(&client_id) {
            subs.push(client_id);
        }
    }

    pub async fn mirror_unsubscribe(&self, client_id: &str) {
        self.hub_subscribers.lock().await.retain(|c| c != client_id);
    }

    pub async fn has_subscribers(&self) -> bool {
        !self.hub_subscribers.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::CapabilityHost;
    use crate::types::AgentOptions;
    use async_trait::async_trait;
    use serde_json::json;

    struct NoopHost;

    #[async_trait]
    impl CapabilityHost for NoopHost {
        async fn runjs(&self, _code: &str) -> Result<Value> {
            Ok(Value::Null)
        }
        async fn dom(&self, input: Value) -> Result<Value> {
            if input.get("action").and_then(Value::as_str) == Some("snapshot") {
                return Ok(json!({ "scroll": 0 }));
            }
            Ok(Value::Null)
        }
        async fn fetch(&self, _input: Value) -> Result<Value> {
            Ok(Value::Null)
        }
        async fn storage(&self, _input: Value) -> Result<Value> {
            Ok(Value::Null)
        }
        async fn files(&self, _path: &str, _input: Value) -> Result<Value> {
            Ok(Value::Null)
        }
        async fn capabilities(&self) -> Result<Value> {
            Ok(Value::Null)
        }
        async fn state(&self, _input: Value) -> Result<Value> {
            Ok(Value::Null)
        }
        async fn view_state(&self, _input: Value) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    fn opts() -> AgentOptions {
        AgentOptions::builder()
            .system_prompt("you are a test agent")
            .model("gpt-test")
            .api_key("test-key")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn fresh_container_starts_pending() {
        let dispatcher = Arc::new(ToolDispatcher::new(Vec::new()));
        let container = AgentContainer::new("agent-1", opts(), dispatcher, None);
        assert_eq!(container.state().await, AgentState::Pending);
    }

    #[tokio::test]
    async fn pause_without_running_task_errors() {
        let dispatcher = Arc::new(ToolDispatcher::new(Vec::new()));
        let container = AgentContainer::new("agent-1", opts(), dispatcher, None);
        assert!(container.pause().await.is_err());
    }

    #[tokio::test]
    async fn kill_marks_terminal_state() {
        let dispatcher = Arc::new(ToolDispatcher::new(Vec::new()));
        let container = AgentContainer::new("agent-1", opts(), dispatcher, None);
        container.kill().await;
        assert_eq!(container.state().await, AgentState::Killed);
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_host() {
        let dispatcher = Arc::new(ToolDispatcher::new(Vec::new()));
        let host = Arc::new(NoopHost);
        let container = AgentContainer::new("agent-1", opts(), dispatcher, Some(host));
        assert!(container.snapshot().await.is_none());
        container.capture_snapshot().await.unwrap();
        let snap = container.snapshot().await.unwrap();
        assert_eq!(snap.value["scroll"], 0);
        assert!(container.restore_snapshot().await.is_ok());
    }

    #[tokio::test]
    async fn snapshot_without_host_errors() {
        let dispatcher = Arc::new(ToolDispatcher::new(Vec::new()));
        let container = AgentContainer::new("agent-1", opts(), dispatcher, None);
        assert!(container.capture_snapshot().await.is_err());
    }

    #[tokio::test]
    async fn hub_subscription_mirror_tracks_presence() {
        let dispatcher = Arc::new(ToolDispatcher::new(Vec::new()));
        let container = AgentContainer::new("agent-1", opts(), dispatcher, None);
        assert!(!container.has_subscribers().await);
        container.mirror_subscribe("client-1").await;
        assert!(container.has_subscribers().await);
        container.mirror_unsubscribe("client-1").await;
        assert!(!container.has_subscribers().await);
    }
}
