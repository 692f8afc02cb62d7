//! Hub Client Demo
//!
//! Talks to the `hub` binary (spec.md §4.6-§4.12) over its HTTP + WebSocket
//! surface: creates a hub-persisted agent, subscribes to its event stream,
//! sends it a message, and prints whatever `agent_loop_event`/`agent_event`
//! frames arrive.
//!
//! Start the hub first: `HUB_DATA_DIR=./data cargo run --bin hub`.

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;

const HUB_HTTP: &str = "http://127.0.0.1:8787";
const HUB_WS: &str = "ws://127.0.0.1:8787/ws";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let http = reqwest::Client::new();

    let hub_agent_id = "demo-agent-1";
    let create: Value = http
        .post(format!("{HUB_HTTP}/agents"))
        .json(&json!({
            "hub_agent_id": hub_agent_id,
            "model": "llama3.1",
            "base_url": "http://localhost:11434/v1",
            "system_prompt": "You are a terse assistant running on a hub.",
        }))
        .send()
        .await?
        .json()
        .await?;
    println!("created hub agent: {create}");

    let (ws_stream, _) = tokio_tungstenite::connect_async(HUB_WS).await?;
    let (mut write, mut read) = ws_stream.split();

    write
        .send(Message::Text(
            json!({ "type": "subscribe", "hubAgentId": hub_agent_id }).to_string(),
        ))
        .await?;

    http.post(format!("{HUB_HTTP}/agents/{hub_agent_id}/message"))
        .json(&json!({ "text": "Say hello in five words or fewer." }))
        .send()
        .await?;

    println!("listening for events (Ctrl-C to stop)...");
    while let Some(Ok(message)) = read.next().await {
        let Message::Text(text) = message else { continue };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        match frame.get("type").and_then(Value::as_str) {
            Some("agent_loop_event") | Some("agent_event") => {
                println!("event: {frame}");
            }
            Some("tool_execute") => {
                // A hub-hosted agent asked this browser-role client to run a
                // browser-only tool. This demo has none to offer, so it
                // reports an error back rather than hanging the dispatch.
                if let Some(id) = frame.get("id").and_then(Value::as_str) {
                    write
                        .send(Message::Text(
                            json!({
                                "type": "tool_result",
                                "id": id,
                                "isError": true,
                                "error": "hub_client demo has no browser tools",
                            })
                            .to_string(),
                        ))
                        .await?;
                }
            }
            other => println!("unhandled frame: {other:?}"),
        }
    }

    Ok(())
}
