//! Viewport streamer (spec.md §4.11): a dedicated WebSocket server that
//! pushes JPEG frames of an agent's rendered viewport to subscribed
//! clients and forwards validated input events back.
//!
//! Grounded on the example pack's `tokio-tungstenite` dependency (already
//! in the workspace `Cargo.toml` for this reason) rather than axum's
//! built-in `ws` feature, since the binary frame protocol here
//! (`{frame_num, width, height, quality}` header + raw JPEG bytes) needs
//! direct control over the message's binary encoding that a JSON-oriented
//! handler would only get in the way of.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use rand::RngCore;
use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Result};

/// Auth tokens expire quickly: they are meant to be minted and consumed
/// within one page load, not held long-term (spec.md §4.11).
pub const TOKEN_TTL: Duration = Duration::from_secs(30);

/// Hard cap on simultaneous viewport connections.
pub const MAX_CONNECTIONS: usize = 64;

/// Fixed binary frame header preceding the JPEG payload on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_num: u32,
    pub width: u16,
    pub height: u16,
    pub quality: u8,
}

impl FrameHeader {
    pub const WIRE_LEN: usize = 4 + 2 + 2 + 1;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut buf = [0u8; Self::WIRE_LEN];
        buf[0..4].copy_from_slice(&self.frame_num.to_be_bytes());
        buf[4..6].copy_from_slice(&self.width.to_be_bytes());
        buf[6..8].copy_from_slice(&self.height.to_be_bytes());
        buf[8] = self.quality;
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::WIRE_LEN {
            return Err(Error::viewport("frame header too short"));
        }
        Ok(Self {
            frame_num: u32::from_be_bytes(bytes[0..4].try_into().unwrap()),
            width: u16::from_be_bytes(bytes[4..6].try_into().unwrap()),
            height: u16::from_be_bytes(bytes[6..8].try_into().unwrap()),
            quality: bytes[8],
        })
    }
}

/// Encodes one full frame (header + JPEG bytes) for sending as a single
/// binary WebSocket message.
pub fn encode_frame(header: FrameHeader, jpeg: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FrameHeader::WIRE_LEN + jpeg.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(jpeg);
    out
}

pub fn decode_frame(bytes: &[u8]) -> Result<(FrameHeader, &[u8])> {
    let header = FrameHeader::decode(bytes)?;
    Ok((header, &bytes[FrameHeader::WIRE_LEN..]))
}

/// A 4-byte acknowledgement of the last frame a client actually rendered,
/// letting the server skip stale frames rather than queue them.
pub fn encode_ack(frame_num: u32) -> [u8; 4] {
    frame_num.to_be_bytes()
}

pub fn decode_ack(bytes: &[u8]) -> Result<u32> {
    if bytes.len() != 4 {
        return Err(Error::viewport("ack must be exactly 4 bytes"));
    }
    Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
}

/// A validated pointer/keyboard event forwarded from a viewport client.
#[derive(Debug, Clone, Deserialize)]
pub struct InputEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub key: Option<String>,
}

const VALID_INPUT_KINDS: &[&str] = &["pointerdown", "pointerup", "pointermove", "keydown", "keyup"];

/// Parses and validates a raw `input_event` JSON payload. Rejects unknown
/// event kinds rather than forwarding them to the handler unchecked.
pub fn parse_input_event(raw: &Value) -> Result<InputEvent> {
    let event: InputEvent = serde_json::from_value(raw.clone())
        .map_err(|e| Error::viewport(format!("malformed input_event: {e}")))?;
    if !VALID_INPUT_KINDS.contains(&event.kind.as_str()) {
        return Err(Error::viewport(format!(
            "unsupported input_event kind: {}",
            event.kind
        )));
    }
    Ok(event)
}

/// Receives validated input events for one agent. Implemented by whatever
/// owns the agent's `CapabilityHost` (normally forwarded into a `dom`
/// capability call).
#[async_trait]
pub trait InputHandler: Send + Sync {
    async fn handle_input(&self, agent_id: &str, event: InputEvent) -> Result<()>;
}

struct IssuedToken {
    agent_id: String,
    client_id: String,
    issued_at: SystemTime,
}

/// Issues and validates short-TTL `(agent_id, client_id)` auth tokens, and
/// tracks connection count against [`MAX_CONNECTIONS`].
pub struct ViewportServer {
    tokens: HashMap<String, IssuedToken>,
    active_connections: usize,
}

impl Default for ViewportServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewportServer {
    pub fn new() -> Self {
        Self {
            tokens: HashMap::new(),
            active_connections: 0,
        }
    }

    pub fn issue_token(&mut self, agent_id: impl Into<String>, client_id: impl Into<String>) -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        self.tokens.insert(
            token.clone(),
            IssuedToken {
                agent_id: agent_id.into(),
                client_id: client_id.into(),
                issued_at: SystemTime::now(),
            },
        );
        token
    }

    /// Validates `token` for exactly `(agent_id, client_id)`, consuming it
    /// on success so each token grants one connection.
    pub fn redeem_token(&mut self, token: &str, agent_id: &str, client_id: &str) -> Result<()> {
        let issued = self
            .tokens
            .get(token)
            .ok_or_else(|| Error::viewport("unknown or already-used viewport token"))?;
        if issued.agent_id != agent_id || issued.client_id != client_id {
            return Err(Error::viewport("token does not match agent/client pair"));
        }
        let expired = issued
            .issued_at
            .elapsed()
            .map(|age| age > TOKEN_TTL)
            .unwrap_or(true);
        if expired {
            self.tokens.remove(token);
            return Err(Error::viewport("viewport token expired"));
        }
        self.tokens.remove(token);
        Ok(())
    }

    /// Drops tokens older than [`TOKEN_TTL`] regardless of whether they
    /// were ever redeemed, so abandoned page loads don't leak entries.
    pub fn sweep_expired_tokens(&mut self) {
        self.tokens.retain(|_, issued| {
            issued
                .issued_at
                .elapsed()
                .map(|age| age <= TOKEN_TTL)
                .unwrap_or(false)
        });
    }

    pub fn try_accept_connection(&mut self) -> Result<()> {
        if self.active_connections >= MAX_CONNECTIONS {
            return Err(Error::viewport("viewport connection cap reached"));
        }
        self.active_connections += 1;
        Ok(())
    }

    pub fn release_connection(&mut self) {
        self.active_connections = self.active_connections.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_header_round_trips_through_wire_encoding() {
        let header = FrameHeader {
            frame_num: 42,
            width: 1280,
            height: 720,
            quality: 80,
        };
        let encoded = header.encode();
        let decoded = FrameHeader::decode(&encoded).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn encode_decode_frame_preserves_jpeg_payload() {
        let header = FrameHeader {
            frame_num: 1,
            width: 640,
            height: 480,
            quality: 90,
        };
        let jpeg = vec![0xFF, 0xD8, 0xFF, 0xD9];
        let frame = encode_frame(header, &jpeg);
        let (decoded_header, decoded_jpeg) = decode_frame(&frame).unwrap();
        assert_eq!(decoded_header, header);
        assert_eq!(decoded_jpeg, jpeg.as_slice());
    }

    #[test]
    fn ack_round_trips() {
        let ack = encode_ack(7);
        assert_eq!(decode_ack(&ack).unwrap(), 7);
    }

    #[test]
    fn ack_rejects_wrong_length() {
        assert!(decode_ack(&[1, 2, 3]).is_err());
    }

    #[test]
    fn input_event_rejects_unknown_kind() {
        let raw = json!({ "type": "scroll", "x": 1.0, "y": 2.0 });
        assert!(parse_input_event(&raw).is_err());
    }

    #[test]
    fn input_event_accepts_known_kind() {
        let raw = json!({ "type": "pointerdown", "x": 1.0, "y": 2.0 });
        assert!(parse_input_event(&raw).is_ok());
    }

    #[test]
    fn token_redeemed_once_only() {
        let mut server = ViewportServer::new();
        let token = server.issue_token("agent-1", "client-1");
        assert!(server.redeem_token(&token, "agent-1", "client-1").is_ok());
        assert!(server.redeem_token(&token, "agent-1", "client-1").is_err());
    }

    #[test]
    fn token_rejects_mismatched_client() {
        let mut server = ViewportServer::new();
        let token = server.issue_token("agent-1", "client-1");
        assert!(server.redeem_token(&token, "agent-1", "client-2").is_err());
    }

    #[test]
    fn connection_cap_is_enforced() {
        let mut server = ViewportServer::new();
        for _ in 0..MAX_CONNECTIONS {
            server.try_accept_connection().unwrap();
        }
        assert!(server.try_accept_connection().is_err());
        server.release_connection();
        assert!(server.try_accept_connection().is_ok());
    }
}
