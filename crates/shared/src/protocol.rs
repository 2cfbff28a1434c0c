//! Live-update channel protocol and backend endpoint paths.

use serde_json::{json, Value};

/// WebSocket endpoint; the bearer token travels in the `token` query parameter.
pub const WS_PATH: &str = "/api/ws";
/// Polling fallback endpoint returning `{ "updates": { ... } }`.
pub const POLL_UPDATES_PATH: &str = "/api/poll-updates";

/// Close code sent on an orderly shutdown.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code reported when the socket dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Close code the backend uses to reject the token.
pub const CLOSE_AUTH_REJECTED: u16 = 4401;

/// Frame type discriminators with special meaning to the client.
pub const FRAME_PING: &str = "ping";
pub const FRAME_PONG: &str = "pong";
pub const FRAME_CONNECTION_ESTABLISHED: &str = "connectionEstablished";
/// Synthetic type under which polling results are republished.
pub const FRAME_POLLING_UPDATE: &str = "pollingUpdate";

/// True when a close code means the server does not want us back.
pub fn is_terminal_close(code: u16) -> bool {
    code == CLOSE_NORMAL || code == CLOSE_AUTH_REJECTED
}

/// Classification of an inbound JSON frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Heartbeat acknowledgement.
    Pong,
    /// Server confirmed the subscription; carries the original payload.
    ConnectionEstablished(Value),
    /// Any application event, forwarded opaquely.
    Event(Value),
}

impl InboundFrame {
    /// Parse a text frame. Returns `None` for frames that are not JSON.
    pub fn parse(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        Some(Self::classify(value))
    }

    pub fn classify(value: Value) -> Self {
        match frame_type(&value) {
            Some(FRAME_PONG) => InboundFrame::Pong,
            Some(FRAME_CONNECTION_ESTABLISHED) => InboundFrame::ConnectionEstablished(value),
            _ => InboundFrame::Event(value),
        }
    }
}

/// The `type` discriminator of a frame, if present.
pub fn frame_type(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

/// Heartbeat payload sent while connected.
pub fn ping_frame() -> String {
    json!({ "type": FRAME_PING }).to_string()
}

/// Wrap polling results so consumers see them like any other frame.
pub fn polling_update(updates: Value) -> Value {
    json!({ "type": FRAME_POLLING_UPDATE, "data": updates })
}

/// Normalize a stored credential for use in the socket query string.
///
/// Tokens have been persisted JSON-quoted and with a `Bearer ` prefix in the
/// past; both are stripped.
pub fn sanitize_token(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches(|c: char| c == '"' || c == '\'').trim();
    trimmed
        .strip_prefix("Bearer ")
        .map(str::trim)
        .unwrap_or(trimmed)
        .to_string()
}
