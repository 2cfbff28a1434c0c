//! Socket connection seam and the tokio-tungstenite implementation.
//!
//! The channel manager only ever sees a [`ChannelLink`]: an outgoing queue of
//! text frames and an incoming stream of [`LinkEvent`]s. Dropping the link
//! closes the underlying socket.

use adhders_shared::CLOSE_ABNORMAL;
use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
};

/// Close code used when the peer closed without sending a status.
const CLOSE_NO_STATUS: u16 = 1005;

/// Something that happened on an open socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Text(String),
    Closed { code: u16, reason: String },
    /// Transport-level failure while the socket was open.
    Failed(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("connection failed: {0}")]
    Connect(String),
    /// The handshake was answered with an HTTP error status.
    #[error("handshake rejected with HTTP {0}")]
    Rejected(u16),
}

impl ChannelError {
    /// Handshake rejections that mean the token is not accepted.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, ChannelError::Rejected(401 | 403))
    }
}

/// The manager's end of an open connection.
pub struct ChannelLink {
    pub outgoing: UnboundedSender<String>,
    pub incoming: UnboundedReceiver<LinkEvent>,
}

/// The transport's end of an open connection.
pub struct LinkPeer {
    /// Frames the manager wants sent.
    pub sent: UnboundedReceiver<String>,
    /// Events to deliver to the manager.
    pub events: UnboundedSender<LinkEvent>,
}

impl ChannelLink {
    /// Create a connected link/peer pair.
    pub fn pair() -> (ChannelLink, LinkPeer) {
        let (outgoing, sent) = unbounded();
        let (events, incoming) = unbounded();
        (ChannelLink { outgoing, incoming }, LinkPeer { sent, events })
    }

    /// Queue a text frame. Returns `false` if the transport has gone away.
    pub fn send(&self, text: String) -> bool {
        self.outgoing.unbounded_send(text).is_ok()
    }
}

/// Opens live-update connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<ChannelLink, ChannelError>;
}

/// WebSocket connector using tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<ChannelLink, ChannelError> {
        let (ws_stream, _response) = connect_async(url).await.map_err(|e| match e {
            tungstenite::Error::Http(response) => ChannelError::Rejected(response.status().as_u16()),
            other => ChannelError::Connect(other.to_string()),
        })?;

        let (link, LinkPeer { mut sent, events }) = ChannelLink::pair();
        let (mut write, mut read) = ws_stream.split();

        // Spawn read task
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                let event = match msg_result {
                    Ok(Message::Text(text)) => LinkEvent::Text(text.to_string()),
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((CLOSE_NO_STATUS, String::new()));
                        let _ = events.unbounded_send(LinkEvent::Closed { code, reason });
                        return;
                    }
                    // Pong is handled automatically by tungstenite; binary is unused
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = events.unbounded_send(LinkEvent::Failed(e.to_string()));
                        return;
                    }
                };
                if events.unbounded_send(event).is_err() {
                    // Manager dropped the link.
                    return;
                }
            }
            let _ = events.unbounded_send(LinkEvent::Closed {
                code: CLOSE_ABNORMAL,
                reason: String::new(),
            });
        });

        // Spawn write task
        tokio::spawn(async move {
            while let Some(text) = sent.next().await {
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    tracing::debug!("live channel send failed: {}", e);
                    return;
                }
            }
            // Link dropped: close politely.
            let _ = write
                .send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client closing".into(),
                })))
                .await;
            let _ = write.close().await;
        });

        Ok(link)
    }
}
