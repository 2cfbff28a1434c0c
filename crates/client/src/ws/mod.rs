//! Live-update channel to the adhders backend.
//!
//! This module provides:
//! - A [`Connector`] seam that opens sockets (tokio-tungstenite in production)
//! - [`LiveChannel`], which owns the single connection: heartbeat, backoff
//!   reconnects and the polling fallback
//! - A broadcast of [`LiveEvent`]s that the feed and chat managers subscribe to
//!
//! # Architecture
//!
//! ```text
//!             ┌──────────────────────────────┐
//!             │          LiveChannel         │
//!             │ Disconnected → Connecting →  │
//!             │ Connected ⇄ (backoff) → Polling
//!             └──────────────────────────────┘
//!                 │ Connector        │ UpdateSource
//!                 ▼                  ▼
//!         ┌──────────────┐   ┌────────────────────┐
//!         │ /api/ws      │   │ /api/poll-updates  │
//!         └──────────────┘   └────────────────────┘
//!                         │
//!                         ▼ broadcast::Sender<LiveEvent>
//!          ┌──────────────┼──────────────┐
//!          ▼              ▼              ▼
//!   ┌────────────┐ ┌────────────┐ ┌────────────┐
//!   │FeedManager │ │ChatManager │ │ any other  │
//!   └────────────┘ └────────────┘ └────────────┘
//! ```

mod connection;
mod manager;

pub use connection::{ChannelError, ChannelLink, Connector, LinkEvent, LinkPeer, WsConnector};
pub use manager::{
    reconnect_delay, ChannelMode, ChannelStatus, LiveChannel, LiveEvent, UpdateSource,
    HEARTBEAT_INTERVAL, MAX_RECONNECT_ATTEMPTS, POLL_INTERVAL,
};
