//! Live-update channel manager: one socket per token, heartbeat,
//! exponential-backoff reconnect and a polling fallback.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use adhders_shared::{
    is_terminal_close, ping_frame, polling_update, sanitize_token, ApiError, InboundFrame,
    CLOSE_ABNORMAL, CLOSE_AUTH_REJECTED, POLL_UPDATES_PATH, WS_PATH,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::connection::{ChannelLink, Connector, LinkEvent};
use crate::api_client::ApiClient;
use crate::auth_session::SessionEvent;
use crate::storage::{self, SharedStore, KEY_WS_ENABLED};
use crate::token_store::TokenStore;

/// Reconnects allowed after an unexpected close before falling back to polling.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

const INITIAL_DELAY_MS: u64 = 1000;
const MAX_DELAY_MS: u64 = 30_000;

/// Delay before reconnect attempt `attempt` (1-based): `min(1000 × 2^attempt, 30000)` ms.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(INITIAL_DELAY_MS.saturating_mul(factor).min(MAX_DELAY_MS))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelMode {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Polling,
}

/// Snapshot of the channel state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStatus {
    pub mode: ChannelMode,
    pub reconnect_attempt: u32,
    pub heartbeat_active: bool,
    pub polling_active: bool,
}

/// A server event republished to subscribers, payload untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveEvent {
    pub payload: Value,
}

impl LiveEvent {
    pub fn event_type(&self) -> Option<&str> {
        adhders_shared::frame_type(&self.payload)
    }
}

/// Source of incremental updates for polling mode.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn poll_updates(&self, token: &str) -> Result<Value, ApiError>;
}

#[derive(Debug, Default, Deserialize)]
struct PollResponse {
    #[serde(default)]
    updates: Value,
}

#[async_trait]
impl UpdateSource for ApiClient {
    async fn poll_updates(&self, token: &str) -> Result<Value, ApiError> {
        let resp: PollResponse = self.get_json_with_token(POLL_UPDATES_PATH, token).await?;
        Ok(resp.updates)
    }
}

/// How a connected session ended.
enum Outcome {
    Closed { code: u16 },
    Failed(String),
}

struct Inner {
    status: ChannelStatus,
    enabled: bool,
    /// Bumped on every teardown; tasks from older runs must not touch state.
    generation: u64,
    task: Option<JoinHandle<()>>,
}

/// Owns at most one live connection (or polling loop) at a time.
#[derive(Clone)]
pub struct LiveChannel {
    inner: Arc<Mutex<Inner>>,
    tokens: TokenStore,
    storage: SharedStore,
    ws_url: String,
    connector: Arc<dyn Connector>,
    updates: Arc<dyn UpdateSource>,
    events: broadcast::Sender<LiveEvent>,
}

impl LiveChannel {
    /// The enabled flag is restored from storage (default: enabled).
    pub fn new(
        tokens: TokenStore,
        storage: SharedStore,
        connector: Arc<dyn Connector>,
        updates: Arc<dyn UpdateSource>,
    ) -> Self {
        let enabled = storage::load::<bool>(storage.as_ref(), KEY_WS_ENABLED).unwrap_or(true);
        let ws_url = tokens.api().ws_url(WS_PATH);
        let (events, _) = broadcast::channel(256);

        Self {
            inner: Arc::new(Mutex::new(Inner {
                status: ChannelStatus::default(),
                enabled,
                generation: 0,
                task: None,
            })),
            tokens,
            storage,
            ws_url,
            connector,
            updates,
            events,
        }
    }

    /// Override the enabled flag for this process without persisting it.
    pub fn with_enabled(self, enabled: bool) -> Self {
        if let Ok(mut inner) = self.inner.lock() {
            inner.enabled = enabled;
        }
        self
    }

    /// Receive every republished server event and polling update.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> ChannelStatus {
        self.inner
            .lock()
            .map(|inner| inner.status.clone())
            .unwrap_or_default()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().map(|inner| inner.enabled).unwrap_or(false)
    }

    /// Tear down whatever is running and, if enabled and a token exists,
    /// begin a fresh connection. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            tracing::error!("live channel state poisoned");
            return;
        };
        teardown(&mut inner);

        if !inner.enabled {
            tracing::info!("live channel: disabled, staying in local mode");
            return;
        }
        if self.tokens.resolve().is_none() {
            tracing::info!("live channel: no token available, staying in local mode");
            return;
        }

        let generation = inner.generation;
        inner.status.mode = ChannelMode::Connecting;
        inner.task = Some(tokio::spawn(self.clone().drive(generation)));
    }

    /// Restart after a token change.
    pub fn restart(&self) {
        self.start();
    }

    /// Close the connection and cancel heartbeat, reconnect and polling timers.
    pub fn stop(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            teardown(&mut inner);
            tracing::info!("live channel: stopped");
        }
    }

    /// Enable or disable live updates, persisting the choice.
    pub fn set_enabled(&self, enabled: bool) {
        storage::save(self.storage.as_ref(), KEY_WS_ENABLED, &enabled);
        if let Ok(mut inner) = self.inner.lock() {
            inner.enabled = enabled;
        }
        if enabled {
            self.start();
        } else {
            self.stop();
        }
    }

    /// Restart on sign-in and stop on sign-out until the session sender goes away.
    pub fn follow_session(&self, mut session_events: broadcast::Receiver<SessionEvent>) -> JoinHandle<()> {
        let channel = self.clone();
        tokio::spawn(async move {
            loop {
                match session_events.recv().await {
                    Ok(SessionEvent::SignedIn) => channel.restart(),
                    Ok(SessionEvent::SignedOut) => channel.stop(),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("live channel: missed {} session events, resyncing", skipped);
                        if channel.tokens.get().is_some() {
                            channel.restart();
                        } else {
                            channel.stop();
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.generation == generation)
            .unwrap_or(false)
    }

    /// Apply `f` to the status if this run is still the current one.
    fn update(&self, generation: u64, f: impl FnOnce(&mut ChannelStatus)) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        if inner.generation != generation {
            return false;
        }
        f(&mut inner.status);
        true
    }

    fn publish(&self, generation: u64, payload: Value) {
        if self.is_current(generation) {
            // No subscribers is fine.
            let _ = self.events.send(LiveEvent { payload });
        }
    }

    async fn drive(self, generation: u64) {
        loop {
            let Some(token) = self.tokens.get() else {
                tracing::info!("live channel: token gone, stopping");
                self.update(generation, |s| *s = ChannelStatus::default());
                return;
            };

            let url = format!(
                "{}?token={}",
                self.ws_url,
                urlencoding::encode(&sanitize_token(&token))
            );
            tracing::debug!("live channel: connecting to {}?token=TOKEN_HIDDEN", self.ws_url);

            if !self.update(generation, |s| s.mode = ChannelMode::Connecting) {
                return;
            }

            let outcome = match self.connector.connect(&url).await {
                Ok(link) => {
                    if !self.update(generation, |s| {
                        s.mode = ChannelMode::Connected;
                        s.reconnect_attempt = 0;
                        s.heartbeat_active = true;
                    }) {
                        return;
                    }
                    tracing::info!("live channel: connected");

                    let outcome = self.run_connected(generation, link).await;
                    self.update(generation, |s| {
                        s.mode = ChannelMode::Disconnected;
                        s.heartbeat_active = false;
                    });
                    outcome
                }
                Err(e) if e.is_auth_rejection() => {
                    tracing::warn!("live channel: {}", e);
                    Outcome::Closed {
                        code: CLOSE_AUTH_REJECTED,
                    }
                }
                Err(e) => {
                    tracing::warn!("live channel: {}", e);
                    self.update(generation, |s| s.mode = ChannelMode::Disconnected);
                    Outcome::Closed { code: CLOSE_ABNORMAL }
                }
            };

            match outcome {
                Outcome::Closed { code } if is_terminal_close(code) => {
                    tracing::info!("live channel: closed with {}, not reconnecting", code);
                    self.update(generation, |s| *s = ChannelStatus::default());
                    return;
                }
                Outcome::Failed(reason) => {
                    tracing::warn!("live channel: transport error ({}), switching to polling", reason);
                    self.run_polling(generation).await;
                    return;
                }
                Outcome::Closed { code } => {
                    let attempt = self.status().reconnect_attempt;
                    if attempt >= MAX_RECONNECT_ATTEMPTS {
                        tracing::info!("live channel: max reconnection attempts reached, switching to polling");
                        self.run_polling(generation).await;
                        return;
                    }

                    let attempt = attempt + 1;
                    let delay = reconnect_delay(attempt);
                    if !self.update(generation, |s| s.reconnect_attempt = attempt) {
                        return;
                    }
                    tracing::info!(
                        "live channel: closed with {}, reconnecting in {}ms ({}/{})",
                        code,
                        delay.as_millis(),
                        attempt,
                        MAX_RECONNECT_ATTEMPTS
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn run_connected(&self, generation: u64, mut link: ChannelLink) -> Outcome {
        let mut heartbeat = interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    tracing::debug!("live channel: heartbeat sent");
                    if !link.send(ping_frame()) {
                        return Outcome::Closed { code: CLOSE_ABNORMAL };
                    }
                }
                event = link.incoming.next() => match event {
                    Some(LinkEvent::Text(text)) => self.handle_frame(generation, &text),
                    Some(LinkEvent::Closed { code, reason }) => {
                        tracing::info!("live channel: closed {} {}", code, reason);
                        return Outcome::Closed { code };
                    }
                    Some(LinkEvent::Failed(reason)) => return Outcome::Failed(reason),
                    None => return Outcome::Closed { code: CLOSE_ABNORMAL },
                },
            }
        }
    }

    fn handle_frame(&self, generation: u64, text: &str) {
        match InboundFrame::parse(text) {
            None => tracing::warn!("live channel: dropping unparseable frame"),
            Some(InboundFrame::Pong) => tracing::debug!("live channel: heartbeat pong received"),
            Some(InboundFrame::ConnectionEstablished(payload)) => {
                tracing::info!("live channel: connection established");
                // Already 0 once the open succeeded.
                self.update(generation, |s| s.reconnect_attempt = 0);
                self.publish(generation, payload);
            }
            Some(InboundFrame::Event(payload)) => {
                tracing::debug!(
                    "live channel: message received: {}",
                    adhders_shared::frame_type(&payload).unwrap_or("<untyped>")
                );
                self.publish(generation, payload);
            }
        }
    }

    async fn run_polling(&self, generation: u64) {
        if !self.update(generation, |s| {
            s.mode = ChannelMode::Polling;
            s.heartbeat_active = false;
            s.polling_active = true;
        }) {
            return;
        }
        tracing::info!("live channel: starting polling fallback");

        let mut ticker = interval_at(Instant::now() + POLL_INTERVAL, POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if !self.is_current(generation) {
                return;
            }
            let Some(token) = self.tokens.get() else {
                tracing::debug!("live channel: polling skipped, no token");
                continue;
            };
            match self.updates.poll_updates(&token).await {
                Ok(updates) => self.publish(generation, polling_update(updates)),
                Err(e) => tracing::debug!("live channel: polling temporarily unavailable: {}", e),
            }
        }
    }
}

fn teardown(inner: &mut Inner) {
    inner.generation = inner.generation.wrapping_add(1);
    if let Some(task) = inner.task.take() {
        // Dropping the aborted future drops the link (closing the socket) and
        // every pending sleep/interval with it.
        task.abort();
    }
    inner.status = ChannelStatus::default();
}
