//! Wiring of the whole client stack.

use std::sync::Arc;

use adhders_shared::ApiError;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::api_client::ApiClient;
use crate::auth_session::{AuthSession, Session};
use crate::chat::ChatManager;
use crate::community::FeedManager;
use crate::config::{ClientConfig, ConfigError};
use crate::identity::IdentityProvider;
use crate::notice::Notifier;
use crate::storage::{FileStore, MemoryStore, SharedStore};
use crate::token_store::TokenStore;
use crate::ws::{Connector, LiveChannel, WsConnector};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build HTTP client: {0}")]
    Api(#[from] ApiError),
}

/// The assembled client: one token store, session, live channel and the
/// feed/chat managers fed by it.
pub struct App {
    pub config: ClientConfig,
    pub storage: SharedStore,
    pub api: ApiClient,
    pub tokens: TokenStore,
    pub session: AuthSession,
    pub live: LiveChannel,
    pub feed: FeedManager,
    pub chat: ChatManager,
    pub notifier: Notifier,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Build the stack with the WebSocket connector.
    pub fn new(config: ClientConfig) -> Result<Self, AppError> {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self, AppError> {
        let storage: SharedStore = match config.storage_dir.as_ref() {
            Some(dir) => {
                tracing::info!("storage directory: {}", dir.display());
                Arc::new(FileStore::new(dir.clone()))
            }
            None => {
                tracing::info!("storage: in-memory only");
                Arc::new(MemoryStore::new())
            }
        };

        let api = ApiClient::from_config(&config)?;
        let tokens = TokenStore::new(api.clone(), storage.clone());
        let notifier = Notifier::new();
        let session = AuthSession::new(tokens.clone(), storage.clone());

        let mut live = LiveChannel::new(tokens.clone(), storage.clone(), connector, Arc::new(api.clone()));
        if !config.live_updates {
            live = live.with_enabled(false);
        }

        let feed = FeedManager::new(tokens.clone(), storage.clone(), notifier.clone());
        let chat = ChatManager::new(tokens.clone(), notifier.clone());

        Ok(Self {
            config,
            storage,
            api,
            tokens,
            session,
            live,
            feed,
            chat,
            notifier,
            tasks: Vec::new(),
        })
    }

    pub fn with_identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.session = self.session.clone().with_identity_provider(provider);
        self
    }

    /// Restore cached state and bring the live channel up. The channel then
    /// follows sign-in/sign-out for the rest of the process.
    pub async fn start(&mut self) -> Session {
        if self.tasks.is_empty() {
            self.tasks.push(self.live.follow_session(self.session.subscribe()));
            self.tasks.push(self.spawn_live_consumer());
        }

        self.feed.hydrate();
        let session = self.session.hydrate().await;
        tracing::info!(
            "session restored: authenticated={} token={}",
            session.authenticated,
            session.token.is_some()
        );
        session
    }

    /// Stop the live channel and every background task.
    pub fn shutdown(&mut self) {
        self.live.stop();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    fn spawn_live_consumer(&self) -> JoinHandle<()> {
        let mut events = self.live.subscribe();
        let feed = self.feed.clone();
        let chat = self.chat.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let added = chat.apply_live_event(&event);
                        if added > 0 {
                            tracing::debug!("live: {} new chat messages", added);
                        }
                        feed.apply_live_event(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("live: consumer lagged, {} events skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}
