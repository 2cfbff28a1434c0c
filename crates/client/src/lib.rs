//! adhders client - connectivity and session layer
//!
//! This crate contains everything between the adhders UI and the backend:
//! bearer-token handling, the authentication flows, the live-update channel
//! with its polling fallback, and the community feed and chat caches.

pub mod api_client;
pub mod app;
pub mod auth_session;
pub mod chat;
pub mod community;
pub mod config;
pub mod identity;
pub mod notice;
pub mod storage;
pub mod stores;
pub mod token_store;
pub mod ws;

pub use api_client::ApiClient;
pub use app::{App, AppError};
pub use auth_session::{AuthError, AuthSession, Registration, Session, SessionEvent};
pub use chat::{ChatManager, UploadFile, VoiceClip};
pub use community::FeedManager;
pub use config::{ClientConfig, ConfigError};
pub use identity::{ExternalIdentity, IdentityProvider};
pub use notice::{Notice, NoticeLevel, Notifier};
pub use token_store::TokenStore;
pub use ws::{ChannelMode, ChannelStatus, LiveChannel, LiveEvent};
