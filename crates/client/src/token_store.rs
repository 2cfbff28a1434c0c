//! Bearer-token store: the single source of truth for the current credential.

use std::sync::{Arc, RwLock};

use crate::api_client::ApiClient;
use crate::storage::{self, SharedStore, KEY_TOKEN};

/// Holds the current bearer token and mirrors every change into durable
/// storage and the HTTP client's default `Authorization` header.
#[derive(Clone)]
pub struct TokenStore {
    current: Arc<RwLock<Option<String>>>,
    storage: SharedStore,
    api: ApiClient,
}

impl TokenStore {
    pub fn new(api: ApiClient, storage: SharedStore) -> Self {
        Self {
            current: Arc::new(RwLock::new(None)),
            storage,
            api,
        }
    }

    /// The in-memory token.
    pub fn get(&self) -> Option<String> {
        self.current.read().ok().and_then(|t| t.clone())
    }

    /// Replace the token everywhere. `None` clears the header and the durable
    /// entry. Storage failures are logged; the in-memory token still applies.
    pub fn set(&self, token: Option<String>) {
        let token = token.filter(|t| !t.trim().is_empty());

        // Holding the write lock across all three updates keeps concurrent
        // setters from interleaving header and memory values.
        let Ok(mut current) = self.current.write() else {
            tracing::error!("token store lock poisoned; token not updated");
            return;
        };
        self.api.set_bearer(token.as_deref());

        match token.as_ref() {
            Some(t) => {
                if !storage::save(self.storage.as_ref(), KEY_TOKEN, t) {
                    tracing::warn!("token persisted in memory only");
                }
                tracing::debug!("token set");
            }
            None => {
                storage::remove(self.storage.as_ref(), KEY_TOKEN);
                tracing::debug!("token cleared");
            }
        }

        *current = token;
    }

    /// The in-memory token, or the durable one if memory is empty. A token
    /// found in storage is applied to the HTTP client before returning.
    pub fn resolve(&self) -> Option<String> {
        if let Some(token) = self.get() {
            return Some(token);
        }

        let stored: String = storage::load(self.storage.as_ref(), KEY_TOKEN)?;
        if stored.trim().is_empty() {
            return None;
        }

        if let Ok(mut current) = self.current.write() {
            // Another caller may have set a token while we were reading storage.
            if let Some(existing) = current.as_ref() {
                return Some(existing.clone());
            }
            self.api.set_bearer(Some(&stored));
            *current = Some(stored.clone());
        }
        Some(stored)
    }

    /// The durable token without touching in-memory state.
    pub fn stored(&self) -> Option<String> {
        storage::load(self.storage.as_ref(), KEY_TOKEN)
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("has_token", &self.get().is_some())
            .finish()
    }
}
