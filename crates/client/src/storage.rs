//! Durable key-value storage.
//!
//! Provides a unified API for persistent storage:
//! - `FileStore`: one JSON file per key in a directory, by default the
//!   platform-appropriate config directory:
//!   - Linux: `~/.config/adhders/`
//!   - macOS: `~/Library/Application Support/adhders/`
//!   - Windows: `%APPDATA%\adhders\`
//! - `MemoryStore`: process-lifetime storage for tests and storage-less runs.
//!
//! Callers treat the store as best-effort: the typed helpers log failures and
//! report them as `false`/`None` instead of erroring.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{de::DeserializeOwned, Serialize};

pub const KEY_TOKEN: &str = "adhders_token";
pub const KEY_USER: &str = "adhders_user";
pub const KEY_CREDENTIALS: &str = "adhders_credentials";
pub const KEY_PALETTE: &str = "adhders_palette";
pub const KEY_WS_ENABLED: &str = "adhders_ws_enabled";
pub const KEY_COMMUNITY_POSTS: &str = "adhders_community_posts";

/// Raw string storage keyed by name.
pub trait KeyValueStore: Send + Sync {
    fn save_raw(&self, key: &str, value: &str) -> io::Result<()>;
    fn load_raw(&self, key: &str) -> io::Result<Option<String>>;
    fn remove_raw(&self, key: &str) -> io::Result<()>;
}

pub type SharedStore = Arc<dyn KeyValueStore>;

/// Save a value to persistent storage.
///
/// Returns `true` if the operation succeeded.
pub fn save<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> bool {
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("storage: failed to serialize `{}`: {}", key, e);
            return false;
        }
    };
    match store.save_raw(key, &json) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("storage: failed to write `{}`: {}", key, e);
            false
        }
    }
}

/// Load a value from persistent storage.
///
/// Returns `None` if the key doesn't exist or deserialization fails.
pub fn load<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let json = match store.load_raw(key) {
        Ok(json) => json?,
        Err(e) => {
            tracing::warn!("storage: failed to read `{}`: {}", key, e);
            return None;
        }
    };
    match serde_json::from_str(&json) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("storage: discarding unreadable `{}`: {}", key, e);
            None
        }
    }
}

/// Remove a value from persistent storage.
pub fn remove(store: &dyn KeyValueStore, key: &str) -> bool {
    match store.remove_raw(key) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("storage: failed to remove `{}`: {}", key, e);
            false
        }
    }
}

// =========================================
// File-backed implementation
// =========================================

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted in `<config dir>/adhders`, if the platform has one.
    pub fn in_config_dir() -> Option<Self> {
        dirs::config_dir().map(|dir| Self::new(dir.join("adhders")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, key: &str) -> PathBuf {
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{}.json", safe_key))
    }
}

impl KeyValueStore for FileStore {
    fn save_raw(&self, key: &str, value: &str) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.file_path(key), value)
    }

    fn load_raw(&self, key: &str) -> io::Result<Option<String>> {
        match std::fs::read_to_string(self.file_path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn remove_raw(&self, key: &str) -> io::Result<()> {
        match std::fs::remove_file(self.file_path(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

// =========================================
// In-memory implementation
// =========================================

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().map(|e| e.contains_key(key)).unwrap_or(false)
    }
}

impl KeyValueStore for MemoryStore {
    fn save_raw(&self, key: &str, value: &str) -> io::Result<()> {
        self.entries
            .write()
            .map_err(|_| io::Error::other("memory store poisoned"))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn load_raw(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self
            .entries
            .read()
            .map_err(|_| io::Error::other("memory store poisoned"))?
            .get(key)
            .cloned())
    }

    fn remove_raw(&self, key: &str) -> io::Result<()> {
        self.entries
            .write()
            .map_err(|_| io::Error::other("memory store poisoned"))?
            .remove(key);
        Ok(())
    }
}
