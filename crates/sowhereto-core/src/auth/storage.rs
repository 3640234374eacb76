//! Two-tier credential persistence.
//!
//! The durable tier survives restarts (file or OS keychain), the ephemeral
//! tier lives as long as the process. Both hold the same keys; reads look in
//! the durable tier first, then the ephemeral one.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::warn;

pub const TOKEN_KEY: &str = "token";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const USER_KEY: &str = "user";
pub const REMEMBER_ME_KEY: &str = "rememberMe";
pub const REDIRECT_URL_KEY: &str = "redirectUrl";

/// Keys that make up a credential record in either tier
const CREDENTIAL_KEYS: [&str; 3] = [TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY];

/// Minimal string key/value store
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Process-scoped store, used for the ephemeral tier.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("Memory store lock poisoned"))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// JSON map on disk, written through on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`
    pub fn open(path: PathBuf) -> Result<Self> {
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read session file: {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse session file")?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("File store lock poisoned"))
    }

    fn save(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write session file: {}", self.path.display()))?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.lock()?;
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.lock()?;
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}

/// Which tier a credential record lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persistence {
    Durable,
    Ephemeral,
}

impl Persistence {
    pub fn from_remember(remember: bool) -> Self {
        if remember {
            Persistence::Durable
        } else {
            Persistence::Ephemeral
        }
    }
}

/// The durable and ephemeral tiers, addressed by the session layout keys.
///
/// Storage failures are logged and treated as absent values on read; writes
/// report them so callers can decide.
#[derive(Clone)]
pub struct SessionStorage {
    durable: Arc<dyn KeyValueStore>,
    ephemeral: Arc<dyn KeyValueStore>,
}

impl SessionStorage {
    pub fn new(durable: Arc<dyn KeyValueStore>, ephemeral: Arc<dyn KeyValueStore>) -> Self {
        Self { durable, ephemeral }
    }

    /// Both tiers in memory; handy for tests and throwaway sessions
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    fn tier(&self, persistence: Persistence) -> &dyn KeyValueStore {
        match persistence {
            Persistence::Durable => self.durable.as_ref(),
            Persistence::Ephemeral => self.ephemeral.as_ref(),
        }
    }

    fn read(store: &dyn KeyValueStore, key: &str) -> Option<String> {
        match store.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to read session storage");
                None
            }
        }
    }

    /// Read from one tier only
    pub fn get_in(&self, persistence: Persistence, key: &str) -> Option<String> {
        Self::read(self.tier(persistence), key)
    }

    /// Durable, else ephemeral
    pub fn get(&self, key: &str) -> Option<String> {
        self.get_in(Persistence::Durable, key)
            .or_else(|| self.get_in(Persistence::Ephemeral, key))
    }

    /// Tier that currently holds `key`, durable first
    pub fn locate(&self, key: &str) -> Option<Persistence> {
        if self.get_in(Persistence::Durable, key).is_some() {
            Some(Persistence::Durable)
        } else if self.get_in(Persistence::Ephemeral, key).is_some() {
            Some(Persistence::Ephemeral)
        } else {
            None
        }
    }

    pub fn set(&self, persistence: Persistence, key: &str, value: &str) -> Result<()> {
        self.tier(persistence).set(key, value)
    }

    pub fn remove(&self, persistence: Persistence, key: &str) -> Result<()> {
        self.tier(persistence).remove(key)
    }

    /// Remove the credential keys from one tier. Failures are logged.
    pub fn clear_credentials_in(&self, persistence: Persistence) {
        for key in CREDENTIAL_KEYS {
            if let Err(e) = self.remove(persistence, key) {
                warn!(key = key, ?persistence, error = %e, "Failed to clear session storage");
            }
        }
    }

    /// Remove the credential keys from both tiers. `rememberMe` stays.
    pub fn clear_credentials(&self) {
        self.clear_credentials_in(Persistence::Durable);
        self.clear_credentials_in(Persistence::Ephemeral);
    }

    pub fn remember_me(&self) -> bool {
        self.get_in(Persistence::Durable, REMEMBER_ME_KEY).as_deref() == Some("true")
    }

    pub fn set_remember_me(&self, remember: bool) -> Result<()> {
        if remember {
            self.set(Persistence::Durable, REMEMBER_ME_KEY, "true")
        } else {
            self.remove(Persistence::Durable, REMEMBER_ME_KEY)
        }
    }
}
