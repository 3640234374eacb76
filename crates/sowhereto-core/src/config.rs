//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the API
//! base address, the request timeout, where durable credentials are kept and
//! the last email used to sign in.
//!
//! Configuration is stored at `~/.config/sowhereto/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "sowhereto";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default API base address (the backend mounts its routes under `/api`)
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5173/api";

/// HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Capacity of the event broadcast channel.
const DEFAULT_EVENT_BUFFER: usize = 64;

/// Environment variable overriding the API base address
pub const ENV_API_URL: &str = "SOWHERETO_API_URL";

/// Where the durable storage tier keeps its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DurableBackend {
    /// JSON file in the data directory
    #[default]
    File,
    /// OS keychain
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub durable_backend: DurableBackend,
    /// Retries for 429 responses before giving up. 0 surfaces the first one.
    pub max_rate_limit_retries: u32,
    pub event_buffer: usize,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            durable_backend: DurableBackend::File,
            max_rate_limit_retries: 0,
            event_buffer: DEFAULT_EVENT_BUFFER,
            last_email: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&contents).context("Failed to parse config file")
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Record the last sign-in email in the saved file. Overrides from the
    /// environment or command line are not written back.
    pub fn save_last_email(email: &str) -> Result<()> {
        let path = Self::config_path()?;
        let mut saved = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        saved.last_email = Some(email.to_string());
        saved.save()
    }

    /// Environment variables win over the file
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            if !url.trim().is_empty() {
                self.api_base_url = url;
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the durable session file and logs
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }
}
