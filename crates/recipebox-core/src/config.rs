//! Application configuration management.
//!
//! Configuration is stored at `~/.config/recipebox/config.json` and holds the
//! API base URL, where session tokens are kept, and the last used username.
//! `API_BASE` in the environment (or a `.env` file) overrides the base URL.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::ReqwestTransport;
use crate::auth::{FileStore, KeyValueStore, KeyringStore, SessionManager};

/// Application name used for config/data directory paths
const APP_NAME: &str = "recipebox";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the API base URL
const BASE_URL_ENV: &str = "API_BASE";

/// Used when neither the environment nor the config file name a server
pub const DEFAULT_BASE_URL: &str = "http://localhost:8585/api";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStoreKind {
    /// JSON file in the user data directory
    #[default]
    File,
    /// OS keychain
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub credential_store: CredentialStoreKind,
    #[serde(default)]
    pub last_username: Option<String>,
    /// `API_BASE` from the environment; never written back to the file
    #[serde(skip)]
    base_url_override: Option<String>,
}

impl Config {
    /// Load the config file (defaults if absent) and apply environment overrides.
    pub fn load() -> Result<Self> {
        // Load .env file if present (silently ignore if not found)
        let _ = dotenvy::dotenv();

        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env(std::env::var(BASE_URL_ENV).ok());
        debug!(base_url = %config.api_base_url(), "Config loaded");
        Ok(config)
    }

    fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            Ok(serde_json::from_str(&contents).context("Failed to parse config file")?)
        } else {
            Ok(Self::default())
        }
    }

    fn apply_env(&mut self, base_url: Option<String>) {
        if let Some(url) = base_url.filter(|u| !u.trim().is_empty()) {
            self.base_url_override = Some(url);
        }
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

    /// Base URL all API paths are resolved against
    pub fn api_base_url(&self) -> String {
        self.base_url_override
            .as_deref()
            .or_else(|| self.base_url.as_deref().filter(|u| !u.trim().is_empty()))
            .unwrap_or(DEFAULT_BASE_URL)
            .to_string()
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Open the configured token store.
    pub fn open_store(&self) -> Result<Arc<dyn KeyValueStore>> {
        Ok(match self.credential_store {
            CredentialStoreKind::File => Arc::new(FileStore::new(self.data_dir()?)),
            CredentialStoreKind::Keyring => Arc::new(KeyringStore::new()),
        })
    }

    /// Build a session manager against the configured server and store,
    /// restoring any persisted session.
    pub fn session_manager(&self) -> Result<SessionManager> {
        let transport = ReqwestTransport::new(self.api_base_url())
            .context("Failed to build HTTP client")?;
        let session = SessionManager::new(Arc::new(transport), self.open_store()?);
        session.initialize();
        Ok(session)
    }
}
