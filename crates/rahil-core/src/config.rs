//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the
//! server base URL, request timeout, credential backend, and the
//! installation id used for device registration.
//!
//! Configuration is stored at `~/.config/rahil/config.json`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{client::DEFAULT_BASE_URL, client::REQUEST_TIMEOUT_SECS, ApiClient};
use crate::auth::{CredentialStore, FileCredentialStore, KeyringCredentialStore};
use crate::models::DeviceIdentity;

/// Application name used for config/data directory paths
const APP_NAME: &str = "rahil";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Overrides `base_url` when set
pub const ENV_BASE_URL: &str = "RAHIL_BASE_URL";

/// Where tokens and the cached profile are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    /// `session.json` in the data directory
    #[default]
    File,
    /// OS keychain
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub credential_backend: CredentialBackend,
    /// Stable per-installation id, generated on first run
    pub installation_id: Option<String>,
    /// Platform reported at device registration; defaults to the OS name
    pub platform: Option<String>,
    pub last_email: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config file {}", path.display()))
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for the credential file and logs
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Apply environment overrides. Not persisted by `save`.
    pub fn apply_env(&mut self) {
        self.apply_overrides(std::env::var(ENV_BASE_URL).ok());
    }

    fn apply_overrides(&mut self, base_url: Option<String>) {
        if let Some(url) = base_url.filter(|u| !u.trim().is_empty()) {
            debug!(base_url = %url, "Base URL overridden from environment");
            self.base_url = Some(url);
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .filter(|&secs| secs > 0)
                .unwrap_or(REQUEST_TIMEOUT_SECS),
        )
    }

    /// Generate the installation id if missing. Returns true when the
    /// config changed and should be saved.
    pub fn ensure_installation_id(&mut self) -> bool {
        if self.installation_id.as_deref().is_some_and(|id| !id.is_empty()) {
            return false;
        }
        let id = uuid::Uuid::new_v4().to_string();
        debug!(installation_id = %id, "Generated installation id");
        self.installation_id = Some(id);
        true
    }

    /// Identity sent to `/api/devices/register`
    pub fn device_identity(&mut self) -> DeviceIdentity {
        self.ensure_installation_id();
        let platform = self
            .platform
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| std::env::consts::OS.to_string());
        DeviceIdentity::new(self.installation_id.clone().unwrap_or_default(), platform)
    }

    pub fn credential_store(&self) -> Result<Arc<dyn CredentialStore>> {
        Ok(match self.credential_backend {
            CredentialBackend::File => Arc::new(FileCredentialStore::new(Self::data_dir()?)),
            CredentialBackend::Keyring => Arc::new(KeyringCredentialStore::new()?),
        })
    }

    pub fn api_client(&self) -> Result<ApiClient> {
        ApiClient::with_timeout(self.base_url(), self.request_timeout())
            .context("Failed to build HTTP client")
    }
}
