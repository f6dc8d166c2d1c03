// src/config.rs
//! Tracker configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::api_client::DEFAULT_BASE_URL;
use crate::session::SessionOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Escrow service connection
    #[serde(default)]
    pub api: ApiConfig,

    /// Wallet database path
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Refresh interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Stop tracking contracts once the service reports them canceled
    #[serde(default)]
    pub prune_canceled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Service base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key; when absent the key stored in the wallet database is used
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            request_timeout: default_request_timeout(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            database_path: default_database_path(),
            poll_interval: default_poll_interval(),
            prune_canceled: false,
        }
    }
}

// Default values
fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_database_path() -> String {
    "hodl-contracts.db".to_string()
}

fn default_poll_interval() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

impl AppConfig {
    /// Load configuration from file, falling back to defaults when the
    /// file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content)
            .context("Failed to parse config file")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            anyhow::bail!("API base URL must be http(s): {}", self.api.base_url);
        }

        if let Some(key) = &self.api.api_key {
            if key.trim().is_empty() {
                anyhow::bail!("API key cannot be blank when set");
            }
        }

        if self.api.request_timeout == 0 {
            anyhow::bail!("Request timeout must be greater than 0");
        }

        if self.poll_interval == 0 {
            anyhow::bail!("Poll interval must be greater than 0");
        }

        if self.database_path.is_empty() {
            anyhow::bail!("Database path cannot be empty");
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            poll_interval: Duration::from_secs(self.poll_interval),
            prune_canceled: self.prune_canceled,
        }
    }
}
