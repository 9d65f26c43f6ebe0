//! Engine configuration, loadable from TOML.
//!
//! ```toml
//! api_base_url = "https://example.com/api"
//! ws_base_url = "wss://example.com/ws"
//! share_base_url = "https://example.com/codeshare"
//! default_language = "javascript"
//! debounce_ms = 500
//!
//! [reconnect]
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//! multiplier = 2.0
//! jitter = 0.2
//! max_attempts = 10
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::backoff::ReconnectPolicy;
use crate::error::ConfigError;

/// Everything the engine and its collaborators need to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base of the document store routes (`{api_base_url}/sessions`).
    pub api_base_url: String,
    /// Base of the live channel endpoint (`{ws_base_url}/{id}`).
    pub ws_base_url: String,
    /// Base of human-facing share links (`{share_base_url}/{id}`).
    pub share_base_url: String,
    /// Language tag used until the user or a peer picks one.
    pub default_language: String,
    pub debounce_ms: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub reconnect: ReconnectPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".into(),
            ws_base_url: "ws://localhost:5000/ws".into(),
            share_base_url: "http://localhost:3000/codeshare".into(),
            default_language: "javascript".into(),
            debounce_ms: 500,
            connect_timeout_ms: 5_000,
            request_timeout_ms: 10_000,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Parse and validate a TOML document. Absent keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms == 0 {
            return Err(ConfigError::Invalid("debounce_ms must be > 0".into()));
        }
        if self.reconnect.base_delay_ms == 0 {
            return Err(ConfigError::Invalid("reconnect.base_delay_ms must be > 0".into()));
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "reconnect.max_delay_ms ({}) is below reconnect.base_delay_ms ({})",
                self.reconnect.max_delay_ms, self.reconnect.base_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return Err(ConfigError::Invalid("reconnect.jitter must be within [0, 1]".into()));
        }
        for (name, url) in [
            ("api_base_url", &self.api_base_url),
            ("ws_base_url", &self.ws_base_url),
            ("share_base_url", &self.share_base_url),
        ] {
            if url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{name} must not be empty")));
            }
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Fluent overrides on top of [`SyncConfig::default`].
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    /// Start from an existing config instead of the defaults.
    pub fn from_config(config: SyncConfig) -> Self {
        Self { config }
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn ws_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.ws_base_url = url.into();
        self
    }

    pub fn share_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.share_base_url = url.into();
        self
    }

    pub fn default_language(mut self, language: impl Into<String>) -> Self {
        self.config.default_language = language.into();
        self
    }

    pub fn debounce(mut self, delay: Duration) -> Self {
        self.config.debounce_ms = delay.as_millis() as u64;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// Validate and return the config.
    pub fn build(self) -> Result<SyncConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
