//! Configuration loading and management.
//!
//! Precedence, lowest first: built-in defaults, `~/.config/rota/config.toml`,
//! the file passed with `--config`, then `ROTA_*` environment variables.
//! Nested keys are separated by `__` in variable names, so
//! `ROTA_ENGINE__HUB__CAPACITY=150` sets `engine.hub.capacity`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use rota_core::EngineConfig;
use serde::{Deserialize, Serialize};

const REDACTED: &str = "[REDACTED]";

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    pub queue: QueueConfig,
    pub meetings: MeetingsConfig,
    pub notifications: NotificationsConfig,
    /// Timeout for each remote API call.
    pub request_timeout_secs: u64,
    pub engine: EngineConfig,
}

/// Where deferred start/end tasks are registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// The `scheduled_tasks` table, drained by `rota tasks run-due`.
    #[default]
    Local,
    /// A hosted queue that calls back over HTTP.
    Http,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    pub base_url: Option<String>,
    /// Base URL the hosted queue calls back into. Overrides
    /// `engine.lifecycle.callback_base_url` when set.
    pub callback_base_url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingsBackend {
    /// No provider: meetings get local placeholder links.
    #[default]
    Offline,
    Http,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeetingsConfig {
    pub backend: MeetingsBackend,
    pub base_url: Option<String>,
    /// OAuth client-credentials endpoint. Takes precedence over `token`.
    pub token_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Long-lived bearer token, used when no client credentials are set.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Receives outbox events. Events are only logged when unset.
    pub webhook_url: Option<String>,
}

fn redact(secret: Option<&String>) -> Option<&'static str> {
    secret.map(|_| REDACTED)
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("queue", &self.queue)
            .field("meetings", &self.meetings)
            .field("notifications", &self.notifications)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("engine", &self.engine)
            .finish()
    }
}

impl fmt::Debug for QueueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConfig")
            .field("backend", &self.backend)
            .field("base_url", &self.base_url)
            .field("callback_base_url", &self.callback_base_url)
            .field("token", &redact(self.token.as_ref()))
            .finish()
    }
}

impl fmt::Debug for MeetingsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeetingsConfig")
            .field("backend", &self.backend)
            .field("base_url", &self.base_url)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(self.client_secret.as_ref()))
            .field("token", &redact(self.token.as_ref()))
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("rota.db"),
            queue: QueueConfig::default(),
            meetings: MeetingsConfig::default(),
            notifications: NotificationsConfig::default(),
            request_timeout_secs: rota_remote::DEFAULT_TIMEOUT.as_secs(),
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_file) = default_config_file() {
            figment = figment.merge(Toml::file(config_file));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("ROTA_").split("__"));

        let mut config: Self = figment.extract()?;
        if let Some(url) = &config.queue.callback_base_url {
            config.engine.lifecycle.callback_base_url.clone_from(url);
        }
        Ok(config)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// The per-user config file that `load_from` always consults.
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("rota").join("config.toml"))
}

/// Returns the platform-specific data directory for rota.
///
/// On Linux: `~/.local/share/rota`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("rota"))
}
