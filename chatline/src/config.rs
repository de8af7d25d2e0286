//! Configuration file support for chatline.
//!
//! Reads configuration from `~/.config/chatline/config.toml`. Every field is
//! optional; command-line flags override whatever the file sets.
//!
//! ## Example config
//!
//! ```toml
//! server_url = "http://127.0.0.1:8000"
//! reenable_delay_ms = 1000
//! status_poll_secs = 30
//!
//! [messages]
//! welcome = "Hi! Ask me anything about monuments."
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_SENTINEL: &str = "__SESSION_TERMINATED__";

const MAX_REENABLE_DELAY_MS: u64 = 10 * 60 * 1000;
const MAX_STATUS_POLL_SECS: u64 = 24 * 60 * 60;
const MAX_REQUEST_TIMEOUT_SECS: u64 = 10 * 60;

/// Bot-side texts the client writes into the transcript itself.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MessageTexts {
    /// Shown once when a session view opens. Empty disables it.
    pub welcome: String,
    /// Appended when the stream delivers the termination sentinel.
    pub terminated: String,
    /// Appended when a status check finds the session inactive.
    pub session_ended: String,
    /// Appended when a query is submitted to an ended session.
    pub submit_after_end: String,
    /// Prompt shown while input is disabled.
    pub placeholder: String,
}

impl Default for MessageTexts {
    fn default() -> Self {
        Self {
            welcome: "👋 Welcome! I'm your Historical Monuments assistant. To get started, \
                      please provide your email address for verification."
                .to_string(),
            terminated: "✅ Email verification successful! Your session has ended. \
                         Click 'New Chat' to continue asking about monuments."
                .to_string(),
            session_ended: "Your session has ended. Please start a new chat.".to_string(),
            submit_after_end: "Session has ended. Please start a new chat.".to_string(),
            placeholder: "Session ended - type /new to continue".to_string(),
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the chat server.
    pub server_url: String,
    /// Delay before the send gate reopens after a query is submitted.
    pub reenable_delay_ms: u64,
    /// Interval of the background session-status poll.
    pub status_poll_secs: u64,
    /// Timeout for status, delete and new-session requests.
    pub request_timeout_secs: u64,
    /// Payload that marks the end of a session on the chat stream.
    pub termination_sentinel: String,
    /// Texts written by the client.
    pub messages: MessageTexts,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            reenable_delay_ms: 1000,
            status_poll_secs: 30,
            request_timeout_secs: 10,
            termination_sentinel: DEFAULT_SENTINEL.to_string(),
            messages: MessageTexts::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default path (`~/.config/chatline/config.toml`).
    ///
    /// Returns default config if file doesn't exist.
    /// Returns error only if file exists but is malformed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_path();

        if !config_path.exists() {
            tracing::debug!("No config file at {:?}, using defaults", config_path);
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;

        tracing::info!("Loaded config from {:?}", path);
        tracing::debug!(server_url = %config.server_url, "effective server");

        Ok(config)
    }

    /// Default config file path: `~/.config/chatline/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chatline")
            .join("config.toml")
    }

    /// Check values that would otherwise fail at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("reenable_delay_ms", self.reenable_delay_ms, MAX_REENABLE_DELAY_MS)?;
        check_range("status_poll_secs", self.status_poll_secs, MAX_STATUS_POLL_SECS)?;
        check_range(
            "request_timeout_secs",
            self.request_timeout_secs,
            MAX_REQUEST_TIMEOUT_SECS,
        )?;
        if self.termination_sentinel.is_empty() {
            return Err(ConfigError::Invalid(
                "termination_sentinel must not be empty".into(),
            ));
        }
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "server_url must be an http(s) URL, got {:?}",
                self.server_url
            )));
        }
        Ok(())
    }

    pub const fn reenable_delay(&self) -> Duration {
        Duration::from_millis(self.reenable_delay_ms)
    }

    pub const fn status_poll_interval(&self) -> Duration {
        Duration::from_secs(self.status_poll_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Durations end up added to `Instant`s, so they must stay small enough not to
/// overflow and large enough to mean something.
fn check_range(field: &str, value: u64, max: u64) -> Result<(), ConfigError> {
    if (1..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{field} must be between 1 and {max}, got {value}"
        )))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
