//! Service configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Environment variable names.
pub mod env {
    /// Listen port.
    pub const PORT: &str = "NEUROGUIDE_PORT";
    /// SSE keep-alive interval in seconds.
    pub const SSE_KEEP_ALIVE_SECS: &str = "NEUROGUIDE_SSE_KEEP_ALIVE_SECS";
    /// Completion backend base URL.
    pub const AI_BASE_URL: &str = "NEUROGUIDE_AI_BASE_URL";
    /// `http` or `mock`.
    pub const UPSTREAM: &str = "NEUROGUIDE_UPSTREAM";
    /// Connect timeout in seconds.
    pub const AI_CONNECT_TIMEOUT_SECS: &str = "NEUROGUIDE_AI_CONNECT_TIMEOUT_SECS";
    /// Unary request timeout in seconds.
    pub const AI_REQUEST_TIMEOUT_SECS: &str = "NEUROGUIDE_AI_REQUEST_TIMEOUT_SECS";
    /// Delay between mock fragments in milliseconds.
    pub const MOCK_DELAY_MS: &str = "NEUROGUIDE_MOCK_DELAY_MS";
    /// `sqlite` or `memory`.
    pub const STORE: &str = "NEUROGUIDE_STORE";
    /// `SQLite` database path.
    pub const SQLITE_PATH: &str = "NEUROGUIDE_SQLITE_PATH";
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is set to a value that cannot be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Offending value.
        value: String,
    },
    /// A value parses but breaks an invariant.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// The backend URL is not a valid URL.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

/// Top-level service configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Completion backend settings.
    pub upstream: UpstreamConfig,
    /// Conversation storage settings.
    pub storage: StorageConfig,
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen port.
    pub port: u16,
    /// Interval between SSE keep-alive comments.
    pub sse_keep_alive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            sse_keep_alive_secs: 15,
        }
    }
}

impl ServerConfig {
    /// SSE keep-alive interval.
    #[must_use]
    pub const fn sse_keep_alive(&self) -> Duration {
        Duration::from_secs(self.sse_keep_alive_secs)
    }
}

/// Which completion client to build.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamBackend {
    /// Network client against the configured base URL.
    Http,
    /// Deterministic local client.
    Mock,
}

impl FromStr for UpstreamBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "mock" => Ok(Self::Mock),
            _ => Err(value.to_string()),
        }
    }
}

/// Completion backend settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Client implementation.
    pub backend: UpstreamBackend,
    /// Base URL; `/chat` and `/stream-chat` are appended.
    pub base_url: String,
    /// Connect timeout (seconds).
    pub connect_timeout_secs: u64,
    /// Whole-request timeout for unary calls (seconds).
    pub request_timeout_secs: u64,
    /// Delay between fragments of the mock client (milliseconds).
    pub mock_delay_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            backend: UpstreamBackend::Http,
            base_url: "http://localhost:5000".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 120,
            mock_delay_ms: 100,
        }
    }
}

impl UpstreamConfig {
    /// Connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Unary request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Mock inter-fragment delay.
    #[must_use]
    pub const fn mock_delay(&self) -> Duration {
        Duration::from_millis(self.mock_delay_ms)
    }
}

/// Which conversation store to build.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// `SQLite` file (or `:memory:`).
    Sqlite,
    /// Process memory only.
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            _ => Err(value.to_string()),
        }
    }
}

/// Conversation storage settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Store implementation.
    pub backend: StorageBackend,
    /// `SQLite` database path.
    pub sqlite_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            sqlite_path: "neuroguide.db".to_string(),
        }
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        _ => Ok(default),
    }
}

impl AppConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    /// Returns an error if a variable is malformed or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup; unset or blank variables take
    /// their defaults.
    ///
    /// # Errors
    /// Returns an error if a variable is malformed or the result is invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            server: ServerConfig {
                port: parse_var(&lookup, env::PORT, defaults.server.port)?,
                sse_keep_alive_secs: parse_var(
                    &lookup,
                    env::SSE_KEEP_ALIVE_SECS,
                    defaults.server.sse_keep_alive_secs,
                )?,
            },
            upstream: UpstreamConfig {
                backend: parse_var(&lookup, env::UPSTREAM, defaults.upstream.backend)?,
                base_url: parse_var(&lookup, env::AI_BASE_URL, defaults.upstream.base_url)?,
                connect_timeout_secs: parse_var(
                    &lookup,
                    env::AI_CONNECT_TIMEOUT_SECS,
                    defaults.upstream.connect_timeout_secs,
                )?,
                request_timeout_secs: parse_var(
                    &lookup,
                    env::AI_REQUEST_TIMEOUT_SECS,
                    defaults.upstream.request_timeout_secs,
                )?,
                mock_delay_ms: parse_var(
                    &lookup,
                    env::MOCK_DELAY_MS,
                    defaults.upstream.mock_delay_ms,
                )?,
            },
            storage: StorageConfig {
                backend: parse_var(&lookup, env::STORE, defaults.storage.backend)?,
                sqlite_path: parse_var(&lookup, env::SQLITE_PATH, defaults.storage.sqlite_path)?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.sse_keep_alive_secs == 0 {
            return Err(ConfigError::Invalid(
                "server.sse_keep_alive_secs must be > 0".to_string(),
            ));
        }

        if self.upstream.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "upstream.connect_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.upstream.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "upstream.request_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.upstream.backend == UpstreamBackend::Http {
            let url = Url::parse(&self.upstream.base_url)?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid(format!(
                    "upstream.base_url must be http(s), got {}",
                    url.scheme()
                )));
            }
        }

        if self.storage.backend == StorageBackend::Sqlite && self.storage.sqlite_path.is_empty() {
            return Err(ConfigError::Invalid(
                "storage.sqlite_path must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
