//! Configuration file parser for ~/.config/sift/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted but logged, since they are usually typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::engine::DEFAULT_CACHE_CAPACITY;
use crate::session::{SessionOptions, DEFAULT_FETCH_CONCURRENCY};

/// Environment variable that overrides `api_token` from the file.
pub const API_TOKEN_ENV: &str = "SIFT_API_TOKEN";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Which [`Backend`](crate::backend::Backend) the CLI talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// SQLite file on this machine.
    #[default]
    Local,
    /// The hosted REST service at `api_base_url`.
    Remote,
}

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// The Debug impl masks `api_token`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendKind,

    /// SQLite file for the local backend. `None` means `sift.db` in the
    /// config directory.
    pub database_path: Option<PathBuf>,

    pub api_base_url: String,

    /// Bearer token for the remote backend. `SIFT_API_TOKEN` takes
    /// precedence.
    pub api_token: Option<String>,

    /// Number of filtered views kept in the aggregate cache.
    pub cache_capacity: usize,

    /// Concurrent requests when loading memberships during sync.
    pub fetch_concurrency: usize,

    /// Per-request timeout for the remote backend.
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            database_path: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_token: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            request_timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("backend", &self.backend)
            .field("database_path", &self.database_path)
            .field("api_base_url", &self.api_base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("cache_capacity", &self.cache_capacity)
            .field("fetch_concurrency", &self.fetch_concurrency)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "backend",
        "database_path",
        "api_base_url",
        "api_token",
        "cache_capacity",
        "fetch_concurrency",
        "request_timeout_secs",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content)
    }

    /// Parse configuration text. Blank input yields the defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(backend = ?config.backend, "Loaded configuration");
        Ok(config)
    }

    /// The API token, preferring `SIFT_API_TOKEN` over the file.
    pub fn api_token(&self) -> Option<SecretString> {
        self.api_token_with_override(std::env::var(API_TOKEN_ENV).ok())
    }

    fn api_token_with_override(&self, env: Option<String>) -> Option<SecretString> {
        env.filter(|t| !t.trim().is_empty())
            .or_else(|| self.api_token.clone().filter(|t| !t.trim().is_empty()))
            .map(|t| SecretString::from(t.trim().to_string()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Database file, defaulting into `config_dir`.
    pub fn database_path(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("sift.db"))
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            cache_capacity: self.cache_capacity,
            fetch_concurrency: self.fetch_concurrency.max(1),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
