//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Credentials never live in the TOML; the password comes from the
//! environment at login time and tokens live in the session file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use api_session::{SessionConfig, SessionPersistence};
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Backend connection settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    /// Whole-request timeout; unset means no client-side limit.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_expiry_margin")]
    pub expiry_margin_secs: u64,
}

/// Where the session survives between invocations
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_session_path")]
    pub session_path: PathBuf,
    /// Session file written by older releases. Read once and migrated.
    #[serde(default)]
    pub legacy_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            session_path: default_session_path(),
            legacy_path: None,
        }
    }
}

fn default_expiry_margin() -> u64 {
    session_auth::DEFAULT_EXPIRY_MARGIN.as_secs()
}

fn default_session_path() -> PathBuf {
    PathBuf::from(".booking-admin/session.json")
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// `API_BASE_URL` replaces `api.base_url`.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("API_BASE_URL") {
            config.api.base_url = url;
        }

        if !config.api.base_url.starts_with("http://")
            && !config.api.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.api.base_url
            )));
        }

        if config.api.timeout_secs == Some(0) {
            return Err(common::Error::InvalidValue {
                field: "timeout_secs",
                reason: "must be greater than 0".into(),
            });
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("booking-admin.toml")
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut session = SessionConfig::new(self.api.base_url.clone())
            .with_expiry_margin(Duration::from_secs(self.api.expiry_margin_secs));
        if let Some(secs) = self.api.timeout_secs {
            session = session.with_request_timeout(Duration::from_secs(secs));
        }
        session
    }

    pub fn persistence(&self) -> SessionPersistence {
        SessionPersistence::new(
            self.storage.session_path.clone(),
            self.storage.legacy_path.clone(),
        )
    }
}
