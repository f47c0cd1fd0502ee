//! Client configuration, read from the environment.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use procura_infra::{InMemoryStore, KeyValueStore, SqliteStore};

const DEFAULT_API_URL: &str = "http://localhost:8080";
const DEFAULT_SIGN_IN_PATH: &str = "/sign-in";
const DEFAULT_COOLDOWN_MS: u64 = 100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to resolve OS app data directory")]
    NoDataDir,
}

/// Where the shared session store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    /// Process-local; every tab of this process shares it, nothing survives exit.
    Memory,
    /// SQLite database file.
    Sqlite(PathBuf),
}

impl StorageConfig {
    pub async fn open(&self) -> anyhow::Result<Arc<dyn KeyValueStore>> {
        match self {
            StorageConfig::Memory => Ok(Arc::new(InMemoryStore::new())),
            StorageConfig::Sqlite(path) => Ok(Arc::new(SqliteStore::open(path).await?)),
        }
    }
}

/// Knobs of the session synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Window after a local logout during which cross-tab notifications are
    /// ignored.
    pub reentrancy_cooldown: Duration,
    /// Where logout sends the user.
    pub sign_in_path: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            reentrancy_cooldown: Duration::from_millis(DEFAULT_COOLDOWN_MS),
            sign_in_path: DEFAULT_SIGN_IN_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_url: String,
    pub storage: StorageConfig,
    pub sync: SyncSettings,
}

impl ClientConfig {
    /// Load from `PROCURA_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = lookup("PROCURA_API_URL").unwrap_or_else(|| {
            tracing::info!("PROCURA_API_URL not set; using {DEFAULT_API_URL}");
            DEFAULT_API_URL.to_string()
        });
        let api_url = api_url.trim_end_matches('/').to_string();
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: "PROCURA_API_URL",
                value: api_url,
                reason: "expected an http(s) URL".into(),
            });
        }

        let storage = match lookup("PROCURA_STORAGE_PATH") {
            Some(path) if path == ":memory:" => StorageConfig::Memory,
            Some(path) => StorageConfig::Sqlite(PathBuf::from(path)),
            None => StorageConfig::Sqlite(default_store_path()?),
        };

        let reentrancy_cooldown = match lookup("PROCURA_SYNC_COOLDOWN_MS") {
            Some(raw) => {
                let millis = raw.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                    key: "PROCURA_SYNC_COOLDOWN_MS",
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
                Duration::from_millis(millis)
            }
            None => Duration::from_millis(DEFAULT_COOLDOWN_MS),
        };

        let sign_in_path =
            lookup("PROCURA_SIGN_IN_PATH").unwrap_or_else(|| DEFAULT_SIGN_IN_PATH.to_string());

        Ok(Self {
            api_url,
            storage,
            sync: SyncSettings {
                reentrancy_cooldown,
                sign_in_path,
            },
        })
    }
}

/// `{app_data_dir}/procura/session.db`.
fn default_store_path() -> Result<PathBuf, ConfigError> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .ok_or(ConfigError::NoDataDir)?;

    let mut path = base;
    path.push("procura");
    path.push("session.db");
    Ok(path)
}
