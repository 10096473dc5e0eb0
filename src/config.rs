use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "taskflow.json";
pub const DEFAULT_DATA_DIR: &str = ".taskflow";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const ENV_URL: &str = "TASKFLOW_URL";
pub const ENV_ANON_KEY: &str = "TASKFLOW_ANON_KEY";
pub const ENV_ACCESS_TOKEN: &str = "TASKFLOW_ACCESS_TOKEN";
pub const ENV_USER_ID: &str = "TASKFLOW_USER_ID";
pub const ENV_TIMEOUT_SECS: &str = "TASKFLOW_TIMEOUT_SECS";
pub const ENV_DATA_DIR: &str = "TASKFLOW_DATA_DIR";

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Missing(&'static str),
    Invalid { key: &'static str, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {err}"),
            ConfigError::Json(err) => write!(f, "json error: {err}"),
            ConfigError::Missing(key) => write!(f, "missing config value: {key}"),
            ConfigError::Invalid { key, message } => {
                write!(f, "invalid config value {key}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Json(err) => Some(err),
            ConfigError::Missing(_) | ConfigError::Invalid { .. } => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        ConfigError::Json(value)
    }
}

/// Connection settings for the hosted backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "snake_case")]
pub struct Config {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub url: String,
    /// Public (anon) API key sent with every request.
    pub anon_key: String,
    /// Signed-in user's access token; requests fall back to the anon key.
    pub access_token: Option<String>,
    /// Owner attached to created tasks and the settings row.
    pub user_id: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            access_token: None,
            user_id: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Reads `taskflow.json` from `data_dir` when present, then applies
    /// `TASKFLOW_*` environment overrides and validates the result.
    pub fn load(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = data_dir.join(CONFIG_FILE);
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            log::info!("config: no file at {}, using environment", path.display());
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut file = File::open(path)?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        Ok(serde_json::from_str(&buf)?)
    }

    /// Overrides fields from `lookup` (normally the process environment). Blank
    /// values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        if let Some(url) = get(ENV_URL) {
            self.url = url;
        }
        if let Some(key) = get(ENV_ANON_KEY) {
            self.anon_key = key;
        }
        if let Some(token) = get(ENV_ACCESS_TOKEN) {
            self.access_token = Some(token);
        }
        if let Some(user_id) = get(ENV_USER_ID) {
            self.user_id = Some(user_id);
        }
        if let Some(raw) = get(ENV_TIMEOUT_SECS) {
            self.request_timeout_secs = raw.parse().map_err(|err| ConfigError::Invalid {
                key: ENV_TIMEOUT_SECS,
                message: format!("{raw:?}: {err}"),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Missing("url"));
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                key: "url",
                message: format!("{:?} is not an http(s) url", self.url),
            });
        }
        if self.anon_key.trim().is_empty() {
            return Err(ConfigError::Missing("anon_key"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "request_timeout_secs",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Base of the REST endpoints (`{url}/rest/v1`).
    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.url.trim_end_matches('/'))
    }

    /// Token for the `Authorization` header.
    pub fn bearer_token(&self) -> &str {
        self.access_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .unwrap_or(&self.anon_key)
    }
}

/// Directory holding the config file and logs: `TASKFLOW_DATA_DIR`, else `./.taskflow`.
pub fn data_dir() -> PathBuf {
    std::env::var_os(ENV_DATA_DIR)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}
