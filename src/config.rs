use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::models::Session;

/// Source of a configuration value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }

    fn default(value: T) -> Self {
        Self::new(value, ConfigSource::Default)
    }
}

/// Credentials for the remote service.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// API key sent as a bearer token
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    pub user_id: Option<i64>,
}

impl AuthConfig {
    pub fn session(&self) -> Session {
        match (&self.token, self.user_id) {
            (Some(token), Some(user_id)) => Session::new(token.clone(), user_id),
            _ => Session::anonymous(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite cache database
    pub database_path: ConfigValue<PathBuf>,
    /// Base URL of the meal service
    pub server_url: ConfigValue<String>,
    /// Items per listed page
    pub page_size: ConfigValue<usize>,
    pub request_timeout_secs: ConfigValue<u64>,
    /// Pause between push channel reconnect attempts
    pub reconnect_delay_secs: ConfigValue<u64>,
    /// Interval of the reachability probe in `watch`
    pub health_interval_secs: ConfigValue<u64>,
    /// Where attached photos are written
    pub photo_dir: ConfigValue<PathBuf>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub auth: AuthConfig,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    server_url: Option<String>,
    page_size: Option<usize>,
    request_timeout_secs: Option<u64>,
    reconnect_delay_secs: Option<u64>,
    health_interval_secs: Option<u64>,
    photo_dir: Option<PathBuf>,
    auth: Option<AuthConfig>,
}

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";
pub const DEFAULT_PAGE_SIZE: usize = 5;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 5;
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 30;

/// Resolves relative paths against the config file's directory.
fn resolve_relative(config_path: &Path, value: PathBuf) -> PathBuf {
    if value.is_relative() {
        config_path
            .parent()
            .map(|p| p.join(&value))
            .unwrap_or(value)
    } else {
        value
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: String) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw,
    })
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::load_with_env(config_path, |key| std::env::var(key).ok())
    }

    /// Like [`Config::load`], reading overrides through `env`.
    pub fn load_with_env<F>(config_path: Option<PathBuf>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = Self::default_data_dir();
        let mut database_path = ConfigValue::default(data_dir.join("cache.db"));
        let mut server_url = ConfigValue::default(DEFAULT_SERVER_URL.to_string());
        let mut page_size = ConfigValue::default(DEFAULT_PAGE_SIZE);
        let mut request_timeout_secs = ConfigValue::default(DEFAULT_REQUEST_TIMEOUT_SECS);
        let mut reconnect_delay_secs = ConfigValue::default(DEFAULT_RECONNECT_DELAY_SECS);
        let mut health_interval_secs = ConfigValue::default(DEFAULT_HEALTH_INTERVAL_SECS);
        let mut photo_dir = ConfigValue::default(data_dir.join("photos"));
        let mut config_file = None;
        let mut auth = AuthConfig::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(value) = file.database_path {
                database_path = ConfigValue::new(resolve_relative(&path, value), ConfigSource::File);
            }
            if let Some(value) = file.server_url {
                server_url = ConfigValue::new(value, ConfigSource::File);
            }
            if let Some(value) = file.page_size {
                page_size = ConfigValue::new(value, ConfigSource::File);
            }
            if let Some(value) = file.request_timeout_secs {
                request_timeout_secs = ConfigValue::new(value, ConfigSource::File);
            }
            if let Some(value) = file.reconnect_delay_secs {
                reconnect_delay_secs = ConfigValue::new(value, ConfigSource::File);
            }
            if let Some(value) = file.health_interval_secs {
                health_interval_secs = ConfigValue::new(value, ConfigSource::File);
            }
            if let Some(value) = file.photo_dir {
                photo_dir = ConfigValue::new(resolve_relative(&path, value), ConfigSource::File);
            }
            if let Some(value) = file.auth {
                auth = value;
            }
        }

        // Apply environment variable overrides
        if let Some(value) = env("NUTRISYNC_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(value), ConfigSource::Environment);
        }
        if let Some(value) = env("NUTRISYNC_SERVER_URL") {
            server_url = ConfigValue::new(value, ConfigSource::Environment);
        }
        if let Some(value) = env("NUTRISYNC_PAGE_SIZE") {
            page_size = ConfigValue::new(
                parse_env("NUTRISYNC_PAGE_SIZE", value)?,
                ConfigSource::Environment,
            );
        }
        if let Some(value) = env("NUTRISYNC_REQUEST_TIMEOUT_SECS") {
            request_timeout_secs = ConfigValue::new(
                parse_env("NUTRISYNC_REQUEST_TIMEOUT_SECS", value)?,
                ConfigSource::Environment,
            );
        }
        if let Some(value) = env("NUTRISYNC_RECONNECT_DELAY_SECS") {
            reconnect_delay_secs = ConfigValue::new(
                parse_env("NUTRISYNC_RECONNECT_DELAY_SECS", value)?,
                ConfigSource::Environment,
            );
        }
        if let Some(value) = env("NUTRISYNC_HEALTH_INTERVAL_SECS") {
            health_interval_secs = ConfigValue::new(
                parse_env("NUTRISYNC_HEALTH_INTERVAL_SECS", value)?,
                ConfigSource::Environment,
            );
        }
        if let Some(value) = env("NUTRISYNC_PHOTO_DIR") {
            photo_dir = ConfigValue::new(PathBuf::from(value), ConfigSource::Environment);
        }
        if let Some(value) = env("NUTRISYNC_TOKEN") {
            auth.token = Some(value);
        }
        if let Some(value) = env("NUTRISYNC_USER_ID") {
            auth.user_id = Some(parse_env("NUTRISYNC_USER_ID", value)?);
        }

        if page_size.value == 0 {
            return Err(ConfigError::InvalidValue {
                key: "page_size".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(Self {
            database_path,
            server_url,
            page_size,
            request_timeout_secs,
            reconnect_delay_secs,
            health_interval_secs,
            photo_dir,
            config_file,
            auth,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.value)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs.value)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.value)
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/nutrisync/
    /// - macOS: ~/Library/Application Support/nutrisync/
    /// - Windows: %APPDATA%/nutrisync/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nutrisync")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/nutrisync/
    /// - macOS: ~/Library/Application Support/nutrisync/
    /// - Windows: %APPDATA%/nutrisync/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nutrisync")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    ReadError(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    ParseError(PathBuf, #[source] serde_yaml::Error),
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}
