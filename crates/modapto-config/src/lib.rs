use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bearer token required on `/api` routes (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

fn default_port() -> u16 {
    8094
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            auth_token: None,
        }
    }
}

/// Where task and result records live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file. Defaults to `~/.modapto/modapto.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Client-credentials settings for the identity provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub token_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default, skip_serializing)]
    pub client_secret: String,
}

/// Module registry used to resolve smart-service addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_url")]
    pub base_url: String,
}

fn default_registry_url() -> String {
    "http://localhost:8091".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_registry_url(),
        }
    }
}

/// Outbound smart-service call settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl InvocationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Recurring task scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Delay before a failed firing is retried.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

fn default_retry_delay_secs() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Top-level modapto configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModaptoConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub invocation: InvocationConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl ModaptoConfig {
    /// Resolve the SQLite path, falling back to the config directory.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database.path {
            Some(p) => Ok(p.clone()),
            None => Ok(ensure_config_dir()?.join("modapto.db")),
        }
    }

    /// Override settings from `MODAPTO_*` variables looked up through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("MODAPTO_TOKEN_URL") {
            self.auth.token_url = v;
        }
        if let Some(v) = lookup("MODAPTO_CLIENT_ID") {
            self.auth.client_id = v;
        }
        if let Some(v) = lookup("MODAPTO_CLIENT_SECRET") {
            self.auth.client_secret = v;
        }
        if let Some(v) = lookup("MODAPTO_REGISTRY_URL") {
            self.registry.base_url = v;
        }
        if let Some(v) = lookup("MODAPTO_AUTH_TOKEN") {
            self.server.auth_token = Some(v);
        }
        if let Some(port) = lookup("MODAPTO_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
    }
}

/// Resolve the modapto config directory (~/.modapto/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".modapto"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.modapto/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, then apply environment overrides.
pub fn load_config() -> Result<ModaptoConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    let mut config = load_config_from(&path)?;
    config.apply_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<ModaptoConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(ModaptoConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: ModaptoConfig = json5::from_str(&content)?;
    Ok(config)
}

/// Ensure the config directory exists.
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}
