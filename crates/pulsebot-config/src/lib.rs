use std::path::{Path, PathBuf};

use chrono_tz::Tz;
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
    #[error("Invalid time zone: {0}")]
    InvalidTimeZone(String),
}

// ──────────────────── Scheduler ────────────────────

/// How heartbeats are produced.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerMode {
    /// An internal interval timer drives heartbeats.
    #[default]
    SingleNode,
    /// Heartbeats arrive from outside (HTTP trigger, one-shot CLI run).
    Serverless,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub mode: SchedulerMode,
    /// IANA time zone the cron expressions are evaluated in.
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Expiry hint for `lastResult` / `lastError` rows.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    60_000
}

fn default_cache_ttl_ms() -> u64 {
    24 * 60 * 60 * 1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mode: SchedulerMode::default(),
            time_zone: default_time_zone(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            cache_ttl_ms: default_cache_ttl_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Parse the configured time zone.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.time_zone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimeZone(self.time_zone.clone()))
    }
}

// ──────────────────── Interaction ────────────────────

/// Gating thresholds for one automation plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionConfig {
    /// Prefix of the persisted `interaction_controls` key (e.g. `"twitter:"`).
    #[serde(default = "default_plugin_prefix")]
    pub plugin_prefix: String,
    #[serde(default = "default_max_thread_depth")]
    pub max_thread_depth: u32,
    #[serde(default = "default_thread_timeout_ms")]
    pub thread_timeout_ms: u64,
    #[serde(default)]
    pub min_engagement_score: f64,
    #[serde(default)]
    pub no_response_keywords: Vec<String>,
    /// Probability in `[0, 1]` of skipping an otherwise acceptable candidate.
    #[serde(default)]
    pub skip_probability: f64,
    /// Cron expression for the idle-thread cleanup job.
    #[serde(default = "default_cleanup_schedule")]
    pub cleanup_schedule: String,
}

fn default_plugin_prefix() -> String {
    "twitter:".to_string()
}

fn default_max_thread_depth() -> u32 {
    5
}

fn default_thread_timeout_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_cleanup_schedule() -> String {
    "0 * * * *".to_string()
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            plugin_prefix: default_plugin_prefix(),
            max_thread_depth: default_max_thread_depth(),
            thread_timeout_ms: default_thread_timeout_ms(),
            min_engagement_score: 0.0,
            no_response_keywords: Vec::new(),
            skip_probability: 0.0,
            cleanup_schedule: default_cleanup_schedule(),
        }
    }
}

// ──────────────────── Gateway / Storage ────────────────────

/// HTTP trigger surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bearer token for authentication (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

fn default_port() -> u16 {
    3000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path. Defaults to `~/.pulsebot/pulsebot.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Top-level pulsebot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PulseConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub interaction: InteractionConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl PulseConfig {
    /// Resolve the database path, falling back to the config directory.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.path {
            Some(path) => Ok(path.clone()),
            None => Ok(ensure_config_dir()?.join("pulsebot.db")),
        }
    }
}

/// Resolve the pulsebot config directory (~/.pulsebot/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".pulsebot"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.pulsebot/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<PulseConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<PulseConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(PulseConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: PulseConfig = json5::from_str(&content)?;
    config.scheduler.tz()?;
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
