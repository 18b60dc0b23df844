//! Configuration management for Crosspub

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub vault: VaultConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Publish scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between publish ticks
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Maximum due posts fetched per tick
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            batch_size: default_batch_size(),
        }
    }
}

/// Token refresh scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Seconds between refresh ticks
    #[serde(default = "default_refresh_interval")]
    pub interval: u64,
    /// Days before expiry at which a credential becomes eligible for renewal
    #[serde(default = "default_lookahead_days")]
    pub lookahead_days: i64,
    /// Milliseconds to wait between consecutive refresh calls
    #[serde(default = "default_inter_call_delay_ms")]
    pub inter_call_delay_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: default_refresh_interval(),
            lookahead_days: default_lookahead_days(),
            inter_call_delay_ms: default_inter_call_delay_ms(),
        }
    }
}

/// Media retention tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Seconds between a post reaching `published` and its cleanup job firing
    #[serde(default = "default_cleanup_delay")]
    pub cleanup_delay: u64,
    /// Directory backing the local media store
    #[serde(default = "default_media_dir")]
    pub media_dir: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            cleanup_delay: default_cleanup_delay(),
            media_dir: default_media_dir(),
        }
    }
}

/// Credential vault settings.
///
/// The master secret can also be supplied via `CROSSPUB_MASTER_KEY`, which
/// takes precedence over the config file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VaultConfig {
    pub master_secret: Option<String>,
    /// Enable the logged legacy/plaintext decrypt fallbacks (migration mode)
    #[serde(default)]
    pub allow_legacy: bool,
    /// Production deployments refuse to run without a master secret
    #[serde(default)]
    pub production: bool,
}

fn default_poll_interval() -> u64 {
    60
}

fn default_batch_size() -> u32 {
    10
}

fn default_refresh_interval() -> u64 {
    3600
}

fn default_lookahead_days() -> i64 {
    3
}

fn default_inter_call_delay_ms() -> u64 {
    1000
}

fn default_cleanup_delay() -> u64 {
    300
}

fn default_media_dir() -> String {
    "~/.local/share/crosspub/media".to_string()
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/crosspub/crosspub.db".to_string(),
            },
            scheduler: SchedulerConfig::default(),
            refresh: RefreshConfig::default(),
            retention: RetentionConfig::default(),
            vault: VaultConfig::default(),
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CROSSPUB_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("crosspub").join("config.toml"))
}
