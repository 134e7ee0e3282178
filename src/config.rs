//! Process bootstrap configuration.
//!
//! Only what the process needs before the database is reachable lives here
//! (DSN, listen address, data directory, scheduler cadence). Everything
//! else is a runtime key in the config table behind `ConfigStore`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub scheduler: SchedulerConfig,

    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_url: String,

    /// Root for danmaku blobs, poster images and rate-limit policy files.
    pub data_dir: String,

    pub log_level: String,

    /// 0 lets tokio pick.
    pub worker_threads: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:data/danmarr.db".to_string(),
            data_dir: "data".to_string(),
            log_level: "info".to_string(),
            worker_threads: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,

    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7768".to_string(),
            cors_allowed_origins: vec!["*".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,

    /// Delayed-webhook drain cadence.
    pub webhook_drain_interval_seconds: u32,

    /// 6-field cron for the incremental refresh sweep.
    pub incremental_refresh_cron: String,

    pub full_refresh_enabled: bool,

    pub full_refresh_cron: String,

    pub cache_gc_interval_hours: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            webhook_drain_interval_seconds: 60,
            incremental_refresh_cron: "0 0 */6 * * *".to_string(),
            full_refresh_enabled: false,
            full_refresh_cron: "0 0 4 * * *".to_string(),
            cache_gc_interval_hours: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            server: ServerConfig::default(),
            scheduler: SchedulerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = PathBuf::from("config.toml");
        let mut config = if path.exists() {
            info!("Loading config from: {}", path.display());
            Self::load_from_path(&path)?
        } else {
            info!("No config file found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("DANMARR_DATABASE_URL") {
            self.general.database_url = value;
        }
        if let Ok(value) = std::env::var("DANMARR_DATA_DIR") {
            self.general.data_dir = value;
        }
        if let Ok(value) = std::env::var("DANMARR_LISTEN") {
            self.server.listen = value;
        }
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = PathBuf::from("config.toml");
        if path.exists() {
            return Ok(false);
        }

        let content = toml::to_string_pretty(&Self::default())?;
        std::fs::write(&path, content)?;
        info!("Created default config file: {}", path.display());
        Ok(true)
    }

    pub fn validate(&self) -> Result<()> {
        if self.general.database_url.is_empty() {
            anyhow::bail!("database_url cannot be empty");
        }
        if self.server.listen.parse::<std::net::SocketAddr>().is_err() {
            anyhow::bail!("server.listen is not a valid socket address");
        }
        if self.scheduler.enabled && self.scheduler.webhook_drain_interval_seconds == 0 {
            anyhow::bail!("webhook drain interval must be > 0");
        }
        Ok(())
    }
}
