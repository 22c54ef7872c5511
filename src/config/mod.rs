//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log
//! leaks. Per-queue tuning comes from an optional TOML file next to
//! the binary ([`Tuning`]).

pub mod secrets;

use secrecy::SecretString;
use serde::Deserialize;

use crate::engine::WorkerConfig;
use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// Secret the credential snapshot key is derived from.
    pub credential_secret: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            credential_secret: SecretString::from(required_var("CREDENTIAL_SECRET")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Optional per-queue tuning overrides, loaded from a TOML file.
/// Anything unset keeps the worker defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Tuning {
    #[serde(default)]
    pub delivery: QueueTuning,
    #[serde(default)]
    pub commands: QueueTuning,
}

impl Tuning {
    /// Load tuning from `path`. A missing file is not an error — it
    /// just means all defaults.
    pub fn load_optional(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid tuning file {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueTuning {
    pub poll_interval_secs: Option<u64>,
    pub batch_size: Option<usize>,
    pub sweep_interval_secs: Option<u64>,
    pub staleness_secs: Option<i64>,
    pub retention_days: Option<i64>,
    pub sweep_batch: Option<i64>,
}

impl QueueTuning {
    /// Overlay these overrides onto a worker config.
    pub fn apply(&self, mut config: WorkerConfig) -> WorkerConfig {
        if let Some(secs) = self.poll_interval_secs {
            config.poll_interval = std::time::Duration::from_secs(secs);
        }
        if let Some(n) = self.batch_size {
            config.batch_size = n;
        }
        if let Some(secs) = self.sweep_interval_secs {
            config.sweep.interval = std::time::Duration::from_secs(secs);
        }
        if let Some(secs) = self.staleness_secs {
            config.sweep.staleness = chrono::Duration::seconds(secs);
        }
        if let Some(days) = self.retention_days {
            config.sweep.retention = chrono::Duration::days(days);
        }
        if let Some(n) = self.sweep_batch {
            config.sweep.batch = n;
        }
        config
    }
}
