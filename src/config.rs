//! Configuration loading
//!
//! Values come from an optional TOML file layered with `LATENCY_*` environment
//! variables (`LATENCY_SERVER__PORT=8080`). A `.env` file is honoured.

use crate::error::{Result, TelemetryError};
use crate::export::ExportFormat;
use crate::store::RetentionPolicy;
use chrono::format::{Item, StrftimeItems};
use chrono::FixedOffset;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    /// SQLite archive; in-memory only when absent
    pub storage: Option<StorageConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerConfig {
    pub fn base_url(&self) -> String {
        let host = if self.host == "0.0.0.0" { "127.0.0.1" } else { &self.host };
        format!("http://{}:{}", host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Maximum number of records kept in memory
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    /// Optional age bound in seconds
    #[serde(default)]
    pub max_age_secs: Option<u64>,
    /// Cadence of the background age sweep
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl RetentionConfig {
    pub fn policy(&self) -> RetentionPolicy {
        let policy = RetentionPolicy::max_records(self.max_records);
        match self.max_age_secs {
            Some(secs) => policy.with_max_age(Duration::from_secs(secs)),
            None => policy,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
            max_age_secs: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    /// Offset of the export timezone from UTC (Asia/Kolkata by default)
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
    #[serde(default = "default_rows_per_chunk")]
    pub rows_per_chunk: usize,
}

impl ExportConfig {
    pub fn format(&self) -> Result<ExportFormat> {
        let offset = self
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                TelemetryError::Config(format!(
                    "export.utc_offset_minutes out of range: {}",
                    self.utc_offset_minutes
                ))
            })?;
        if StrftimeItems::new(&self.timestamp_format).any(|item| matches!(item, Item::Error)) {
            return Err(TelemetryError::Config(format!(
                "export.timestamp_format is not a valid strftime pattern: '{}'",
                self.timestamp_format
            )));
        }
        Ok(ExportFormat {
            offset,
            timestamp_format: self.timestamp_format.clone(),
            rows_per_chunk: self.rows_per_chunk.max(1),
        })
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: default_utc_offset_minutes(),
            timestamp_format: default_timestamp_format(),
            rows_per_chunk: default_rows_per_chunk(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Allowed gap between the phase sum and total latency before warning
    #[serde(default = "default_breakdown_tolerance")]
    pub breakdown_tolerance_ms: f64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            breakdown_tolerance_ms: default_breakdown_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite file; `~` is expanded
    pub path: String,
    #[serde(default = "default_storage_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Delete archived rows older than this many days
    #[serde(default)]
    pub purge_after_days: Option<u32>,
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_max_records() -> usize {
    10_000
}
fn default_sweep_interval() -> u64 {
    60
}
fn default_limit() -> usize {
    100
}
fn default_max_limit() -> usize {
    1_000
}
fn default_utc_offset_minutes() -> i32 {
    330
}
fn default_timestamp_format() -> String {
    "%d-%m-%Y %I:%M:%S %p".to_string()
}
fn default_rows_per_chunk() -> usize {
    500
}
fn default_breakdown_tolerance() -> f64 {
    1.0
}
fn default_storage_timeout() -> u64 {
    2_000
}
fn default_queue_capacity() -> usize {
    4_096
}
fn default_batch_size() -> usize {
    256
}

impl Config {
    /// Load from a TOML file (optional) plus environment overrides
    pub fn load(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix("LATENCY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retention.max_records == 0 {
            return Err(TelemetryError::Config(
                "retention.max_records must be greater than 0".into(),
            ));
        }
        if self.retention.max_age_secs == Some(0) {
            return Err(TelemetryError::Config(
                "retention.max_age_secs must be greater than 0".into(),
            ));
        }
        if self.query.default_limit == 0 || self.query.max_limit == 0 {
            return Err(TelemetryError::Config("query limits must be greater than 0".into()));
        }
        if self.query.default_limit > self.query.max_limit {
            return Err(TelemetryError::Config(format!(
                "query.default_limit ({}) exceeds query.max_limit ({})",
                self.query.default_limit, self.query.max_limit
            )));
        }
        if !self.ingest.breakdown_tolerance_ms.is_finite() || self.ingest.breakdown_tolerance_ms < 0.0 {
            return Err(TelemetryError::Config(
                "ingest.breakdown_tolerance_ms must be a non-negative number".into(),
            ));
        }
        self.export.format()?;
        if let Some(storage) = &self.storage {
            if storage.path.trim().is_empty() {
                return Err(TelemetryError::Config("storage.path must not be empty".into()));
            }
            if storage.timeout_ms == 0 || storage.queue_capacity == 0 || storage.batch_size == 0 {
                return Err(TelemetryError::Config(
                    "storage timeout, queue capacity and batch size must be greater than 0".into(),
                ));
            }
        }
        Ok(())
    }
}
