mod file_config;

pub use file_config::{BackgroundJobsConfig, FileConfig, ReportingConfig};

use crate::params::{PolicyParams, DEFAULT_MAX_VISIBLE, DEFAULT_TTL_SECS};
use crate::notifications::DEFAULT_RETENTION_WINDOW_SECS;
use anyhow::{bail, Result};
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub max_visible: usize,
    pub retention_window_secs: i64,
    pub report_endpoint: Option<String>,
    pub report_timeout_secs: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_dir: None,
            max_visible: DEFAULT_MAX_VISIBLE,
            retention_window_secs: DEFAULT_RETENTION_WINDOW_SECS,
            report_endpoint: None,
            report_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,

    /// Initial policy served by the parameters service.
    pub policy: PolicyParams,

    // Feature configs (with defaults)
    pub reporting: ReportingSettings,
    pub background_jobs: BackgroundJobsSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let defaults = PolicyParams::default();
        let policy = PolicyParams {
            retention_window_secs: file
                .retention_window_secs
                .unwrap_or(cli.retention_window_secs),
            max_visible: file.max_visible.unwrap_or(cli.max_visible),
            restore_ttl_filter: file
                .restore_ttl_filter
                .unwrap_or(defaults.restore_ttl_filter),
            receive_receipts_enabled: file
                .receive_receipts_enabled
                .unwrap_or(defaults.receive_receipts_enabled),
            default_ttl_secs: file.default_ttl_secs.unwrap_or(DEFAULT_TTL_SECS),
        };

        if policy.max_visible == 0 {
            bail!("max_visible must be greater than zero");
        }
        if policy.retention_window_secs <= 0 {
            bail!(
                "retention_window_secs must be positive, got {}",
                policy.retention_window_secs
            );
        }
        if policy.default_ttl_secs <= 0 {
            bail!(
                "default_ttl_secs must be positive, got {}",
                policy.default_ttl_secs
            );
        }

        // Reporting settings - merge file config with defaults
        let rp_file = file.reporting.unwrap_or_default();
        let rp_defaults = ReportingSettings::default();
        let reporting = ReportingSettings {
            endpoint: rp_file.endpoint.or_else(|| cli.report_endpoint.clone()),
            timeout_secs: rp_file.timeout_secs.unwrap_or(cli.report_timeout_secs),
            max_retries: rp_file.max_retries.unwrap_or(rp_defaults.max_retries),
            initial_backoff_secs: rp_file
                .initial_backoff_secs
                .unwrap_or(rp_defaults.initial_backoff_secs),
            max_backoff_secs: rp_file
                .max_backoff_secs
                .unwrap_or(rp_defaults.max_backoff_secs),
            backoff_multiplier: rp_file
                .backoff_multiplier
                .unwrap_or(rp_defaults.backoff_multiplier),
            receipt_max_delay_secs: rp_file
                .receipt_max_delay_secs
                .unwrap_or(rp_defaults.receipt_max_delay_secs),
        };

        if reporting.backoff_multiplier < 1.0 {
            bail!(
                "backoff_multiplier must be at least 1.0, got {}",
                reporting.backoff_multiplier
            );
        }

        let jobs_file = file.background_jobs.unwrap_or_default();
        let background_jobs = BackgroundJobsSettings {
            cleanup_interval_hours: jobs_file
                .cleanup_interval_hours
                .unwrap_or(BackgroundJobsSettings::default().cleanup_interval_hours),
        };

        Ok(Self {
            db_dir,
            policy,
            reporting,
            background_jobs,
        })
    }

    pub fn notifications_db_path(&self) -> PathBuf {
        self.db_dir.join("notifications.db")
    }
}

#[derive(Debug, Clone)]
pub struct ReportingSettings {
    /// Reports are only sent when an endpoint is configured.
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
    pub receipt_max_delay_secs: u64,
}

impl Default for ReportingSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 30,
            max_retries: 5,
            initial_backoff_secs: 15,
            max_backoff_secs: 3600,
            backoff_multiplier: 2.0,
            receipt_max_delay_secs: 25,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackgroundJobsSettings {
    pub cleanup_interval_hours: u64,
}

impl Default for BackgroundJobsSettings {
    fn default() -> Self {
        Self {
            cleanup_interval_hours: 24,
        }
    }
}
