use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub retention_window_secs: Option<i64>,
    pub max_visible: Option<usize>,
    pub restore_ttl_filter: Option<bool>,
    pub receive_receipts_enabled: Option<bool>,
    pub default_ttl_secs: Option<i64>,

    // Feature configs
    pub reporting: Option<ReportingConfig>,
    pub background_jobs: Option<BackgroundJobsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ReportingConfig {
    pub endpoint: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub initial_backoff_secs: Option<u64>,
    pub max_backoff_secs: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub receipt_max_delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackgroundJobsConfig {
    pub cleanup_interval_hours: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sections() {
        let config: FileConfig = toml::from_str(
            r#"
            db_dir = "/data"
            max_visible = 10
            restore_ttl_filter = false

            [reporting]
            endpoint = "https://reports.example.com/v1/notifications"
            max_retries = 2

            [background_jobs]
            cleanup_interval_hours = 6
            "#,
        )
        .unwrap();

        assert_eq!(config.db_dir.as_deref(), Some("/data"));
        assert_eq!(config.max_visible, Some(10));
        assert_eq!(config.restore_ttl_filter, Some(false));
        assert!(config.retention_window_secs.is_none());

        let reporting = config.reporting.unwrap();
        assert_eq!(reporting.max_retries, Some(2));
        assert!(reporting.backoff_multiplier.is_none());
        assert_eq!(
            config.background_jobs.unwrap().cleanup_interval_hours,
            Some(6)
        );
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert!(config.db_dir.is_none());
        assert!(config.reporting.is_none());
    }
}
