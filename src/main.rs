use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pushcore::config::{AppConfig, CliConfig, FileConfig};
use pushcore::metrics;
use pushcore::notifications::{
    NotificationRecord, NotificationStore, Predicate, DEFAULT_RETENTION_WINDOW_SECS,
};
use pushcore::params::DEFAULT_MAX_VISIBLE;
use pushcore::pipeline::{NotificationDisplayer, RawPayload};
use pushcore::Services;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding the notification database.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Path to a TOML config file. Its values override the CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Maximum number of visible notifications.
    #[clap(long, default_value_t = DEFAULT_MAX_VISIBLE)]
    pub max_visible: usize,

    /// Only notifications created within this window are restored.
    #[clap(long, default_value_t = DEFAULT_RETENTION_WINDOW_SECS)]
    pub retention_window_secs: i64,

    /// Backend URL for analytics and receive receipts.
    #[clap(long)]
    pub report_endpoint: Option<String>,

    /// Timeout in seconds for report requests.
    #[clap(long, default_value_t = 30)]
    pub report_timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest payloads from a JSON file (one object, or one per line). `-` reads stdin.
    Ingest { input: String },
    /// Re-display pending notifications, as done at startup.
    Restore,
    /// Report that the user opened a notification.
    Open { id: String },
    /// Report that the user dismissed a notification.
    Dismiss { id: String },
    /// Print stored notifications as JSON lines.
    List {
        /// Include opened, dismissed and summary records.
        #[clap(long)]
        all: bool,
    },
    /// Start workers and background jobs, ingesting JSON lines from stdin until EOF or Ctrl-C.
    Run,
    /// Print the metrics of this process in Prometheus text format.
    Metrics,
}

/// Displays notifications by logging them.
struct LogDisplayer;

#[async_trait]
impl NotificationDisplayer for LogDisplayer {
    async fn display(&self, record: &NotificationRecord) -> Result<()> {
        info!(
            "[display] {} {:?}: {}",
            record.id,
            record.title().unwrap_or_default(),
            record.body().unwrap_or_default()
        );
        Ok(())
    }

    fn cancel(&self, id: &str) {
        info!("[cancel] {}", id);
    }

    fn set_badge_count(&self, count: usize) {
        info!("[badge] {}", count);
    }
}

fn parse_payloads(content: &str) -> Vec<Result<RawPayload, String>> {
    if let Ok(payload) = serde_json::from_str::<RawPayload>(content) {
        return vec![Ok(payload)];
    }
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| RawPayload::from_json_str(line).map_err(|e| e.to_string()))
        .collect()
}

async fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut content = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut tokio::io::stdin(), &mut content).await?;
        Ok(content)
    } else {
        tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("Failed to read {}", input))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        max_visible: cli_args.max_visible,
        retention_window_secs: cli_args.retention_window_secs,
        report_endpoint: cli_args.report_endpoint.clone(),
        report_timeout_secs: cli_args.report_timeout_secs,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    metrics::init_metrics();
    let mut services = Services::from_config(&config, Arc::new(LogDisplayer))?;

    match cli_args.command {
        Command::Ingest { input } => {
            let content = read_input(&input).await?;
            for parsed in parse_payloads(&content) {
                match parsed {
                    Ok(payload) => {
                        let outcome = services.pipeline.ingest(&payload);
                        println!(
                            "{}\t{}",
                            outcome.id.as_deref().unwrap_or("-"),
                            outcome.disposition.as_str()
                        );
                    }
                    Err(e) => warn!("Skipping unparsable payload: {}", e),
                }
            }
            tokio::task::yield_now().await;
            services.flush_operations().await;
        }
        Command::Restore => {
            let report = services.restoration.restore_current();
            for id in &report.displayed {
                println!("{}", id);
            }
            if let Some(e) = report.degraded {
                warn!("Restoration degraded: {}", e);
            }
            tokio::task::yield_now().await;
        }
        Command::Open { id } => {
            services.opens.report_open(&id)?;
            services.flush_operations().await;
        }
        Command::Dismiss { id } => {
            services.opens.report_dismissed(&id)?;
            services.flush_operations().await;
        }
        Command::List { all } => {
            let predicate = if all {
                Predicate::all()
            } else {
                Predicate::uninteracted()
            };
            let store: &dyn NotificationStore = services.store.as_ref();
            for record in store.query(predicate).iter() {
                println!("{}", serde_json::to_string(&record?)?);
            }
        }
        Command::Run => {
            let shutdown = CancellationToken::new();
            let running = services.start(shutdown.clone())?;

            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => match line? {
                        Some(line) if line.trim().is_empty() => {}
                        Some(line) => match RawPayload::from_json_str(&line) {
                            Ok(payload) => {
                                if !running.payloads.submit(payload) {
                                    break;
                                }
                            }
                            Err(e) => warn!("Skipping unparsable payload: {}", e),
                        },
                        None => {
                            info!("Input closed");
                            break;
                        }
                    },
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received Ctrl-C, shutting down");
                        shutdown.cancel();
                        break;
                    }
                }
            }

            let outcomes = running.shutdown().await;
            info!("Processed {} payload(s)", outcomes.len());
            eprint!("{}", metrics::gather_text());
        }
        Command::Metrics => {
            print!("{}", metrics::gather_text());
        }
    }

    Ok(())
}
