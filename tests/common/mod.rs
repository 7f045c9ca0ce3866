//! Common test infrastructure
//!
//! Wires the full service graph against a temporary SQLite store, a
//! recording display collaborator, a scripted report transport and a manual
//! clock. Tests should only import from this module.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pushcore::config::{BackgroundJobsSettings, ReportingSettings};
use pushcore::notifications::{NotificationError, NotificationRecord, SqliteNotificationStore};
use pushcore::pipeline::{NotificationDisplayer, RawPayload};
use pushcore::reporting::{ExecutorTag, Operation, ReportTransport};
use pushcore::{ManualClock, ParamsService, PolicyParams, ServiceDeps, Services};
use serde_json::json;
use tempfile::TempDir;

/// Seconds since epoch every harness starts at.
pub const T0: i64 = 1_700_000_000;

#[derive(Default)]
pub struct RecordingDisplayer {
    displayed: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
    badge: AtomicUsize,
}

impl RecordingDisplayer {
    pub fn displayed(&self) -> Vec<String> {
        self.displayed.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn display_count(&self, id: &str) -> usize {
        self.displayed().iter().filter(|d| *d == id).count()
    }

    pub fn badge(&self) -> usize {
        self.badge.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationDisplayer for RecordingDisplayer {
    async fn display(&self, record: &NotificationRecord) -> anyhow::Result<()> {
        self.displayed.lock().unwrap().push(record.id.clone());
        Ok(())
    }

    fn cancel(&self, id: &str) {
        self.cancelled.lock().unwrap().push(id.to_string());
    }

    fn set_badge_count(&self, count: usize) {
        self.badge.store(count, Ordering::SeqCst);
    }
}

/// Transport answering from a script, then succeeding.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<(), NotificationError>>>,
    attempts: Mutex<Vec<(ExecutorTag, String)>>,
}

impl ScriptedTransport {
    pub fn push_failure(&self, error: NotificationError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn attempts(&self) -> Vec<(ExecutorTag, String)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, tag: ExecutorTag) -> Vec<String> {
        self.attempts()
            .into_iter()
            .filter(|(t, _)| *t == tag)
            .map(|(_, id)| id)
            .collect()
    }
}

#[async_trait]
impl ReportTransport for ScriptedTransport {
    async fn send(&self, operation: &Operation) -> Result<(), NotificationError> {
        self.attempts
            .lock()
            .unwrap()
            .push((operation.executor(), operation.target_id().to_string()));
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

pub struct TestHarness {
    pub services: Services,
    pub displayer: Arc<RecordingDisplayer>,
    pub transport: Arc<ScriptedTransport>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<SqliteNotificationStore>,
    pub dir: TempDir,
}

impl TestHarness {
    pub fn new(policy: PolicyParams) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteNotificationStore::new(dir.path().join("notifications.db")).unwrap());
        Self::with_store(policy, store, dir)
    }

    /// Build a second service graph over an existing database, as after a restart.
    pub fn with_store(policy: PolicyParams, store: Arc<SqliteNotificationStore>, dir: TempDir) -> Self {
        let displayer = Arc::new(RecordingDisplayer::default());
        let transport = Arc::new(ScriptedTransport::default());
        let clock = Arc::new(ManualClock::new(T0));

        let services = Services::new(ServiceDeps {
            store: store.clone(),
            displayer: displayer.clone(),
            transport: Some(transport.clone()),
            clock: clock.clone(),
            policy,
            reporting: ReportingSettings {
                max_retries: 3,
                initial_backoff_secs: 0,
                max_backoff_secs: 0,
                receipt_max_delay_secs: 0,
                ..ReportingSettings::default()
            },
            background_jobs: BackgroundJobsSettings::default(),
        });

        Self {
            services,
            displayer,
            transport,
            clock,
            store,
            dir,
        }
    }

    /// Simulate a process restart: same database, fresh services.
    pub fn restart(self) -> Self {
        let policy = self.services.params.current();
        let TestHarness {
            services, store, dir, ..
        } = self;
        drop(services);
        drop(store);
        let reopened =
            Arc::new(SqliteNotificationStore::new(dir.path().join("notifications.db")).unwrap());
        Self::with_store(policy, reopened, dir)
    }

    /// Ingest a titled payload with `id` at the current clock time.
    pub fn ingest(&self, id: &str) -> pushcore::pipeline::GenerationOutcome {
        self.services.pipeline.ingest(&payload(id))
    }
}

pub fn payload(id: &str) -> RawPayload {
    RawPayload::default()
        .with("id", json!(id))
        .with("title", json!(format!("Title {}", id)))
        .with("alert", json!("Body"))
}

/// Let spawned display tasks run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
}
