//! Composition root: builds the service graph once and starts its workers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::background_jobs::{
    create_scheduler,
    jobs::{NotificationCleanupJob, RestoreNotificationsJob},
    HookEvent, JobContext,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, BackgroundJobsSettings, ReportingSettings};
use crate::notifications::{NotificationStore, SqliteNotificationStore};
use crate::params::{PolicyParams, SharedParams};
use crate::pipeline::{
    BadgeUpdater, DisplayDispatcher, GenerationOutcome, GenerationPipeline, GenerationWorker,
    IdLocks, NotificationDisplayer, PayloadSender, RestorationWorkflow, SummaryManager,
};
use crate::reporting::{
    AnalyticsTracker, HttpReportTransport, OpenProcessor, OperationExecutors, OperationQueue,
    OperationReceiver, OperationWorker, ReceiptProcessor, ReportTransport, RetryPolicy,
    TrackerCapabilities,
};

/// External collaborators and settings the graph is built from.
pub struct ServiceDeps {
    pub store: Arc<dyn NotificationStore>,
    pub displayer: Arc<dyn NotificationDisplayer>,
    /// Backend for analytics and receive receipts; none disables both.
    pub transport: Option<Arc<dyn ReportTransport>>,
    pub clock: Arc<dyn Clock>,
    pub policy: PolicyParams,
    pub reporting: ReportingSettings,
    pub background_jobs: BackgroundJobsSettings,
}

pub struct Services {
    pub store: Arc<dyn NotificationStore>,
    pub clock: Arc<dyn Clock>,
    pub params: Arc<SharedParams>,
    pub display: Arc<DisplayDispatcher>,
    pub summaries: Arc<SummaryManager>,
    pub badge: Arc<BadgeUpdater>,
    pub pipeline: Arc<GenerationPipeline>,
    pub restoration: Arc<RestorationWorkflow>,
    pub opens: Arc<OpenProcessor>,
    pub receipts: Arc<ReceiptProcessor>,
    pub queue: OperationQueue,
    executors: Arc<OperationExecutors>,
    retry_policy: RetryPolicy,
    operation_receiver: Option<OperationReceiver>,
    background_jobs: BackgroundJobsSettings,
}

impl Services {
    /// Build the graph. Must be called from within a tokio runtime.
    pub fn new(deps: ServiceDeps) -> Self {
        let ServiceDeps {
            store,
            displayer,
            transport,
            clock,
            policy,
            reporting,
            background_jobs,
        } = deps;

        let params = Arc::new(SharedParams::new(policy));
        let locks = Arc::new(IdLocks::new());
        let display = Arc::new(DisplayDispatcher::new(displayer, Handle::current()));
        let summaries = Arc::new(SummaryManager::new(
            store.clone(),
            display.clone(),
            clock.clone(),
        ));
        let badge = Arc::new(BadgeUpdater::new(store.clone(), display.clone()));
        let (queue, operation_receiver) = OperationQueue::new();

        let receipts = Arc::new(ReceiptProcessor::new(
            queue.clone(),
            params.clone(),
            clock.clone(),
            reporting.receipt_max_delay_secs,
        ));

        let mut pipeline = GenerationPipeline::new(
            store.clone(),
            display.clone(),
            summaries.clone(),
            badge.clone(),
            params.clone(),
            clock.clone(),
            locks.clone(),
        );
        if transport.is_some() {
            pipeline = pipeline.with_receipts(receipts.clone());
        } else {
            info!("No report transport configured, receive receipts disabled");
        }
        let pipeline = Arc::new(pipeline);

        let restoration = Arc::new(RestorationWorkflow::new(
            store.clone(),
            pipeline.clone(),
            params.clone(),
            clock.clone(),
        ));

        let opens = Arc::new(OpenProcessor::new(
            store.clone(),
            queue.clone(),
            display.clone(),
            summaries.clone(),
            badge.clone(),
            locks,
            clock.clone(),
        ));

        let tracker = AnalyticsTracker::select(&TrackerCapabilities {
            transport: transport.clone(),
            analytics_enabled: true,
        });
        let executors = Arc::new(OperationExecutors::new(
            store.clone(),
            tracker,
            transport,
            Duration::from_secs(reporting.timeout_secs),
        ));

        Self {
            store,
            clock,
            params,
            display,
            summaries,
            badge,
            pipeline,
            restoration,
            opens,
            receipts,
            queue,
            executors,
            retry_policy: RetryPolicy::new(&reporting),
            operation_receiver: Some(operation_receiver),
            background_jobs,
        }
    }

    /// Build the graph from resolved configuration: SQLite store under
    /// `db_dir`, HTTP transport when an endpoint is configured, system clock.
    pub fn from_config(config: &AppConfig, displayer: Arc<dyn NotificationDisplayer>) -> Result<Self> {
        let db_path = config.notifications_db_path();
        info!("Opening notification store at {:?}...", db_path);
        let store = Arc::new(
            SqliteNotificationStore::new(&db_path)
                .with_context(|| format!("Failed to open notification store at {:?}", db_path))?,
        );

        let transport: Option<Arc<dyn ReportTransport>> = match &config.reporting.endpoint {
            Some(endpoint) => Some(Arc::new(HttpReportTransport::new(
                endpoint.clone(),
                config.reporting.timeout_secs,
            )?)),
            None => None,
        };

        Ok(Self::new(ServiceDeps {
            store,
            displayer,
            transport,
            clock: Arc::new(SystemClock),
            policy: config.policy.clone(),
            reporting: config.reporting.clone(),
            background_jobs: config.background_jobs.clone(),
        }))
    }

    /// Spawn the operation worker, the job scheduler and the generation
    /// worker. Can only be called once.
    pub fn start(&mut self, shutdown: CancellationToken) -> Result<RunningServices> {
        let Some(receiver) = self.operation_receiver.take() else {
            bail!("Services already started");
        };

        let operation_worker =
            OperationWorker::new(receiver, self.executors.clone(), self.retry_policy.clone());
        let operations = tokio::spawn(operation_worker.run(shutdown.clone()));

        let job_context = JobContext::new(
            shutdown.clone(),
            self.store.clone(),
            self.clock.clone(),
            self.params.clone(),
        );
        let (mut scheduler, hooks) = create_scheduler(shutdown.clone(), job_context);
        scheduler.register_job(Arc::new(RestoreNotificationsJob::new(
            self.restoration.clone(),
        )));
        scheduler.register_job(Arc::new(NotificationCleanupJob::new(
            self.background_jobs.cleanup_interval_hours,
        )));
        let jobs = tokio::spawn(async move { scheduler.run().await });

        let (generation_worker, payloads) = GenerationWorker::new(self.pipeline.clone());
        let generation = tokio::spawn(generation_worker.run(shutdown.clone()));

        info!("Services started");
        Ok(RunningServices {
            payloads,
            params: self.params.clone(),
            hooks,
            shutdown,
            generation,
            operations,
            jobs,
        })
    }

    /// Execute every queued operation, then return.
    ///
    /// For one-shot commands that never call [`start`](Self::start).
    /// Consumes the graph so that every queue sender is dropped and the
    /// worker sees the end of the queue.
    pub async fn flush_operations(mut self) {
        let Some(receiver) = self.operation_receiver.take() else {
            warn!("Operation worker already running, nothing to flush");
            return;
        };
        let worker = OperationWorker::new(receiver, self.executors.clone(), self.retry_policy.clone());
        drop(self);
        worker.run(CancellationToken::new()).await;
    }
}

/// Handles to the running workers.
pub struct RunningServices {
    /// Where push receivers hand over inbound payloads.
    pub payloads: PayloadSender,
    params: Arc<SharedParams>,
    hooks: mpsc::Sender<HookEvent>,
    shutdown: CancellationToken,
    generation: JoinHandle<Vec<GenerationOutcome>>,
    operations: JoinHandle<()>,
    jobs: JoinHandle<()>,
}

impl RunningServices {
    /// Swap in new policy parameters and let hook jobs react to them.
    pub async fn replace_params(&self, policy: PolicyParams) {
        self.params.replace(policy);
        if self.hooks.send(HookEvent::OnParamsChanged).await.is_err() {
            warn!("Job scheduler stopped, parameter change not announced");
        }
    }

    /// Stop accepting payloads, process the ones already queued, then
    /// cancel the remaining workers and wait for them.
    pub async fn shutdown(self) -> Vec<GenerationOutcome> {
        let RunningServices {
            payloads,
            shutdown,
            hooks,
            generation,
            operations,
            jobs,
            ..
        } = self;

        drop(payloads);
        drop(hooks);
        let outcomes = generation.await.unwrap_or_else(|e| {
            warn!("Generation worker ended abnormally: {}", e);
            Vec::new()
        });

        shutdown.cancel();
        if let Err(e) = operations.await {
            warn!("Operation worker ended abnormally: {}", e);
        }
        if let Err(e) = jobs.await {
            warn!("Job scheduler ended abnormally: {}", e);
        }
        info!("Services stopped");
        outcomes
    }
}
