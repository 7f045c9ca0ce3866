use super::context::JobContext;
use super::job::{BackgroundJob, HookEvent, JobError, ShutdownBehavior};
use crate::metrics;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default wake-up interval when no job is due sooner.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound on how long shutdown waits for a running job.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Runs registered jobs on their interval and in response to hook events.
pub struct JobScheduler {
    jobs: HashMap<&'static str, Arc<dyn BackgroundJob>>,

    /// Currently running jobs with their task handles.
    running_handles: HashMap<&'static str, JoinHandle<()>>,

    /// Cancellation tokens for each running job.
    job_cancel_tokens: HashMap<&'static str, CancellationToken>,

    /// Next due time of every interval job.
    next_runs: HashMap<&'static str, Instant>,

    /// Jobs hooked while already running; they run again once finished.
    rerun_pending: HashSet<&'static str>,

    /// Every job task sends its id here as its last step.
    finished_sender: mpsc::UnboundedSender<&'static str>,
    finished_receiver: mpsc::UnboundedReceiver<&'static str>,

    hook_receiver: mpsc::Receiver<HookEvent>,

    shutdown_token: CancellationToken,

    job_context: JobContext,
}

impl JobScheduler {
    pub fn new(
        hook_receiver: mpsc::Receiver<HookEvent>,
        shutdown_token: CancellationToken,
        job_context: JobContext,
    ) -> Self {
        let (finished_sender, finished_receiver) = mpsc::unbounded_channel();
        Self {
            jobs: HashMap::new(),
            running_handles: HashMap::new(),
            job_cancel_tokens: HashMap::new(),
            next_runs: HashMap::new(),
            rerun_pending: HashSet::new(),
            finished_sender,
            finished_receiver,
            hook_receiver,
            shutdown_token,
            job_context,
        }
    }

    /// Register a job with the scheduler.
    pub fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        info!("Registering job: {} - {}", job.id(), job.description());
        if job.schedule().interval().is_some() {
            // Interval jobs run once right away, then every interval.
            self.next_runs.insert(job.id(), Instant::now());
        }
        self.jobs.insert(job.id(), job);
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Main scheduler loop.
    pub async fn run(&mut self) {
        info!("Starting job scheduler with {} registered jobs", self.jobs.len());

        self.trigger_jobs_for_hook(HookEvent::OnStartup);

        loop {
            let sleep_duration = self.time_until_next_scheduled_job();
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs();
                }
                Some(event) = self.hook_receiver.recv() => {
                    debug!("Received hook event: {}", event);
                    self.trigger_jobs_for_hook(event);
                }
                Some(job_id) = self.finished_receiver.recv() => {
                    self.on_job_finished(job_id).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    /// A job counts as running until its finish message is processed.
    fn is_running(&self, job_id: &str) -> bool {
        self.running_handles.contains_key(job_id)
    }

    fn time_until_next_scheduled_job(&self) -> Duration {
        let now = Instant::now();
        self.next_runs
            .iter()
            .filter(|(job_id, _)| !self.is_running(job_id))
            .map(|(_, next_run)| next_run.saturating_duration_since(now))
            .fold(IDLE_CHECK_INTERVAL, Duration::min)
    }

    fn run_due_jobs(&mut self) {
        let now = Instant::now();
        let due: Vec<&'static str> = self
            .next_runs
            .iter()
            .filter(|(_, next_run)| **next_run <= now)
            .map(|(job_id, _)| *job_id)
            .filter(|job_id| !self.is_running(job_id))
            .collect();

        for job_id in due {
            if let Err(e) = self.spawn_job(job_id, "schedule") {
                warn!("Could not start job {}: {}", job_id, e);
            }
        }
    }

    /// Trigger all jobs that listen for a specific hook event.
    pub fn trigger_jobs_for_hook(&mut self, event: HookEvent) {
        let listeners: Vec<&'static str> = self
            .jobs
            .values()
            .filter(|job| job.schedule().listens_to(event))
            .map(|job| job.id())
            .collect();

        let trigger = format!("hook:{}", event);
        for job_id in listeners {
            match self.spawn_job(job_id, &trigger) {
                Ok(()) => {}
                Err(JobError::AlreadyRunning) => {
                    debug!("Job {} already running, will run again after it", job_id);
                    self.rerun_pending.insert(job_id);
                }
                Err(e) => warn!("Could not start job {}: {}", job_id, e),
            }
        }
    }

    /// Spawn a job execution task.
    fn spawn_job(&mut self, job_id: &'static str, triggered_by: &str) -> Result<(), JobError> {
        let Some(job) = self.jobs.get(job_id).cloned() else {
            return Err(JobError::ExecutionFailed(format!("unknown job {}", job_id)));
        };
        if self.is_running(job_id) {
            return Err(JobError::AlreadyRunning);
        }

        info!("Starting job: {} (triggered_by: {})", job_id, triggered_by);

        // Set before the run finishes so a slow job never re-triggers itself.
        if let Some(interval) = job.schedule().interval() {
            self.next_runs.insert(job_id, Instant::now() + interval);
        }

        metrics::set_background_job_running(job_id, true);

        let cancel_token = self.job_context.cancellation_token.child_token();
        self.job_cancel_tokens.insert(job_id, cancel_token.clone());
        let ctx = self.job_context.with_token(cancel_token);

        let finished_sender = self.finished_sender.clone();
        let handle = tokio::spawn(async move {
            let start_time = std::time::Instant::now();
            let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
            let elapsed = start_time.elapsed();

            let status_label = match result {
                Ok(Ok(())) => {
                    info!("Job {} completed successfully in {:?}", job_id, elapsed);
                    "success"
                }
                Ok(Err(JobError::Cancelled)) => {
                    info!("Job {} was cancelled after {:?}", job_id, elapsed);
                    "cancelled"
                }
                Ok(Err(e)) => {
                    error!("Job {} failed after {:?}: {}", job_id, elapsed, e);
                    "failed"
                }
                Err(e) => {
                    error!("Job {} panicked after {:?}: {}", job_id, elapsed, e);
                    "panic"
                }
            };

            metrics::record_background_job_execution(job_id, status_label, elapsed);
            metrics::set_background_job_running(job_id, false);
            let _ = finished_sender.send(job_id);
        });

        self.running_handles.insert(job_id, handle);
        Ok(())
    }

    /// Reap a finished job and start it again if a hook arrived meanwhile.
    async fn on_job_finished(&mut self, job_id: &'static str) {
        if let Some(handle) = self.running_handles.remove(job_id) {
            let _ = handle.await;
        }
        self.job_cancel_tokens.remove(job_id);

        if self.rerun_pending.remove(job_id) {
            if let Err(e) = self.spawn_job(job_id, "hook:rerun") {
                warn!("Could not re-run job {}: {}", job_id, e);
            }
        }
    }

    /// Gracefully shut down the scheduler.
    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        for (job_id, token) in &self.job_cancel_tokens {
            let behavior = self
                .jobs
                .get(job_id)
                .map(|job| job.shutdown_behavior())
                .unwrap_or_default();
            if behavior == ShutdownBehavior::Cancellable {
                debug!("Cancelling job: {}", job_id);
                token.cancel();
            }
        }

        for (job_id, handle) in self.running_handles.drain() {
            if handle.is_finished() {
                continue;
            }
            info!("Waiting for job {} to complete...", job_id);
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("Job {} did not finish within {:?}", job_id, SHUTDOWN_GRACE);
            }
        }

        self.job_cancel_tokens.clear();
        info!("Scheduler shutdown complete");
    }
}

/// Create a scheduler and the sender used to fire hook events into it.
pub fn create_scheduler(
    shutdown_token: CancellationToken,
    job_context: JobContext,
) -> (JobScheduler, mpsc::Sender<HookEvent>) {
    let (hook_sender, hook_receiver) = mpsc::channel(16);
    let scheduler = JobScheduler::new(hook_receiver, shutdown_token, job_context);
    (scheduler, hook_sender)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::JobSchedule;
    use crate::clock::ManualClock;
    use crate::notifications::SqliteNotificationStore;
    use crate::params::{PolicyParams, StaticParams};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        id: &'static str,
        schedule: JobSchedule,
        runs: Arc<AtomicUsize>,
    }

    impl BackgroundJob for CountingJob {
        fn id(&self) -> &'static str {
            self.id
        }

        fn name(&self) -> &'static str {
            "Counting"
        }

        fn description(&self) -> &'static str {
            "Counts its runs"
        }

        fn schedule(&self) -> JobSchedule {
            self.schedule.clone()
        }

        fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn context(token: &CancellationToken) -> JobContext {
        JobContext::new(
            token.clone(),
            Arc::new(SqliteNotificationStore::in_memory().unwrap()),
            Arc::new(ManualClock::new(0)),
            Arc::new(StaticParams(PolicyParams::default())),
        )
    }

    fn counting(id: &'static str, schedule: JobSchedule) -> (Arc<CountingJob>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let job = Arc::new(CountingJob {
            id,
            schedule,
            runs: runs.clone(),
        });
        (job, runs)
    }

    #[tokio::test]
    async fn test_startup_hook_once_and_interval_repeats() {
        let shutdown = CancellationToken::new();
        let (mut scheduler, _hooks) = create_scheduler(shutdown.clone(), context(&shutdown));

        let (startup, startup_runs) = counting("startup", JobSchedule::Hook(HookEvent::OnStartup));
        let (periodic, periodic_runs) = counting(
            "periodic",
            JobSchedule::Interval(Duration::from_millis(40)),
        );
        scheduler.register_job(startup);
        scheduler.register_job(periodic);
        assert_eq!(scheduler.job_count(), 2);

        let task = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(startup_runs.load(Ordering::SeqCst), 1);
        assert!(periodic_runs.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_hook_event_triggers_listeners() {
        let shutdown = CancellationToken::new();
        let (mut scheduler, hooks) = create_scheduler(shutdown.clone(), context(&shutdown));

        let (job, runs) = counting(
            "on_params",
            JobSchedule::Combined {
                interval: None,
                hooks: vec![HookEvent::OnParamsChanged],
            },
        );
        scheduler.register_job(job);

        let task = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        hooks.send(HookEvent::OnParamsChanged).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
