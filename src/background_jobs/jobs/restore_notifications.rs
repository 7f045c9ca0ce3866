//! Startup restoration of pending notifications.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior},
};
use crate::pipeline::RestorationWorkflow;
use std::sync::Arc;
use tracing::{info, warn};

/// Re-displays recent notifications the user has not interacted with yet.
///
/// Runs once per process start and again whenever the policy parameters
/// change. Re-runs never display an id twice. A degraded cycle (store unreadable) is
/// logged and retried on the next start, never reported as a job failure.
pub struct RestoreNotificationsJob {
    workflow: Arc<RestorationWorkflow>,
}

impl RestoreNotificationsJob {
    pub fn new(workflow: Arc<RestorationWorkflow>) -> Self {
        Self { workflow }
    }
}

impl BackgroundJob for RestoreNotificationsJob {
    fn id(&self) -> &'static str {
        "restore_notifications"
    }

    fn name(&self) -> &'static str {
        "Restore Notifications"
    }

    fn description(&self) -> &'static str {
        "Re-display pending notifications after a restart"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Combined {
            interval: None,
            hooks: vec![HookEvent::OnStartup, HookEvent::OnParamsChanged],
        }
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        // Every step is idempotent; a cut-short run resumes on the next start.
        ShutdownBehavior::Cancellable
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let params = ctx.params.current();
        let report = self.workflow.restore(
            ctx.clock.now(),
            params.retention_window_secs,
            params.restore_ttl_filter,
        );

        if let Some(e) = &report.degraded {
            warn!("Restoration skipped this cycle: {}", e);
        } else {
            info!("Restored {} notification(s)", report.displayed.len());
        }
        Ok(())
    }
}
