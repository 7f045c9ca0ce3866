//! Retention cleanup of stored notifications.
//!
//! Records older than the retention window can never be restored again, so
//! they are deleted together with their properties.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior},
};
use std::time::Duration;
use tracing::info;

pub struct NotificationCleanupJob {
    interval: Duration,
}

impl NotificationCleanupJob {
    pub fn new(interval_hours: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval_hours * 60 * 60),
        }
    }
}

impl BackgroundJob for NotificationCleanupJob {
    fn id(&self) -> &'static str {
        "notification_cleanup"
    }

    fn name(&self) -> &'static str {
        "Notification Cleanup"
    }

    fn description(&self) -> &'static str {
        "Delete notifications older than the retention window"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(self.interval)
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let retention = ctx.params.current().retention_window_secs;
        let cutoff = ctx.clock.now() - retention;

        info!(
            "Cleaning up notifications older than {}s (cutoff: {})",
            retention, cutoff
        );

        let deleted = ctx
            .store
            .delete_created_before(cutoff)
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        if deleted > 0 {
            info!("Deleted {} expired notification(s)", deleted);
        } else {
            info!("No notifications to clean up");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notifications::{NotificationRecord, NotificationStore, SqliteNotificationStore};
    use crate::params::{PolicyParams, StaticParams};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    const NOW: i64 = 1_700_000_000;

    fn context(store: Arc<SqliteNotificationStore>, token: CancellationToken) -> JobContext {
        JobContext::new(
            token,
            store,
            Arc::new(ManualClock::new(NOW)),
            Arc::new(StaticParams(PolicyParams {
                retention_window_secs: 3_600,
                ..PolicyParams::default()
            })),
        )
    }

    #[test]
    fn test_job_metadata() {
        let job = NotificationCleanupJob::new(24);
        assert_eq!(job.id(), "notification_cleanup");
        match job.schedule() {
            JobSchedule::Interval(duration) => {
                assert_eq!(duration, Duration::from_secs(24 * 60 * 60));
            }
            _ => panic!("Expected Interval schedule"),
        }
    }

    #[test]
    fn test_deletes_only_records_outside_window() {
        let store = Arc::new(SqliteNotificationStore::in_memory().unwrap());
        store.insert(&NotificationRecord::new("old", NOW - 7_200)).unwrap();
        store.insert(&NotificationRecord::new("recent", NOW - 60)).unwrap();

        let job = NotificationCleanupJob::new(24);
        job.execute(&context(store.clone(), CancellationToken::new()))
            .unwrap();

        assert!(store.get("old").unwrap().is_none());
        assert!(store.get("recent").unwrap().is_some());
    }

    #[test]
    fn test_cancelled_before_start() {
        let store = Arc::new(SqliteNotificationStore::in_memory().unwrap());
        store.insert(&NotificationRecord::new("old", NOW - 7_200)).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result = NotificationCleanupJob::new(24).execute(&context(store.clone(), token));
        assert!(matches!(result, Err(JobError::Cancelled)));
        assert!(store.get("old").unwrap().is_some());
    }
}
