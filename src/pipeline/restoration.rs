//! Restoration of notifications after a process restart.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::generation::{Disposition, GenerationPipeline};
use crate::clock::Clock;
use crate::metrics;
use crate::notifications::{build_restoration_predicate, NotificationError, NotificationStore};
use crate::params::ParamsService;

/// What one restoration cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreReport {
    /// Records matched by the restoration predicate.
    pub matched: usize,
    /// Ids handed to the display collaborator, in restoration order.
    pub displayed: Vec<String>,
    /// Already shown, stale or evicted on arrival.
    pub skipped: usize,
    pub failed: usize,
    /// Set when the store could not be read; the cycle stopped there.
    pub degraded: Option<NotificationError>,
}

impl RestoreReport {
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

pub struct RestorationWorkflow {
    store: Arc<dyn NotificationStore>,
    pipeline: Arc<GenerationPipeline>,
    params: Arc<dyn ParamsService>,
    clock: Arc<dyn Clock>,
}

impl RestorationWorkflow {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        pipeline: Arc<GenerationPipeline>,
        params: Arc<dyn ParamsService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            pipeline,
            params,
            clock,
        }
    }

    /// Restore with the current parameters and the current time.
    pub fn restore_current(&self) -> RestoreReport {
        let params = self.params.current();
        self.restore(
            self.clock.now(),
            params.retention_window_secs,
            params.restore_ttl_filter,
        )
    }

    /// Re-submit every recent, uninteracted record through the pipeline.
    ///
    /// Never fails: a store read error ends the cycle with what was restored
    /// so far and is reported in [`RestoreReport::degraded`]. Records are
    /// streamed page by page, oldest first, so the newest ones are the last
    /// to pass the visible limit.
    pub fn restore(
        &self,
        now: i64,
        retention_window_secs: i64,
        ttl_policy_enabled: bool,
    ) -> RestoreReport {
        let predicate = build_restoration_predicate(now, retention_window_secs, ttl_policy_enabled);
        let mut report = RestoreReport::default();

        let query = self.store.query(predicate);
        for next in query.iter() {
            let record = match next {
                Ok(record) => record,
                Err(e) => {
                    warn!("Restoration degraded, store unreadable: {}", e);
                    report.degraded = Some(e);
                    break;
                }
            };
            report.matched += 1;

            let outcome = self.pipeline.resubmit(&record);
            match outcome.disposition {
                Disposition::Displayed => report.displayed.push(record.id),
                Disposition::Failed => report.failed += 1,
                other => {
                    debug!("Restoration skipped {}: {}", record.id, other.as_str());
                    report.skipped += 1;
                }
            }
        }

        metrics::record_restored(report.displayed.len());
        info!(
            "Restoration finished: matched={} displayed={} skipped={} failed={}",
            report.matched,
            report.displayed.len(),
            report.skipped,
            report.failed
        );
        report
    }
}
