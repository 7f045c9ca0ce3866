//! Receive receipts.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error};

use super::operations::{Operation, OperationQueue};
use crate::clock::Clock;
use crate::notifications::{NotificationError, Result};
use crate::params::ParamsService;
use crate::pipeline::RESERVED_ID_PREFIX;

pub struct ReceiptProcessor {
    queue: OperationQueue,
    params: Arc<dyn ParamsService>,
    clock: Arc<dyn Clock>,
    max_delay_secs: u64,
}

impl ReceiptProcessor {
    pub fn new(
        queue: OperationQueue,
        params: Arc<dyn ParamsService>,
        clock: Arc<dyn Clock>,
        max_delay_secs: u64,
    ) -> Self {
        Self {
            queue,
            params,
            clock,
            max_delay_secs,
        }
    }

    /// Queue a best-effort receipt for `id`.
    ///
    /// The first attempt is delayed by a random jitter so a mass send does
    /// not come back as a burst of receipts. A malformed id fails with
    /// `PermanentReportFailure` and nothing is queued.
    pub fn report_received(&self, id: &str) -> Result<()> {
        if let Err(e) = validate_receipt_id(id) {
            error!("Dropping receive receipt: {}", e);
            return Err(e);
        }
        if !self.params.current().receive_receipts_enabled {
            debug!("Receive receipts disabled, skipping {}", id);
            return Ok(());
        }

        let delay = self.jitter();
        debug!("Receipt for {} queued with {}s delay", id, delay.as_secs());
        self.queue
            .enqueue_delayed(Operation::track_received(id, self.clock.now()), delay);
        Ok(())
    }

    fn jitter(&self) -> Duration {
        if self.max_delay_secs == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs(rand::rng().random_range(0..=self.max_delay_secs))
    }
}

fn validate_receipt_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(NotificationError::PermanentReportFailure(
            "empty notification id".into(),
        ));
    }
    if id.starts_with(RESERVED_ID_PREFIX) || id.chars().any(char::is_control) {
        return Err(NotificationError::PermanentReportFailure(format!(
            "malformed notification id: {:?}",
            id
        )));
    }
    Ok(())
}
