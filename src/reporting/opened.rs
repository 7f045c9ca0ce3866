//! User interaction handling: opens and dismissals.

use std::sync::{Arc, PoisonError};

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::operations::{Operation, OperationQueue};
use crate::clock::Clock;
use crate::notifications::{
    NotificationError, NotificationStore, RecordProperty, Result,
};
use crate::pipeline::{BadgeUpdater, DisplayDispatcher, IdLocks, SummaryManager};

pub struct OpenProcessor {
    store: Arc<dyn NotificationStore>,
    queue: OperationQueue,
    display: Arc<DisplayDispatcher>,
    summaries: Arc<SummaryManager>,
    badge: Arc<BadgeUpdater>,
    locks: Arc<IdLocks>,
    clock: Arc<dyn Clock>,
}

impl OpenProcessor {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        queue: OperationQueue,
        display: Arc<DisplayDispatcher>,
        summaries: Arc<SummaryManager>,
        badge: Arc<BadgeUpdater>,
        locks: Arc<IdLocks>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            queue,
            display,
            summaries,
            badge,
            locks,
            clock,
        }
    }

    /// Mark `id` opened and queue the open for analytics.
    ///
    /// The store write and the analytics report are independent: a failed
    /// write still reports the open, and a failed report never reverts the
    /// flag. An unknown id is not an error.
    pub fn report_open(&self, id: &str) -> Result<()> {
        let now = self.clock.now();
        let stored = self.with_id_lock(id, || {
            let group = self.store.get(id)?.and_then(|record| record.group_id);
            self.store
                .update(id, &RecordProperty::Opened, &Value::Bool(true))?;
            Ok(group)
        });

        self.queue.enqueue(Operation::track_opened(id, now));

        let group = match stored {
            Ok(group) => group,
            Err(NotificationError::NotFound(_)) => {
                warn!("Opened notification {} is not stored", id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        self.queue.enqueue(Operation::update_property(
            id,
            "opened_at",
            json!(now),
            now,
        ));
        self.display.cancel(id);
        debug!("Notification {} opened", id);
        self.after_interaction(group.as_deref());
        Ok(())
    }

    /// Mark `id` dismissed, delete it and withdraw its display.
    pub fn report_dismissed(&self, id: &str) -> Result<()> {
        let removed = self.with_id_lock(id, || {
            let group = self.store.get(id)?.and_then(|record| record.group_id);
            self.store
                .update(id, &RecordProperty::Dismissed, &Value::Bool(true))?;
            self.store.delete(id)?;
            Ok(group)
        });
        self.display.cancel(id);

        let group = match removed {
            Ok(group) => group,
            Err(NotificationError::NotFound(_)) => {
                warn!("Dismissed notification {} is not stored", id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        debug!("Notification {} dismissed", id);
        self.after_interaction(group.as_deref());
        Ok(())
    }

    fn with_id_lock<T>(&self, id: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    fn after_interaction(&self, group: Option<&str>) {
        if let Some(group) = group {
            if let Err(e) = self.summaries.refresh(group) {
                warn!("Failed to refresh summary of group {}: {}", group, e);
            }
        }
        if let Err(e) = self.badge.refresh() {
            warn!("Failed to refresh badge count: {}", e);
        }
    }
}
