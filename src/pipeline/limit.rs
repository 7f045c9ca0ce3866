//! Limit manager: caps the number of visible notifications.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, info, warn};

use super::display::DisplayDispatcher;
use crate::metrics;
use crate::notifications::{
    NotificationError, NotificationRecord, NotificationStore, Predicate, RecordProperty, Result,
};

pub struct LimitManager {
    store: Arc<dyn NotificationStore>,
    display: Arc<DisplayDispatcher>,
    /// Held from the count to the last eviction of one enforcement.
    enforcing: Mutex<()>,
}

impl LimitManager {
    pub fn new(store: Arc<dyn NotificationStore>, display: Arc<DisplayDispatcher>) -> Self {
        Self {
            store,
            display,
            enforcing: Mutex::new(()),
        }
    }

    /// Evict the oldest uninteracted notifications until at most
    /// `max_visible` remain. Returns the evicted ids, oldest first.
    pub fn enforce(&self, max_visible: usize) -> Result<Vec<String>> {
        Ok(self
            .enforce_records(max_visible)?
            .into_iter()
            .map(|record| record.id)
            .collect())
    }

    /// Same as [`enforce`](Self::enforce), returning the evicted records as
    /// they were before eviction.
    ///
    /// Every evicted id has its display cancelled before this returns.
    pub fn enforce_records(&self, max_visible: usize) -> Result<Vec<NotificationRecord>> {
        let _enforcing = self.enforcing.lock().map_err(|_| {
            NotificationError::StorageUnavailable("limit enforcement lock poisoned".to_string())
        })?;

        let visible = Predicate::uninteracted();
        let count = self.store.count(&visible)?;
        if count <= max_visible {
            return Ok(Vec::new());
        }

        let excess = count - max_visible;
        let victims = self
            .store
            .query(visible)
            .with_page_size(excess)
            .iter()
            .take(excess)
            .collect::<Result<Vec<_>>>()?;

        for victim in &victims {
            self.evict(&victim.id)?;
        }

        metrics::record_evictions(victims.len());
        info!(
            "Evicted {} notification(s) to stay within {} visible",
            victims.len(),
            max_visible
        );
        Ok(victims)
    }

    fn evict(&self, id: &str) -> Result<()> {
        let dismissed = self
            .store
            .update(id, &RecordProperty::Dismissed, &Value::Bool(true))
            .and_then(|_| self.store.delete(id));
        match dismissed {
            Ok(()) => debug!("Evicted notification {}", id),
            Err(NotificationError::NotFound(_)) => {
                warn!("Notification {} vanished before eviction", id)
            }
            Err(e) => return Err(e),
        }
        self.display.cancel(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::SqliteNotificationStore;
    use crate::pipeline::display::NotificationDisplayer;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::runtime::Handle;

    #[derive(Default)]
    struct CancelLog(Mutex<Vec<String>>);

    #[async_trait]
    impl NotificationDisplayer for CancelLog {
        async fn display(&self, _record: &NotificationRecord) -> anyhow::Result<()> {
            Ok(())
        }

        fn cancel(&self, id: &str) {
            self.0.lock().unwrap().push(id.to_string());
        }
    }

    fn setup() -> (Arc<SqliteNotificationStore>, Arc<CancelLog>, LimitManager) {
        let store = Arc::new(SqliteNotificationStore::in_memory().unwrap());
        let log = Arc::new(CancelLog::default());
        let display = Arc::new(DisplayDispatcher::new(log.clone(), Handle::current()));
        let manager = LimitManager::new(store.clone(), display);
        (store, log, manager)
    }

    #[tokio::test]
    async fn test_evicts_oldest_over_limit() {
        let (store, log, manager) = setup();
        for (id, t) in [("t0", 0), ("t1", 1), ("t2", 2)] {
            store.insert(&NotificationRecord::new(id, t)).unwrap();
        }

        let evicted = manager.enforce(2).unwrap();

        assert_eq!(evicted, vec!["t0".to_string()]);
        assert!(store.get("t0").unwrap().is_none());
        assert_eq!(store.count(&Predicate::uninteracted()).unwrap(), 2);
        assert_eq!(*log.0.lock().unwrap(), vec!["t0".to_string()]);
    }

    #[tokio::test]
    async fn test_equal_timestamps_evict_in_insertion_order() {
        let (store, _, manager) = setup();
        for id in ["c", "a", "b", "d"] {
            store.insert(&NotificationRecord::new(id, 100)).unwrap();
        }

        let evicted = manager.enforce(1).unwrap();
        assert_eq!(evicted, vec!["c", "a", "b"]);
        assert!(store.get("d").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_interacted_and_summaries_do_not_count() {
        let (store, _, manager) = setup();
        store.insert(&NotificationRecord::new("opened", 0)).unwrap();
        store
            .update("opened", &RecordProperty::Opened, &json!(true))
            .unwrap();
        store
            .insert(&NotificationRecord::summary_for("g", 0))
            .unwrap();
        store.insert(&NotificationRecord::new("a", 1)).unwrap();
        store.insert(&NotificationRecord::new("b", 2)).unwrap();

        assert!(manager.enforce(2).unwrap().is_empty());
        assert_eq!(manager.enforce(1).unwrap(), vec!["a".to_string()]);
        assert!(store.get("opened").unwrap().is_some());
        assert!(store.get("summary:g").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_limit_invariant_holds_for_any_max() {
        for max_visible in 0..6 {
            let (store, _, manager) = setup();
            for i in 0..5 {
                store
                    .insert(&NotificationRecord::new(format!("n{}", i), i % 2))
                    .unwrap();
            }
            let evicted = manager.enforce(max_visible).unwrap();
            let remaining = store.count(&Predicate::uninteracted()).unwrap();
            assert!(remaining <= max_visible);
            assert_eq!(evicted.len(), 5usize.saturating_sub(max_visible));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_enforce_evicts_only_the_oldest() {
        for _ in 0..50 {
            let (store, _, manager) = setup();
            let manager = Arc::new(manager);
            for i in 0..11 {
                store
                    .insert(&NotificationRecord::new(format!("n{:02}", i), i))
                    .unwrap();
            }

            let barrier = Arc::new(std::sync::Barrier::new(2));
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let manager = manager.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        manager.enforce(10).unwrap()
                    })
                })
                .collect();
            let mut evicted: Vec<String> = handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect();
            evicted.sort();

            assert_eq!(evicted, vec!["n00".to_string()]);
            assert_eq!(store.count(&Predicate::uninteracted()).unwrap(), 10);
        }
    }
}
