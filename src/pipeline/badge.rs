//! Application badge count.

use std::sync::Arc;

use super::display::DisplayDispatcher;
use crate::metrics;
use crate::notifications::{NotificationStore, Predicate, Result};

pub struct BadgeUpdater {
    store: Arc<dyn NotificationStore>,
    display: Arc<DisplayDispatcher>,
}

impl BadgeUpdater {
    pub fn new(store: Arc<dyn NotificationStore>, display: Arc<DisplayDispatcher>) -> Self {
        Self { store, display }
    }

    /// Push the number of visible notifications to the display collaborator.
    pub fn refresh(&self) -> Result<usize> {
        let count = self.store.count(&Predicate::uninteracted())?;
        self.display.set_badge_count(count);
        metrics::set_visible_notifications(count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{NotificationRecord, SqliteNotificationStore};
    use crate::pipeline::display::NotificationDisplayer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::runtime::Handle;

    #[derive(Default)]
    struct Badge(AtomicUsize);

    #[async_trait]
    impl NotificationDisplayer for Badge {
        async fn display(&self, _record: &NotificationRecord) -> anyhow::Result<()> {
            Ok(())
        }

        fn cancel(&self, _id: &str) {}

        fn set_badge_count(&self, count: usize) {
            self.0.store(count, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_badge_counts_visible_notifications() {
        let store = Arc::new(SqliteNotificationStore::in_memory().unwrap());
        let badge = Arc::new(Badge::default());
        let display = Arc::new(DisplayDispatcher::new(badge.clone(), Handle::current()));
        let updater = BadgeUpdater::new(store.clone(), display);

        store.insert(&NotificationRecord::new("a", 1)).unwrap();
        store.insert(&NotificationRecord::new("b", 2)).unwrap();
        store
            .insert(&NotificationRecord::summary_for("g", 3))
            .unwrap();

        assert_eq!(updater.refresh().unwrap(), 2);
        assert_eq!(badge.0.load(Ordering::SeqCst), 2);
    }
}
