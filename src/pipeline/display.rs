//! Display dispatch.
//!
//! Display requests are fire-and-forget: the dispatcher spawns the request on
//! the runtime and never reports the result back to the caller. Each request
//! carries a cancellation token so an eviction can withdraw it synchronously.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics;
use crate::notifications::NotificationRecord;

/// OS-facing display collaborator.
#[async_trait]
pub trait NotificationDisplayer: Send + Sync {
    /// Show (or update) the system notification for `record`.
    async fn display(&self, record: &NotificationRecord) -> anyhow::Result<()>;

    /// Withdraw the system notification for `id`, if shown.
    fn cancel(&self, id: &str);

    /// Application badge showing the number of visible notifications.
    fn set_badge_count(&self, _count: usize) {}
}

struct InFlight {
    generation: u64,
    token: CancellationToken,
}

pub struct DisplayDispatcher {
    displayer: Arc<dyn NotificationDisplayer>,
    runtime: Handle,
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
    /// Ids handed to the displayer during this process lifetime.
    requested: Mutex<HashSet<String>>,
    next_generation: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DisplayDispatcher {
    pub fn new(displayer: Arc<dyn NotificationDisplayer>, runtime: Handle) -> Self {
        Self {
            displayer,
            runtime,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            requested: Mutex::new(HashSet::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Issue a display request for `record` and return immediately.
    ///
    /// A pending request for the same id is superseded.
    pub fn request(&self, record: NotificationRecord) {
        let id = record.id.clone();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        if let Some(previous) = lock(&self.in_flight).insert(
            id.clone(),
            InFlight {
                generation,
                token: token.clone(),
            },
        ) {
            previous.token.cancel();
        }
        lock(&self.requested).insert(id.clone());

        let displayer = self.displayer.clone();
        let in_flight = self.in_flight.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Display of {} cancelled before completion", id);
                    metrics::record_display("cancelled");
                }
                result = displayer.display(&record) => match result {
                    Ok(()) => {
                        debug!("Displayed notification {}", id);
                        metrics::record_display("success");
                    }
                    Err(e) => {
                        warn!("Display of notification {} failed: {}", id, e);
                        metrics::record_display("failure");
                    }
                },
            }

            let mut in_flight = lock(&in_flight);
            if in_flight.get(&id).map(|f| f.generation) == Some(generation) {
                in_flight.remove(&id);
            }
        });
    }

    /// Like [`request`](Self::request), unless `record` was already requested
    /// during this process lifetime. Returns whether a request was issued.
    pub fn request_once(&self, record: NotificationRecord) -> bool {
        if self.was_requested(&record.id) {
            return false;
        }
        self.request(record);
        true
    }

    pub fn was_requested(&self, id: &str) -> bool {
        lock(&self.requested).contains(id)
    }

    /// Cancel any outstanding request for `id` and withdraw what is shown.
    /// Completes before returning.
    pub fn cancel(&self, id: &str) {
        if let Some(in_flight) = lock(&self.in_flight).remove(id) {
            in_flight.token.cancel();
        }
        lock(&self.requested).remove(id);
        self.displayer.cancel(id);
    }

    pub fn set_badge_count(&self, count: usize) {
        self.displayer.set_badge_count(count);
    }

    /// Number of display requests not yet completed.
    pub fn pending(&self) -> usize {
        lock(&self.in_flight).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Displayer that blocks every display until released.
    #[derive(Default)]
    struct GatedDisplayer {
        gate: Notify,
        displayed: Mutex<Vec<String>>,
        cancelled: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationDisplayer for GatedDisplayer {
        async fn display(&self, record: &NotificationRecord) -> anyhow::Result<()> {
            self.gate.notified().await;
            self.displayed.lock().unwrap().push(record.id.clone());
            Ok(())
        }

        fn cancel(&self, id: &str) {
            self.cancelled.lock().unwrap().push(id.to_string());
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_cancel_withdraws_pending_request() {
        let displayer = Arc::new(GatedDisplayer::default());
        let dispatcher = DisplayDispatcher::new(displayer.clone(), Handle::current());

        dispatcher.request(NotificationRecord::new("n1", 0));
        settle().await;
        assert_eq!(dispatcher.pending(), 1);

        dispatcher.cancel("n1");
        assert_eq!(dispatcher.pending(), 0);
        assert_eq!(*displayer.cancelled.lock().unwrap(), vec!["n1".to_string()]);

        displayer.gate.notify_waiters();
        settle().await;
        assert!(displayer.displayed.lock().unwrap().is_empty());
        assert!(!dispatcher.was_requested("n1"));
    }

    #[tokio::test]
    async fn test_request_completes_and_clears_in_flight() {
        let displayer = Arc::new(GatedDisplayer::default());
        let dispatcher = DisplayDispatcher::new(displayer.clone(), Handle::current());

        dispatcher.request(NotificationRecord::new("n1", 0));
        settle().await;
        displayer.gate.notify_one();

        tokio::time::timeout(Duration::from_secs(1), async {
            while dispatcher.pending() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(*displayer.displayed.lock().unwrap(), vec!["n1".to_string()]);
        assert!(dispatcher.was_requested("n1"));
    }

    #[tokio::test]
    async fn test_request_once_skips_already_requested_ids() {
        let displayer = Arc::new(GatedDisplayer::default());
        let dispatcher = DisplayDispatcher::new(displayer, Handle::current());

        assert!(dispatcher.request_once(NotificationRecord::new("n1", 0)));
        assert!(!dispatcher.request_once(NotificationRecord::new("n1", 0)));
        assert!(dispatcher.request_once(NotificationRecord::new("n2", 0)));
    }
}
