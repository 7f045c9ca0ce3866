//! Operation execution.
//!
//! The worker drains the operation queue, hands every operation to the
//! executor its tag selects, and retries transient failures with backoff.
//! Operations are discarded after success or final failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::analytics::AnalyticsTracker;
use super::operations::{ExecutorTag, Operation, OperationReceiver, QueuedOperation};
use super::retry_policy::RetryPolicy;
use super::transport::ReportTransport;
use crate::metrics;
use crate::notifications::{NotificationError, NotificationStore, RecordProperty, Result};

/// Handlers for every executor tag.
pub struct OperationExecutors {
    store: Arc<dyn NotificationStore>,
    tracker: AnalyticsTracker,
    receipts: Option<Arc<dyn ReportTransport>>,
    report_timeout: Duration,
}

impl OperationExecutors {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        tracker: AnalyticsTracker,
        receipts: Option<Arc<dyn ReportTransport>>,
        report_timeout: Duration,
    ) -> Self {
        Self {
            store,
            tracker,
            receipts,
            report_timeout,
        }
    }

    /// Apply `operation` once.
    pub async fn execute(&self, operation: &Operation) -> Result<()> {
        match operation.executor() {
            ExecutorTag::UpdateProperty => self.update_property(operation).await,
            ExecutorTag::TrackOpened => self.with_timeout(self.tracker.track(operation)).await,
            ExecutorTag::TrackReceived => match &self.receipts {
                Some(transport) => self.with_timeout(transport.send(operation)).await,
                None => {
                    debug!(
                        "No receipt transport, discarding receipt for {}",
                        operation.target_id()
                    );
                    Ok(())
                }
            },
        }
    }

    async fn update_property(&self, operation: &Operation) -> Result<()> {
        let store = self.store.clone();
        let id = operation.target_id().to_string();
        let property = RecordProperty::from_name(operation.property());
        let value = operation.value().clone();

        tokio::task::spawn_blocking(move || store.update(&id, &property, &value))
            .await
            .map_err(|e| NotificationError::StorageUnavailable(e.to_string()))?
    }

    async fn with_timeout(&self, report: impl Future<Output = Result<()>>) -> Result<()> {
        match tokio::time::timeout(self.report_timeout, report).await {
            Ok(result) => result,
            Err(_) => Err(NotificationError::TransientNetworkFailure(format!(
                "report timed out after {}s",
                self.report_timeout.as_secs()
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    Succeeded,
    /// Failed in a way retrying cannot fix.
    Dropped(NotificationError),
    /// Still failing transiently after the last allowed retry.
    Exhausted(NotificationError),
    Cancelled,
}

/// Run one queued operation to completion: initial delay, attempts, backoff.
pub async fn run_operation(
    executors: &OperationExecutors,
    retry_policy: &RetryPolicy,
    queued: QueuedOperation,
    shutdown: &CancellationToken,
) -> OperationResult {
    let QueuedOperation { operation, delay } = queued;
    let executor = operation.executor().as_str();

    if !delay.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => return OperationResult::Cancelled,
        }
    }

    let mut retries = 0;
    loop {
        match executors.execute(&operation).await {
            Ok(()) => {
                metrics::record_operation(executor, "success");
                debug!("{} for {} done", executor, operation.target_id());
                return OperationResult::Succeeded;
            }
            Err(e) if e.is_benign() => {
                metrics::record_operation(executor, "not_found");
                warn!("{} skipped: {}", executor, e);
                return OperationResult::Dropped(e);
            }
            Err(e) if retry_policy.should_retry(&e, retries) => {
                let backoff = retry_policy.backoff(retries);
                metrics::record_operation(executor, "retry");
                warn!(
                    "{} for {} failed: {}, retry {} in {}s",
                    executor,
                    operation.target_id(),
                    e,
                    retries + 1,
                    backoff.as_secs()
                );
                retries += 1;
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.cancelled() => return OperationResult::Cancelled,
                }
            }
            Err(e) if e.is_retryable() => {
                metrics::record_operation(executor, "exhausted");
                error!(
                    "{} for {} failed after {} retries, giving up: {}",
                    executor,
                    operation.target_id(),
                    retries,
                    e
                );
                return OperationResult::Exhausted(e);
            }
            Err(e) => {
                metrics::record_operation(executor, "dropped");
                error!(
                    "{} for {} failed permanently, dropping: {}",
                    executor,
                    operation.target_id(),
                    e
                );
                return OperationResult::Dropped(e);
            }
        }
    }
}

/// Background consumer of the operation queue.
pub struct OperationWorker {
    receiver: OperationReceiver,
    executors: Arc<OperationExecutors>,
    retry_policy: RetryPolicy,
}

impl OperationWorker {
    pub fn new(
        receiver: OperationReceiver,
        executors: Arc<OperationExecutors>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            receiver,
            executors,
            retry_policy,
        }
    }

    /// Main processing loop - call from a spawned task.
    ///
    /// Each operation runs on its own task so one operation's backoff never
    /// holds up the rest. Returns once the queue is closed and every
    /// operation has finished, or when `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "Operation worker starting (max_retries={}, initial_backoff={}s)",
            self.retry_policy.max_retries, self.retry_policy.initial_backoff_secs
        );

        let mut in_flight = JoinSet::new();
        loop {
            tokio::select! {
                queued = self.receiver.recv() => match queued {
                    Some(queued) => {
                        let executors = self.executors.clone();
                        let retry_policy = self.retry_policy.clone();
                        let shutdown = shutdown.clone();
                        in_flight.spawn(async move {
                            run_operation(&executors, &retry_policy, queued, &shutdown).await
                        });
                    }
                    None => {
                        debug!("Operation queue closed");
                        break;
                    }
                },
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                _ = shutdown.cancelled() => {
                    info!("Operation worker shutting down, {} operation(s) abandoned", in_flight.len());
                    in_flight.abort_all();
                    return;
                }
            }
        }

        loop {
            tokio::select! {
                next = in_flight.join_next() => {
                    if next.is_none() {
                        break;
                    }
                }
                _ = shutdown.cancelled() => {
                    in_flight.abort_all();
                    break;
                }
            }
        }
        info!("Operation worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{NotificationRecord, SqliteNotificationStore};
    use crate::reporting::OperationQueue;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport answering from a script, then succeeding.
    #[derive(Default)]
    struct Scripted {
        script: Mutex<VecDeque<Result<()>>>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn with(script: Vec<Result<()>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ReportTransport for Scripted {
        async fn send(&self, operation: &Operation) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(operation.target_id().to_string());
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    struct Hanging;

    #[async_trait]
    impl ReportTransport for Hanging {
        async fn send(&self, _operation: &Operation) -> Result<()> {
            std::future::pending().await
        }
    }

    fn executors(transport: Arc<dyn ReportTransport>) -> (Arc<SqliteNotificationStore>, OperationExecutors) {
        let store = Arc::new(SqliteNotificationStore::in_memory().unwrap());
        let executors = OperationExecutors::new(
            store.clone(),
            AnalyticsTracker::Remote(transport.clone()),
            Some(transport),
            Duration::from_millis(200),
        );
        (store, executors)
    }

    fn queued(operation: Operation) -> QueuedOperation {
        QueuedOperation {
            operation,
            delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let transport = Scripted::with(vec![
            Err(NotificationError::TransientNetworkFailure("503".into())),
            Err(NotificationError::TransientNetworkFailure("503".into())),
        ]);
        let (_, executors) = executors(transport.clone());

        let result = run_operation(
            &executors,
            &RetryPolicy::immediate(5),
            queued(Operation::track_received("n1", 0)),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result, OperationResult::Succeeded);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let transport = Scripted::with(
            (0..10)
                .map(|_| Err(NotificationError::TransientNetworkFailure("down".into())))
                .collect(),
        );
        let (_, executors) = executors(transport.clone());

        let result = run_operation(
            &executors,
            &RetryPolicy::immediate(2),
            queued(Operation::track_received("n1", 0)),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, OperationResult::Exhausted(_)));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_dropped_without_retry() {
        let transport = Scripted::with(vec![Err(NotificationError::PermanentReportFailure(
            "400".into(),
        ))]);
        let (_, executors) = executors(transport.clone());

        let result = run_operation(
            &executors,
            &RetryPolicy::immediate(5),
            queued(Operation::track_opened("n1", 0)),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            result,
            OperationResult::Dropped(NotificationError::PermanentReportFailure(_))
        ));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_report_timeout_counts_as_transient() {
        let (_, executors) = executors(Arc::new(Hanging));
        let err = executors
            .execute(&Operation::track_received("n1", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::TransientNetworkFailure(_)));
    }

    #[tokio::test]
    async fn test_update_property_executor_writes_store() {
        let (store, executors) = executors(Scripted::with(vec![]));
        store.insert(&NotificationRecord::new("n1", 0)).unwrap();

        executors
            .execute(&Operation::update_property("n1", "opened_at", json!(99), 0))
            .await
            .unwrap();
        assert_eq!(
            store.get("n1").unwrap().unwrap().properties["opened_at"],
            json!(99)
        );

        let result = run_operation(
            &executors,
            &RetryPolicy::immediate(5),
            queued(Operation::update_property("ghost", "opened_at", json!(1), 0)),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(
            result,
            OperationResult::Dropped(NotificationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_during_delay() {
        let transport = Scripted::with(vec![]);
        let (_, executors) = executors(transport.clone());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = run_operation(
            &executors,
            &RetryPolicy::immediate(5),
            QueuedOperation {
                operation: Operation::track_received("n1", 0),
                delay: Duration::from_secs(60),
            },
            &shutdown,
        )
        .await;

        assert_eq!(result, OperationResult::Cancelled);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_worker_drains_queue_until_closed() {
        let transport = Scripted::with(vec![Err(NotificationError::TransientNetworkFailure(
            "blip".into(),
        ))]);
        let (_, executors) = executors(transport.clone());
        let (queue, receiver) = OperationQueue::new();
        let worker = OperationWorker::new(receiver, Arc::new(executors), RetryPolicy::immediate(3));

        queue.enqueue(Operation::track_received("a", 0));
        queue.enqueue(Operation::track_opened("b", 0));
        drop(queue);

        tokio::time::timeout(Duration::from_secs(5), worker.run(CancellationToken::new()))
            .await
            .unwrap();

        // One retry for the first transient failure.
        assert_eq!(transport.calls(), 3);
    }
}
