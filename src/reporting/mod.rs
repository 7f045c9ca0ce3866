//! Lifecycle reporting: operations, analytics, receive receipts and opens.

mod analytics;
mod opened;
mod operations;
mod receipt;
mod retry_policy;
mod transport;
mod worker;

pub use analytics::{AnalyticsTracker, TrackerCapabilities};
pub use opened::OpenProcessor;
pub use operations::{ExecutorTag, Operation, OperationQueue, OperationReceiver, QueuedOperation};
pub use receipt::ReceiptProcessor;
pub use retry_policy::RetryPolicy;
pub use transport::{classify_status, HttpReportTransport, ReportTransport};
pub use worker::{run_operation, OperationExecutors, OperationResult, OperationWorker};

#[cfg(feature = "mock")]
pub use transport::MockReportTransport;
