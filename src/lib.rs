//! Pushcore: the notification side of a push-messaging client.
//!
//! Inbound payloads are bundled, persisted, limited and displayed by the
//! generation pipeline; pending notifications are restored after a restart;
//! opens and receipts are reported back through a retrying operation queue.

pub mod background_jobs;
pub mod clock;
pub mod config;
pub mod metrics;
pub mod notifications;
pub mod params;
pub mod pipeline;
pub mod reporting;
pub mod services;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use notifications::{
    NotificationError, NotificationRecord, NotificationStore, SqliteNotificationStore,
};
pub use params::{ParamsService, PolicyParams, SharedParams, StaticParams};
pub use pipeline::{GenerationPipeline, NotificationDisplayer, RawPayload, RestorationWorkflow};
pub use services::{RunningServices, ServiceDeps, Services};
