//! Notification records, the filter engine and durable storage.

mod error;
mod filter;
mod models;
mod schema;
mod store;

pub use error::{NotificationError, Result};
pub use filter::{build_restoration_predicate, Clause, Predicate, DEFAULT_RETENTION_WINDOW_SECS};
pub use models::{summary_id, NotificationRecord, Properties, RecordProperty};
pub use schema::NOTIFICATION_VERSIONED_SCHEMAS;
pub use store::{
    NotificationStore, QueryCursor, RecordIter, RecordQuery, SqliteNotificationStore,
    DEFAULT_PAGE_SIZE,
};

#[cfg(feature = "mock")]
pub use store::MockNotificationStore;
