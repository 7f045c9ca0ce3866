//! Specific background job implementations.

pub mod notification_cleanup;
pub mod restore_notifications;

pub use notification_cleanup::NotificationCleanupJob;
pub use restore_notifications::RestoreNotificationsJob;
