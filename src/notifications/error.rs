//! Error taxonomy shared by every notification pipeline stage.

use thiserror::Error;

/// Errors produced by the store, the pipeline stages and the reporters.
///
/// All variants carry a human readable message so a pipeline state can keep
/// its failure reason around after the error itself has been handled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    /// Malformed inbound payload. Never retried, never persisted.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Insert of an id that is already stored.
    #[error("Notification already stored: {0}")]
    DuplicateId(String),

    /// Lookup or mutation of an id that is not stored (possibly evicted concurrently).
    #[error("Notification not found: {0}")]
    NotFound(String),

    /// Typed update rejected because the value does not fit the property.
    #[error("Invalid value for property {property}: {reason}")]
    InvalidProperty { property: String, reason: String },

    /// Backing storage could not serve the request.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Network report failed in a way that may succeed later.
    #[error("Transient network failure: {0}")]
    TransientNetworkFailure(String),

    /// Network report rejected for good.
    #[error("Permanent report failure: {0}")]
    PermanentReportFailure(String),
}

impl NotificationError {
    /// Returns true if repeating the failed action later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NotificationError::TransientNetworkFailure(_) | NotificationError::StorageUnavailable(_)
        )
    }

    /// Stable label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationError::InvalidPayload(_) => "invalid_payload",
            NotificationError::DuplicateId(_) => "duplicate_id",
            NotificationError::NotFound(_) => "not_found",
            NotificationError::InvalidProperty { .. } => "invalid_property",
            NotificationError::StorageUnavailable(_) => "storage_unavailable",
            NotificationError::TransientNetworkFailure(_) => "transient_network_failure",
            NotificationError::PermanentReportFailure(_) => "permanent_report_failure",
        }
    }

    /// NotFound is an expected race (record already evicted or dismissed).
    pub fn is_benign(&self) -> bool {
        matches!(self, NotificationError::NotFound(_))
    }
}

impl From<rusqlite::Error> for NotificationError {
    fn from(err: rusqlite::Error) -> Self {
        NotificationError::StorageUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for NotificationError {
    fn from(err: serde_json::Error) -> Self {
        NotificationError::StorageUnavailable(format!("corrupt properties: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, NotificationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_kinds_are_retryable() {
        assert!(NotificationError::TransientNetworkFailure("timeout".into()).is_retryable());
        assert!(NotificationError::StorageUnavailable("locked".into()).is_retryable());

        assert!(!NotificationError::InvalidPayload("no id".into()).is_retryable());
        assert!(!NotificationError::PermanentReportFailure("400".into()).is_retryable());
        assert!(!NotificationError::NotFound("n1".into()).is_retryable());
        assert!(!NotificationError::DuplicateId("n1".into()).is_retryable());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(NotificationError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(
            NotificationError::InvalidProperty {
                property: "opened".into(),
                reason: "expected bool".into()
            }
            .kind(),
            "invalid_property"
        );
    }

    #[test]
    fn test_sqlite_error_maps_to_storage_unavailable() {
        let err: NotificationError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, NotificationError::StorageUnavailable(_)));
    }
}
