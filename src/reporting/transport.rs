//! Network transport for analytics events and receive receipts.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::operations::Operation;
use crate::notifications::{NotificationError, Result};

/// Delivers operation-shaped reports to a backend.
///
/// Failures are `TransientNetworkFailure` when a later attempt may succeed
/// and `PermanentReportFailure` otherwise.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait ReportTransport: Send + Sync {
    async fn send(&self, operation: &Operation) -> Result<()>;
}

/// Posts reports as JSON to a fixed endpoint.
#[derive(Clone)]
pub struct HttpReportTransport {
    client: Client,
    endpoint: String,
}

impl HttpReportTransport {
    /// # Arguments
    /// * `endpoint` - URL reports are posted to
    /// * `timeout_secs` - Request timeout in seconds
    pub fn new(endpoint: String, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Maps a non-success HTTP status to the failure kind.
pub fn classify_status(status: StatusCode) -> NotificationError {
    let message = format!("report rejected with status {}", status);
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        NotificationError::TransientNetworkFailure(message)
    } else {
        NotificationError::PermanentReportFailure(message)
    }
}

fn classify_request_error(err: reqwest::Error) -> NotificationError {
    if err.is_builder() {
        NotificationError::PermanentReportFailure(err.to_string())
    } else {
        NotificationError::TransientNetworkFailure(err.to_string())
    }
}

#[async_trait]
impl ReportTransport for HttpReportTransport {
    async fn send(&self, operation: &Operation) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(operation)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status.is_success() {
            debug!(
                "Reported {} for {} ({})",
                operation.executor(),
                operation.target_id(),
                status
            );
            Ok(())
        } else {
            Err(classify_status(status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
        ] {
            assert!(classify_status(status).is_retryable(), "{}", status);
        }

        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::NOT_FOUND,
            StatusCode::UNAUTHORIZED,
            StatusCode::UNPROCESSABLE_ENTITY,
        ] {
            assert!(matches!(
                classify_status(status),
                NotificationError::PermanentReportFailure(_)
            ));
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        // Port 9 (discard) on localhost is closed on test machines.
        let transport = HttpReportTransport::new("http://127.0.0.1:9/report".to_string(), 2).unwrap();
        let err = transport
            .send(&Operation::track_received("n1", 0))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_endpoint_is_permanent() {
        let transport = HttpReportTransport::new("not a url".to_string(), 2).unwrap();
        let err = transport
            .send(&Operation::track_received("n1", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::PermanentReportFailure(_)));
    }
}
