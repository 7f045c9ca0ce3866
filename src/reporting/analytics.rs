//! Analytics tracker selection.
//!
//! The tracker is chosen once at startup from what the host can do and stays
//! fixed for the life of the process.

use std::sync::Arc;

use tracing::{debug, info};

use super::operations::Operation;
use super::transport::ReportTransport;
use crate::notifications::Result;

/// What the host offers for analytics, probed at startup.
#[derive(Clone, Default)]
pub struct TrackerCapabilities {
    pub transport: Option<Arc<dyn ReportTransport>>,
    /// Host-level opt-out of analytics.
    pub analytics_enabled: bool,
}

#[derive(Clone)]
pub enum AnalyticsTracker {
    /// Events go to the backend through the transport.
    Remote(Arc<dyn ReportTransport>),
    /// Events are accepted and discarded.
    Disabled,
}

impl AnalyticsTracker {
    pub fn select(capabilities: &TrackerCapabilities) -> Self {
        match (&capabilities.transport, capabilities.analytics_enabled) {
            (Some(transport), true) => {
                info!("Analytics tracking enabled");
                AnalyticsTracker::Remote(transport.clone())
            }
            _ => {
                info!("Analytics tracking disabled");
                AnalyticsTracker::Disabled
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AnalyticsTracker::Remote(_) => "remote",
            AnalyticsTracker::Disabled => "disabled",
        }
    }

    pub async fn track(&self, operation: &Operation) -> Result<()> {
        match self {
            AnalyticsTracker::Remote(transport) => transport.send(operation).await,
            AnalyticsTracker::Disabled => {
                debug!(
                    "Analytics disabled, discarding {} for {}",
                    operation.executor(),
                    operation.target_id()
                );
                Ok(())
            }
        }
    }
}
