use crate::clock::Clock;
use crate::notifications::NotificationStore;
use crate::params::ParamsService;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    pub store: Arc<dyn NotificationStore>,

    pub clock: Arc<dyn Clock>,

    /// Current policy parameters, read at the start of every run.
    pub params: Arc<dyn ParamsService>,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        store: Arc<dyn NotificationStore>,
        clock: Arc<dyn Clock>,
        params: Arc<dyn ParamsService>,
    ) -> Self {
        Self {
            cancellation_token,
            store,
            clock,
            params,
        }
    }

    /// Same resources, different cancellation token.
    pub fn with_token(&self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            ..self.clone()
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
