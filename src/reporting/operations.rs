//! Deferred state changes.
//!
//! An [`Operation`] is an immutable intent: it names a target, a property and
//! a value, plus the [`ExecutorTag`] of the handler that applies it. Nothing
//! happens until an executor picks it up from the [`OperationQueue`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorTag {
    /// Write a property of a stored notification.
    UpdateProperty,
    /// Report an open to analytics.
    TrackOpened,
    /// Send a receive receipt.
    TrackReceived,
}

impl ExecutorTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorTag::UpdateProperty => "update_property",
            ExecutorTag::TrackOpened => "track_opened",
            ExecutorTag::TrackReceived => "track_received",
        }
    }
}

impl std::fmt::Display for ExecutorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    operation_id: String,
    executor: ExecutorTag,
    target_id: String,
    property: String,
    value: Value,
    created_at: i64,
}

impl Operation {
    pub fn new(
        executor: ExecutorTag,
        target_id: impl Into<String>,
        property: impl Into<String>,
        value: Value,
        created_at: i64,
    ) -> Self {
        Self {
            operation_id: uuid::Uuid::new_v4().to_string(),
            executor,
            target_id: target_id.into(),
            property: property.into(),
            value,
            created_at,
        }
    }

    pub fn update_property(
        target_id: impl Into<String>,
        property: impl Into<String>,
        value: Value,
        created_at: i64,
    ) -> Self {
        Self::new(
            ExecutorTag::UpdateProperty,
            target_id,
            property,
            value,
            created_at,
        )
    }

    pub fn track_opened(target_id: impl Into<String>, opened_at: i64) -> Self {
        Self::new(
            ExecutorTag::TrackOpened,
            target_id,
            "opened",
            Value::Bool(true),
            opened_at,
        )
    }

    pub fn track_received(target_id: impl Into<String>, received_at: i64) -> Self {
        Self::new(
            ExecutorTag::TrackReceived,
            target_id,
            "received",
            Value::Bool(true),
            received_at,
        )
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn executor(&self) -> ExecutorTag {
        self.executor
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }
}

/// An operation waiting in the queue, with the delay before its first attempt.
#[derive(Debug, Clone)]
pub struct QueuedOperation {
    pub operation: Operation,
    pub delay: Duration,
}

pub type OperationReceiver = mpsc::UnboundedReceiver<QueuedOperation>;

/// Sending side of the operation queue. Cheap to clone.
#[derive(Clone)]
pub struct OperationQueue {
    tx: mpsc::UnboundedSender<QueuedOperation>,
}

impl OperationQueue {
    pub fn new() -> (Self, OperationReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue `operation` for execution. Returns false if no worker is
    /// listening anymore.
    pub fn enqueue(&self, operation: Operation) -> bool {
        self.enqueue_delayed(operation, Duration::ZERO)
    }

    pub fn enqueue_delayed(&self, operation: Operation, delay: Duration) -> bool {
        match self.tx.send(QueuedOperation { operation, delay }) {
            Ok(()) => true,
            Err(mpsc::error::SendError(queued)) => {
                warn!(
                    "Operation queue closed, dropping {} for {}",
                    queued.operation.executor(),
                    queued.operation.target_id()
                );
                false
            }
        }
    }
}
