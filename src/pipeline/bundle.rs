//! Bundle processor: classifies, validates and deduplicates inbound payloads
//! before anything is persisted.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::clock::Clock;
use crate::notifications::{
    NotificationError, NotificationRecord, NotificationStore, Properties, Result,
};
use crate::params::PolicyParams;

/// Sender of instance-id token refresh messages, which are not notifications.
pub const TOKEN_REFRESH_SENDER: &str = "google.com/iid";

/// Ids with this prefix are reserved for group summaries.
pub const RESERVED_ID_PREFIX: &str = "summary:";

/// Priorities above this value mark a high priority notification.
pub const HIGH_PRIORITY_THRESHOLD: i64 = 9;

// Payload keys consumed by the processor rather than stored as properties.
const KEY_ID: &str = "id";
const KEY_GROUP: &str = "grp";
const KEY_FROM: &str = "from";
const KEY_TTL: &str = "ttl";
const KEY_SENT_TIME: &str = "google.sent_time";
const KEY_PRIORITY: &str = "pri";

/// Raw inbound push message as a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawPayload(pub Properties);

impl RawPayload {
    pub fn from_json_str(s: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(NotificationError::InvalidPayload(format!(
                "expected a JSON object, got {}",
                type_name(&other)
            ))),
            Err(e) => Err(NotificationError::InvalidPayload(e.to_string())),
        }
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.0.insert(key.to_string(), value);
        self
    }

    /// Notification id, if present as a non-empty string.
    pub fn id(&self) -> Option<&str> {
        self.0
            .get(KEY_ID)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn group(&self) -> Option<&str> {
        self.0
            .get(KEY_GROUP)
            .and_then(Value::as_str)
            .filter(|group| !group.is_empty())
    }

    pub fn is_token_refresh(&self) -> bool {
        self.0.get(KEY_FROM).and_then(Value::as_str) == Some(TOKEN_REFRESH_SENDER)
    }

    pub fn priority(&self) -> i64 {
        self.0.get(KEY_PRIORITY).and_then(as_lenient_i64).unwrap_or(0)
    }

    pub fn is_high_priority(&self) -> bool {
        self.priority() > HIGH_PRIORITY_THRESHOLD
    }

    fn ttl_secs(&self) -> Option<i64> {
        self.0.get(KEY_TTL).and_then(as_lenient_i64)
    }

    /// Send time in seconds; the payload carries milliseconds.
    fn sent_time_secs(&self) -> Option<i64> {
        self.0
            .get(KEY_SENT_TIME)
            .and_then(as_lenient_i64)
            .map(|ms| ms / 1000)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Push services send numbers both as JSON numbers and as strings.
fn as_lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A record ready for the tentative write.
#[derive(Debug, Clone, PartialEq)]
pub struct BundledNotification {
    pub record: NotificationRecord,
    /// The stored, still pending record this payload replaces.
    pub replaces: Option<NotificationRecord>,
}

impl BundledNotification {
    pub fn is_new(&self) -> bool {
        self.replaces.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BundleResult {
    pub singles: Vec<BundledNotification>,
    /// Groups whose summary must be recomputed once the singles are written.
    pub summary_updates: Vec<String>,
    /// Redelivered ids of records the user already interacted with.
    pub duplicates: Vec<String>,
    /// Not a notification at all (token refresh).
    pub ignored: bool,
}

pub struct BundleProcessor {
    store: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
}

impl BundleProcessor {
    pub fn new(store: Arc<dyn NotificationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Classify `payload` against the stored state.
    ///
    /// A redelivered id that is still pending replaces the stored values but
    /// keeps the first arrival time. A redelivered id the user already opened
    /// or dismissed is reported as a duplicate and produces no single.
    pub fn process(&self, payload: &RawPayload, params: &PolicyParams) -> Result<BundleResult> {
        if payload.is_token_refresh() {
            debug!("Ignoring token refresh payload");
            return Ok(BundleResult {
                ignored: true,
                ..Default::default()
            });
        }

        let id = payload
            .id()
            .ok_or_else(|| NotificationError::InvalidPayload("missing notification id".into()))?;
        if id.starts_with(RESERVED_ID_PREFIX) {
            return Err(NotificationError::InvalidPayload(format!(
                "reserved notification id: {}",
                id
            )));
        }

        let existing = self.store.get(id)?;
        if let Some(existing) = &existing {
            if existing.is_interacted() || existing.is_summary {
                debug!("Dropping duplicate delivery of {}", id);
                return Ok(BundleResult {
                    duplicates: vec![id.to_string()],
                    ..Default::default()
                });
            }
        }

        let now = self.clock.now();
        let mut record = self.build_record(id, payload, now, params);
        if let Some(existing) = &existing {
            record.created_at = existing.created_at;
            record.seq = existing.seq;
        }

        let mut summary_updates = Vec::new();
        if let Some(group) = &record.group_id {
            summary_updates.push(group.clone());
        }
        if let Some(previous_group) = existing.as_ref().and_then(|e| e.group_id.as_ref()) {
            if !summary_updates.contains(previous_group) {
                summary_updates.push(previous_group.clone());
            }
        }

        Ok(BundleResult {
            singles: vec![BundledNotification {
                record,
                replaces: existing,
            }],
            summary_updates,
            ..Default::default()
        })
    }

    fn build_record(
        &self,
        id: &str,
        payload: &RawPayload,
        now: i64,
        params: &PolicyParams,
    ) -> NotificationRecord {
        let ttl = payload.ttl_secs().unwrap_or(params.default_ttl_secs);
        let sent_at = payload.sent_time_secs().unwrap_or(now);

        let mut record =
            NotificationRecord::new(id, now).with_expire_time(sent_at.saturating_add(ttl));
        record.group_id = payload.group().map(str::to_string);

        for (key, value) in &payload.0 {
            if key != KEY_ID && key != KEY_GROUP {
                record.properties.insert(key.clone(), value.clone());
            }
        }
        if payload.is_high_priority() {
            record
                .properties
                .insert("high_priority".to_string(), Value::Bool(true));
        }
        record
    }
}
