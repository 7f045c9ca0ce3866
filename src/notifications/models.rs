//! Notification data models

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload properties of a notification (arbitrary JSON values by key).
pub type Properties = Map<String, Value>;

/// A received notification as persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Insertion sequence number assigned by the store, 0 before the first insert.
    /// Breaks ties between records created in the same second.
    #[serde(default)]
    pub seq: i64,
    /// Opaque notification id from the push payload.
    pub id: String,
    /// First arrival time, seconds since epoch.
    pub created_at: i64,
    /// Expiration time, seconds since epoch. `None` never expires.
    pub expire_time: Option<i64>,
    pub group_id: Option<String>,
    pub is_summary: bool,
    pub opened: bool,
    pub dismissed: bool,
    #[serde(default)]
    pub properties: Properties,
}

impl NotificationRecord {
    pub fn new(id: impl Into<String>, created_at: i64) -> Self {
        Self {
            seq: 0,
            id: id.into(),
            created_at,
            expire_time: None,
            group_id: None,
            is_summary: false,
            opened: false,
            dismissed: false,
            properties: Properties::new(),
        }
    }

    pub fn with_expire_time(mut self, expire_time: i64) -> Self {
        self.expire_time = Some(expire_time);
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Summary record standing for a whole group.
    pub fn summary_for(group_id: &str, created_at: i64) -> Self {
        Self {
            is_summary: true,
            ..Self::new(summary_id(group_id), created_at).with_group(group_id)
        }
    }

    /// Not yet interacted with and not a summary.
    pub fn is_visible(&self) -> bool {
        !self.opened && !self.dismissed && !self.is_summary
    }

    /// Whether the user has already opened or dismissed this notification.
    pub fn is_interacted(&self) -> bool {
        self.opened || self.dismissed
    }

    pub fn title(&self) -> Option<&str> {
        self.properties.get("title").and_then(Value::as_str)
    }

    pub fn body(&self) -> Option<&str> {
        self.properties.get("alert").and_then(Value::as_str)
    }
}

/// Id of the summary record of a group.
pub fn summary_id(group_id: &str) -> String {
    format!("summary:{}", group_id)
}

/// A property of a record addressable by name, as carried by update operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordProperty {
    Opened,
    Dismissed,
    IsSummary,
    GroupId,
    ExpireTime,
    /// Any other name addresses a payload property.
    Payload(String),
}

impl RecordProperty {
    pub fn from_name(name: &str) -> Self {
        match name {
            "opened" => RecordProperty::Opened,
            "dismissed" => RecordProperty::Dismissed,
            "is_summary" => RecordProperty::IsSummary,
            "group_id" => RecordProperty::GroupId,
            "expire_time" => RecordProperty::ExpireTime,
            other => RecordProperty::Payload(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RecordProperty::Opened => "opened",
            RecordProperty::Dismissed => "dismissed",
            RecordProperty::IsSummary => "is_summary",
            RecordProperty::GroupId => "group_id",
            RecordProperty::ExpireTime => "expire_time",
            RecordProperty::Payload(name) => name,
        }
    }
}
