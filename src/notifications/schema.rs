//! Database schema for notifications.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{SqlType, Table, VersionedSchema};

/// Received notifications, one row per notification id.
///
/// `seq` aliases the SQLite rowid: it grows with every insert and gives a
/// stable tie-break between rows created in the same second.
const NOTIFICATIONS_TABLE_V0: Table = Table {
    name: "notifications",
    columns: &[
        sqlite_column!("seq", SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "notification_id",
            SqlType::Text,
            non_null = true,
            is_unique = true
        ),
        sqlite_column!("group_id", SqlType::Text),
        sqlite_column!(
            "is_summary",
            SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "opened",
            SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "dismissed",
            SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("created_at", SqlType::Integer, non_null = true),
        sqlite_column!("expire_time", SqlType::Integer),
        sqlite_column!("properties", SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_notifications_created", "created_at, seq"),
        ("idx_notifications_group", "group_id"),
        ("idx_notifications_status", "dismissed, opened, is_summary"),
    ],
};

pub const NOTIFICATION_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[NOTIFICATIONS_TABLE_V0],
    migration: None,
}];
