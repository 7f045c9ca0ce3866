//! Notification storage and persistence.
//!
//! The store is the single point of truth for notification state. Every
//! mutation runs under the connection lock, so a read-modify-write on one id
//! is a single critical section.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;
use tracing::{debug, info};

use super::error::{NotificationError, Result};
use super::filter::Predicate;
use super::models::{NotificationRecord, Properties, RecordProperty};
use super::schema::NOTIFICATION_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::VersionedSchema;

/// Rows fetched per round trip by [`RecordQuery`].
pub const DEFAULT_PAGE_SIZE: usize = 64;

const RECORD_COLUMNS: &str = "seq, notification_id, group_id, is_summary, opened, dismissed, \
                              created_at, expire_time, properties";

/// Keyset position of the last record returned by a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryCursor {
    pub created_at: i64,
    pub seq: i64,
}

impl From<&NotificationRecord> for QueryCursor {
    fn from(record: &NotificationRecord) -> Self {
        Self {
            created_at: record.created_at,
            seq: record.seq,
        }
    }
}

/// Trait for notification storage operations.
///
/// Ordered reads always return records oldest first, ties broken by
/// insertion sequence.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait NotificationStore: Send + Sync {
    /// Insert a new record. Fails with `DuplicateId` if the id is already stored.
    /// Returns the record with its insertion sequence assigned.
    fn insert(&self, record: &NotificationRecord) -> Result<NotificationRecord>;

    /// Get a record by id.
    fn get(&self, id: &str) -> Result<Option<NotificationRecord>>;

    /// Fetch up to `limit` matching records positioned after `after`.
    fn query_page(
        &self,
        predicate: &Predicate,
        after: Option<QueryCursor>,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>>;

    /// Count matching records.
    fn count(&self, predicate: &Predicate) -> Result<usize>;

    /// Set a single property. Fails with `NotFound` if the id is not stored.
    fn update(&self, id: &str, property: &RecordProperty, value: &Value) -> Result<()>;

    /// Replace the values of an existing record (group, summary flag,
    /// expiration, payload properties), keeping its creation time, sequence
    /// and interaction flags. Fails with `NotFound` if the id is not stored.
    fn overwrite(&self, record: &NotificationRecord) -> Result<NotificationRecord>;

    /// Delete a record. Fails with `NotFound` if the id is not stored.
    fn delete(&self, id: &str) -> Result<()>;

    /// Delete every record created before `cutoff`. Returns the number deleted.
    fn delete_created_before(&self, cutoff: i64) -> Result<usize>;
}

impl dyn NotificationStore + '_ {
    /// Lazy, restartable, oldest-first sequence of records matching `predicate`.
    pub fn query(&self, predicate: Predicate) -> RecordQuery<'_> {
        RecordQuery::new(self, predicate)
    }
}

/// Lazy query over a store. Every call to [`RecordQuery::iter`] starts over
/// from the oldest matching record.
pub struct RecordQuery<'a> {
    store: &'a dyn NotificationStore,
    predicate: Predicate,
    page_size: usize,
}

impl<'a> RecordQuery<'a> {
    pub fn new(store: &'a dyn NotificationStore, predicate: Predicate) -> Self {
        Self {
            store,
            predicate,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn iter(&self) -> RecordIter<'_> {
        RecordIter {
            query: self,
            buffer: VecDeque::new(),
            cursor: None,
            exhausted: false,
        }
    }

    /// Drains the whole sequence, stopping at the first storage error.
    pub fn to_vec(&self) -> Result<Vec<NotificationRecord>> {
        self.iter().collect()
    }
}

pub struct RecordIter<'q> {
    query: &'q RecordQuery<'q>,
    buffer: VecDeque<NotificationRecord>,
    cursor: Option<QueryCursor>,
    exhausted: bool,
}

impl Iterator for RecordIter<'_> {
    type Item = Result<NotificationRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self.query.store.query_page(
                &self.query.predicate,
                self.cursor,
                self.query.page_size,
            ) {
                Ok(page) => {
                    if page.len() < self.query.page_size {
                        self.exhausted = true;
                    }
                    if let Some(last) = page.last() {
                        self.cursor = Some(QueryCursor::from(last));
                    }
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

/// SQLite-backed notification store.
pub struct SqliteNotificationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteNotificationStore {
    /// Opens an existing database or creates a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> anyhow::Result<Self> {
        let conn = if db_path.as_ref().exists() {
            let conn = Connection::open(&db_path)?;
            VersionedSchema::open_or_migrate(NOTIFICATION_VERSIONED_SCHEMAS, &conn)?;
            conn
        } else {
            let conn = Connection::open(&db_path)?;
            Self::create_latest(&conn)?;
            info!("Created new notification database at {:?}", db_path.as_ref());
            conn
        };

        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates a store backed by an in-memory database.
    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::create_latest(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn create_latest(conn: &Connection) -> anyhow::Result<()> {
        NOTIFICATION_VERSIONED_SCHEMAS
            .last()
            .ok_or_else(|| anyhow::anyhow!("No schemas defined"))?
            .create(conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| NotificationError::StorageUnavailable("connection lock poisoned".into()))
    }

    fn get_with(conn: &Connection, id: &str) -> Result<Option<NotificationRecord>> {
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM notifications WHERE notification_id = ?1",
                    RECORD_COLUMNS
                ),
                params![id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn update_payload_property(
        conn: &Connection,
        id: &str,
        key: &str,
        value: &Value,
    ) -> Result<()> {
        let stored: Option<String> = conn
            .query_row(
                "SELECT properties FROM notifications WHERE notification_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let stored = stored.ok_or_else(|| NotificationError::NotFound(id.to_string()))?;

        let mut properties: Properties = serde_json::from_str(&stored)?;
        if value.is_null() {
            properties.remove(key);
        } else {
            properties.insert(key.to_string(), value.clone());
        }

        conn.execute(
            "UPDATE notifications SET properties = ?1 WHERE notification_id = ?2",
            params![serde_json::to_string(&properties)?, id],
        )?;
        Ok(())
    }
}

fn invalid_property(property: &RecordProperty, reason: &str) -> NotificationError {
    NotificationError::InvalidProperty {
        property: property.name().to_string(),
        reason: reason.to_string(),
    }
}

/// Converts a property value into the column value it is stored as.
fn column_value(property: &RecordProperty, value: &Value) -> Result<(&'static str, SqlValue)> {
    match property {
        RecordProperty::Opened | RecordProperty::Dismissed | RecordProperty::IsSummary => {
            let flag = value
                .as_bool()
                .ok_or_else(|| invalid_property(property, "expected a boolean"))?;
            let column = match property {
                RecordProperty::Opened => "opened",
                RecordProperty::Dismissed => "dismissed",
                _ => "is_summary",
            };
            Ok((column, SqlValue::Integer(flag as i64)))
        }
        RecordProperty::GroupId => match value {
            Value::Null => Ok(("group_id", SqlValue::Null)),
            Value::String(group) => Ok(("group_id", SqlValue::Text(group.clone()))),
            _ => Err(invalid_property(property, "expected a string or null")),
        },
        RecordProperty::ExpireTime => match value {
            Value::Null => Ok(("expire_time", SqlValue::Null)),
            other => other
                .as_i64()
                .map(|t| ("expire_time", SqlValue::Integer(t)))
                .ok_or_else(|| invalid_property(property, "expected an integer or null")),
        },
        RecordProperty::Payload(_) => Err(invalid_property(property, "not a column")),
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<NotificationRecord> {
    let properties_json: String = row.get("properties")?;
    let properties: Properties = serde_json::from_str(&properties_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;

    Ok(NotificationRecord {
        seq: row.get("seq")?,
        id: row.get("notification_id")?,
        group_id: row.get("group_id")?,
        is_summary: row.get::<_, i64>("is_summary")? != 0,
        opened: row.get::<_, i64>("opened")? != 0,
        dismissed: row.get::<_, i64>("dismissed")? != 0,
        created_at: row.get("created_at")?,
        expire_time: row.get("expire_time")?,
        properties,
    })
}

impl NotificationStore for SqliteNotificationStore {
    fn insert(&self, record: &NotificationRecord) -> Result<NotificationRecord> {
        let conn = self.lock()?;
        let properties = serde_json::to_string(&record.properties)?;
        let inserted = conn.execute(
            r#"INSERT INTO notifications (
                notification_id, group_id, is_summary, opened, dismissed,
                created_at, expire_time, properties
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                record.id,
                record.group_id,
                record.is_summary,
                record.opened,
                record.dismissed,
                record.created_at,
                record.expire_time,
                properties,
            ],
        );

        match inserted {
            Ok(_) => {
                let mut stored = record.clone();
                stored.seq = conn.last_insert_rowid();
                debug!("Inserted notification {} (seq {})", stored.id, stored.seq);
                Ok(stored)
            }
            Err(e) if is_unique_violation(&e) => {
                Err(NotificationError::DuplicateId(record.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, id: &str) -> Result<Option<NotificationRecord>> {
        let conn = self.lock()?;
        Self::get_with(&conn, id)
    }

    fn query_page(
        &self,
        predicate: &Predicate,
        after: Option<QueryCursor>,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>> {
        let (where_sql, mut sql_params) = predicate.to_sql();
        let mut sql = format!(
            "SELECT {} FROM notifications WHERE {}",
            RECORD_COLUMNS, where_sql
        );
        if let Some(cursor) = after {
            sql.push_str(" AND (created_at > ? OR (created_at = ? AND seq > ?))");
            sql_params.push(SqlValue::Integer(cursor.created_at));
            sql_params.push(SqlValue::Integer(cursor.created_at));
            sql_params.push(SqlValue::Integer(cursor.seq));
        }
        sql.push_str(" ORDER BY created_at ASC, seq ASC LIMIT ?");
        sql_params.push(SqlValue::Integer(limit as i64));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(sql_params.iter()), row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn count(&self, predicate: &Predicate) -> Result<usize> {
        let (where_sql, sql_params) = predicate.to_sql();
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM notifications WHERE {}", where_sql),
            params_from_iter(sql_params.iter()),
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn update(&self, id: &str, property: &RecordProperty, value: &Value) -> Result<()> {
        let conn = self.lock()?;
        if let RecordProperty::Payload(key) = property {
            return Self::update_payload_property(&conn, id, key, value);
        }

        let (column, column_value) = column_value(property, value)?;
        let updated = conn.execute(
            &format!(
                "UPDATE notifications SET {} = ?1 WHERE notification_id = ?2",
                column
            ),
            params![column_value, id],
        )?;
        if updated == 0 {
            return Err(NotificationError::NotFound(id.to_string()));
        }
        debug!("Set {} = {} on notification {}", column, value, id);
        Ok(())
    }

    fn overwrite(&self, record: &NotificationRecord) -> Result<NotificationRecord> {
        let conn = self.lock()?;
        let updated = conn.execute(
            r#"UPDATE notifications
               SET group_id = ?1, is_summary = ?2, expire_time = ?3, properties = ?4
               WHERE notification_id = ?5"#,
            params![
                record.group_id,
                record.is_summary,
                record.expire_time,
                serde_json::to_string(&record.properties)?,
                record.id,
            ],
        )?;
        if updated == 0 {
            return Err(NotificationError::NotFound(record.id.clone()));
        }
        Self::get_with(&conn, &record.id)?
            .ok_or_else(|| NotificationError::NotFound(record.id.clone()))
    }

    fn delete(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM notifications WHERE notification_id = ?1",
            params![id],
        )?;
        if deleted == 0 {
            return Err(NotificationError::NotFound(id.to_string()));
        }
        debug!("Deleted notification {}", id);
        Ok(())
    }

    fn delete_created_before(&self, cutoff: i64) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM notifications WHERE created_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }
}
