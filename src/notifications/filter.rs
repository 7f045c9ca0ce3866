//! Query/filter engine over stored notifications.
//!
//! A [`Predicate`] is a conjunction of [`Clause`]s. Clauses live in an ordered
//! set, so composing predicates is associative and insensitive to the order in
//! which clauses were added, and the generated SQL is identical for equal
//! predicates.

use std::collections::BTreeSet;

use rusqlite::types::Value as SqlValue;

use super::models::NotificationRecord;

/// Default restoration window: one week.
pub const DEFAULT_RETENTION_WINDOW_SECS: i64 = 604_800;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Clause {
    /// `created_at > t`
    CreatedAfter(i64),
    /// `created_at < t`
    CreatedBefore(i64),
    Dismissed(bool),
    Opened(bool),
    IsSummary(bool),
    /// Not expired at `t`: no expiration, or `expire_time > t`.
    NotExpiredAt(i64),
    GroupId(String),
}

impl Clause {
    fn matches(&self, record: &NotificationRecord) -> bool {
        match self {
            Clause::CreatedAfter(t) => record.created_at > *t,
            Clause::CreatedBefore(t) => record.created_at < *t,
            Clause::Dismissed(v) => record.dismissed == *v,
            Clause::Opened(v) => record.opened == *v,
            Clause::IsSummary(v) => record.is_summary == *v,
            Clause::NotExpiredAt(t) => record.expire_time.map_or(true, |exp| exp > *t),
            Clause::GroupId(group) => record.group_id.as_deref() == Some(group.as_str()),
        }
    }

    fn push_sql(&self, sql: &mut String, params: &mut Vec<SqlValue>) {
        let fragment = match self {
            Clause::CreatedAfter(t) => {
                params.push(SqlValue::Integer(*t));
                "created_at > ?"
            }
            Clause::CreatedBefore(t) => {
                params.push(SqlValue::Integer(*t));
                "created_at < ?"
            }
            Clause::Dismissed(v) => {
                params.push(SqlValue::Integer(*v as i64));
                "dismissed = ?"
            }
            Clause::Opened(v) => {
                params.push(SqlValue::Integer(*v as i64));
                "opened = ?"
            }
            Clause::IsSummary(v) => {
                params.push(SqlValue::Integer(*v as i64));
                "is_summary = ?"
            }
            Clause::NotExpiredAt(t) => {
                params.push(SqlValue::Integer(*t));
                "(expire_time IS NULL OR expire_time > ?)"
            }
            Clause::GroupId(group) => {
                params.push(SqlValue::Text(group.clone()));
                "group_id = ?"
            }
        };
        sql.push_str(fragment);
    }
}

/// Conjunction of clauses. The empty predicate matches every record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    clauses: BTreeSet<Clause>,
}

impl Predicate {
    /// Predicate matching every record.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn and(mut self, clause: Clause) -> Self {
        self.clauses.insert(clause);
        self
    }

    /// Conjunction of two predicates.
    pub fn and_all(mut self, other: Predicate) -> Self {
        self.clauses.extend(other.clauses);
        self
    }

    /// Not dismissed, not opened, not a summary.
    pub fn uninteracted() -> Self {
        Self::all()
            .and(Clause::Dismissed(false))
            .and(Clause::Opened(false))
            .and(Clause::IsSummary(false))
    }

    pub fn clauses(&self) -> impl Iterator<Item = &Clause> {
        self.clauses.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// In-memory evaluation, equivalent to the SQL rendering.
    pub fn matches(&self, record: &NotificationRecord) -> bool {
        self.clauses.iter().all(|clause| clause.matches(record))
    }

    /// Renders the predicate as a SQL `WHERE` body plus positional parameters.
    pub fn to_sql(&self) -> (String, Vec<SqlValue>) {
        if self.clauses.is_empty() {
            return ("1=1".to_string(), Vec::new());
        }
        let mut sql = String::new();
        let mut params = Vec::with_capacity(self.clauses.len());
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                sql.push_str(" AND ");
            }
            clause.push_sql(&mut sql, &mut params);
        }
        (sql, params)
    }
}

/// Recent notifications the user has not interacted with yet.
///
/// Requires `created_at > now - retention_window_secs`, not dismissed, not
/// opened, not a summary, and with the TTL policy enabled also not expired.
pub fn build_restoration_predicate(
    now: i64,
    retention_window_secs: i64,
    ttl_policy_enabled: bool,
) -> Predicate {
    let predicate = Predicate::uninteracted()
        .and(Clause::CreatedAfter(now.saturating_sub(retention_window_secs)));
    if ttl_policy_enabled {
        predicate.and(Clause::NotExpiredAt(now))
    } else {
        predicate
    }
}
