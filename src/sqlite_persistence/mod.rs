//! Shared SQLite helpers: declarative tables and versioned schemas.

mod versioned_schema;

pub use versioned_schema::{Column, SqlType, Table, VersionedSchema};

/// Offset added to every schema version stored in `PRAGMA user_version`.
///
/// Lets us tell a database created by this crate apart from an arbitrary
/// SQLite file that happens to have a small user_version.
pub const BASE_DB_VERSION: usize = 7_300;
