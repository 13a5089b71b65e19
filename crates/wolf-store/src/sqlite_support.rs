//! Connection and value-conversion helpers shared by the SQLite stores.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::{StoreError, StoreResult};

pub(crate) const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn open_connection(db_path: &Path, busy_timeout: Duration) -> StoreResult<Connection> {
    let connection = Connection::open(db_path)?;
    connection.busy_timeout(busy_timeout)?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        "#,
    )?;
    Ok(connection)
}

/// Opens the writer connection and applies `schema`, mapping every failure to
/// `StoreError::Unavailable` so callers fail fast at construction.
pub(crate) fn open_writer(
    store: &'static str,
    db_path: &Path,
    busy_timeout: Duration,
    schema: &str,
) -> StoreResult<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|error| StoreError::Unavailable {
                store,
                reason: format!("failed to create {}: {error}", parent.display()),
            })?;
        }
    }
    let connection =
        open_connection(db_path, busy_timeout).map_err(|error| StoreError::Unavailable {
            store,
            reason: format!("failed to open {}: {error}", db_path.display()),
        })?;
    connection
        .execute_batch(schema)
        .map_err(|error| StoreError::Unavailable {
            store,
            reason: format!("failed to initialize {}: {error}", db_path.display()),
        })?;
    Ok(connection)
}

pub(crate) fn lock_writer<'a>(
    store: &'static str,
    writer: &'a Mutex<Connection>,
) -> StoreResult<MutexGuard<'a, Connection>> {
    writer.lock().map_err(|_| StoreError::Unavailable {
        store,
        reason: "writer connection lock poisoned".to_string(),
    })
}

/// Runs SQLite work on the blocking pool, so a caller's timeout can fire
/// while a locked database is still being waited on.
pub(crate) async fn run_blocking<T, F>(store: &'static str, work: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| StoreError::Unavailable {
            store,
            reason: format!("store task failed: {error}"),
        })?
}

pub(crate) fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

pub(crate) fn option_timestamp_to_db(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(timestamp_to_db)
}

pub(crate) fn timestamp_from_db(value: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

pub(crate) fn option_timestamp_from_db(value: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    value.as_deref().map(timestamp_from_db).transpose()
}

pub(crate) fn usize_to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
