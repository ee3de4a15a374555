//! Persisted patch level
//!
//! The level lives in a two-column key/value table (`key TEXT PRIMARY KEY,
//! value TEXT`), under a row whose key defaults to `patch`. Every call takes
//! the [`TrackedLevel`] naming that table and row explicitly, so several
//! independent levels can be tracked side by side.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::connection::{Backend, Connection, Transaction};
use crate::error::{PatchError, PatchResult};

pub const DEFAULT_TABLE: &str = "property";
pub const DEFAULT_KEY: &str = "patch";

/// Longest table name accepted, PostgreSQL's identifier limit
const MAX_TABLE_NAME_LEN: usize = 63;

/// Table and row holding one tracked level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedLevel {
    table: String,
    key: String,
}

impl TrackedLevel {
    /// Track the level in `table` under the default key
    pub fn new(table: impl Into<String>) -> PatchResult<Self> {
        Self::with_key(table, DEFAULT_KEY)
    }

    pub fn with_key(table: impl Into<String>, key: impl Into<String>) -> PatchResult<Self> {
        let table = table.into();
        let key = key.into();
        validate_table_name(&table)?;
        if key.is_empty() {
            return Err(PatchError::InvalidTrackedLevel(
                "key cannot be empty".to_string(),
            ));
        }
        Ok(Self { table, key })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Default for TrackedLevel {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            key: DEFAULT_KEY.to_string(),
        }
    }
}

/// The table name is spliced into SQL, so only plain identifiers are allowed
fn validate_table_name(table: &str) -> PatchResult<()> {
    let mut chars = table.chars();
    let starts_well = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !starts_well || !rest_ok || table.len() > MAX_TABLE_NAME_LEN {
        return Err(PatchError::InvalidTrackedLevel(format!(
            "table name '{}' must be a plain SQL identifier of at most {} characters",
            table, MAX_TABLE_NAME_LEN
        )));
    }
    Ok(())
}

fn select_sql(backend: Backend, name: &TrackedLevel) -> String {
    format!(
        "SELECT CAST(value AS TEXT) FROM {} WHERE key = {}",
        name.table,
        backend.placeholder(1)
    )
}

fn update_sql(backend: Backend, name: &TrackedLevel) -> String {
    format!(
        "UPDATE {} SET value = {} WHERE key = {}",
        name.table,
        backend.placeholder(1),
        backend.placeholder(2)
    )
}

fn insert_sql(backend: Backend, name: &TrackedLevel) -> String {
    format!(
        "INSERT INTO {} (key, value) VALUES ({}, {})",
        name.table,
        backend.placeholder(1),
        backend.placeholder(2)
    )
}

fn parse_level(name: &TrackedLevel, value: &str) -> PatchResult<u32> {
    value.trim().parse::<u32>().map_err(|_| PatchError::CorruptLevel {
        table: name.table.clone(),
        key: name.key.clone(),
        value: value.to_string(),
    })
}

/// Whether the tracking table exists
pub async fn exists(conn: &mut dyn Connection, name: &TrackedLevel) -> PatchResult<bool> {
    Ok(conn.table_exists(&name.table).await?)
}

/// Create the tracking table and seed the level at 0.
///
/// Idempotent: the table is only created when missing and the seed row only
/// inserted when absent. Both happen in one transaction.
pub async fn create(conn: &mut dyn Connection, name: &TrackedLevel) -> PatchResult<()> {
    info!(table = %name.table, key = %name.key, "Creating level tracking table");

    let mut tx = conn.begin_transaction().await?;
    let result = match seed_table(&mut *tx, name).await {
        Ok(()) => tx.commit().await.map_err(PatchError::from),
        Err(error) => Err(error),
    };

    // A failed commit leaves the transaction open, so it is rolled back too
    if let Err(error) = result {
        if let Err(rollback) = tx.rollback().await {
            warn!(error = %rollback, "Rollback of tracking table creation failed");
        }
        return Err(error);
    }
    Ok(())
}

async fn seed_table(tx: &mut dyn Transaction, name: &TrackedLevel) -> PatchResult<()> {
    let create = format!(
        "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, value TEXT)",
        name.table
    );
    tx.execute_script(&create).await?;

    let backend = tx.backend();
    let present = tx
        .fetch_optional_text(&select_sql(backend, name), &[name.key.as_str()])
        .await?;
    if present.is_none() {
        tx.execute(&insert_sql(backend, name), &[name.key.as_str(), "0"])
            .await?;
    }
    Ok(())
}

/// Read the tracked level.
///
/// A missing row, or one holding NULL, reads as 0 and is healed to hold 0.
pub async fn read(conn: &mut dyn Connection, name: &TrackedLevel) -> PatchResult<u32> {
    let backend = conn.backend();
    let value = conn
        .fetch_optional_text(&select_sql(backend, name), &[name.key.as_str()])
        .await?;

    match value {
        Some(value) => parse_level(name, &value),
        None => {
            warn!(
                table = %name.table,
                key = %name.key,
                "Tracked level has no value, resetting it to 0"
            );
            let updated = conn
                .execute(&update_sql(backend, name), &["0", name.key.as_str()])
                .await?;
            if updated == 0 {
                conn.execute(&insert_sql(backend, name), &[name.key.as_str(), "0"])
                    .await?;
            }
            Ok(0)
        }
    }
}

/// Read the tracked level without creating or healing anything.
///
/// A missing table or row reads as 0.
pub async fn peek(conn: &mut dyn Connection, name: &TrackedLevel) -> PatchResult<u32> {
    if !exists(conn, name).await? {
        return Ok(0);
    }
    let backend = conn.backend();
    let value = conn
        .fetch_optional_text(&select_sql(backend, name), &[name.key.as_str()])
        .await?;
    match value {
        Some(value) => parse_level(name, &value),
        None => Ok(0),
    }
}

/// Create the table when needed, then read the level
pub async fn current_level(conn: &mut dyn Connection, name: &TrackedLevel) -> PatchResult<u32> {
    if !exists(conn, name).await? {
        create(conn, name).await?;
    }
    let level = read(conn, name).await?;
    debug!(table = %name.table, key = %name.key, level, "Read tracked level");
    Ok(level)
}

/// Record `level` inside the caller's transaction.
///
/// Never commits or rolls back; that is up to the caller.
pub async fn write(tx: &mut dyn Transaction, name: &TrackedLevel, level: u32) -> PatchResult<()> {
    let backend = tx.backend();
    let value = level.to_string();

    let updated = tx
        .execute(&update_sql(backend, name), &[value.as_str(), name.key.as_str()])
        .await?;
    if updated == 0 {
        tx.execute(&insert_sql(backend, name), &[name.key.as_str(), value.as_str()])
            .await?;
    }
    debug!(table = %name.table, key = %name.key, level, "Recorded tracked level");
    Ok(())
}
