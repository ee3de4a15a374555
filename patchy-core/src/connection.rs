//! Connection and transaction abstractions
//!
//! A migration run owns exactly one connection for its whole duration and
//! never has more than one transaction open on it.

use async_trait::async_trait;
use std::fmt;

use crate::error::{StorageError, StorageResult};

/// SQL dialect spoken by a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

impl Backend {
    /// Positional parameter placeholder, 1-based
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Backend::Sqlite => format!("?{}", index),
            Backend::Postgres => format!("${}", index),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Sqlite => write!(f, "sqlite"),
            Backend::Postgres => write!(f, "postgres"),
        }
    }
}

/// Generic connection trait (object-safe version)
#[async_trait]
pub trait Connection: Send {
    /// Dialect of this connection
    fn backend(&self) -> Backend;

    /// Whether a table with this name exists
    async fn table_exists(&mut self, table: &str) -> StorageResult<bool>;

    /// Execute a parameterised statement outside any transaction
    async fn execute(&mut self, query: &str, params: &[&str]) -> StorageResult<u64>;

    /// Fetch the first column of at most one row, as text
    async fn fetch_optional_text(
        &mut self,
        query: &str,
        params: &[&str],
    ) -> StorageResult<Option<String>>;

    /// Begin a transaction; the connection is unusable until it is finished
    async fn begin_transaction<'a>(&'a mut self) -> StorageResult<Box<dyn Transaction + 'a>>;
}

/// Transaction trait (object-safe version)
#[async_trait]
pub trait Transaction: Send {
    /// Dialect of the underlying connection
    fn backend(&self) -> Backend;

    /// Execute raw SQL verbatim, possibly several statements
    async fn execute_script(&mut self, sql: &str) -> StorageResult<()>;

    /// Execute a parameterised statement within the transaction
    async fn execute(&mut self, query: &str, params: &[&str]) -> StorageResult<u64>;

    /// Fetch the first column of at most one row, as text
    async fn fetch_optional_text(
        &mut self,
        query: &str,
        params: &[&str],
    ) -> StorageResult<Option<String>>;

    /// Commit the transaction
    async fn commit(&mut self) -> StorageResult<()>;

    /// Roll the transaction back; still allowed after a failed commit
    async fn rollback(&mut self) -> StorageResult<()>;
}

/// Lifecycle of a transaction driven with explicit `BEGIN`/`COMMIT`/`ROLLBACK`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    /// `COMMIT` was sent and failed; only a rollback is allowed now
    CommitFailed,
    Committed,
    RolledBack,
}

impl TransactionState {
    /// Check the transaction still accepts statements
    pub fn check_open(&self) -> StorageResult<()> {
        match self {
            TransactionState::Open => Ok(()),
            TransactionState::CommitFailed => Err(StorageError::TransactionFailed(
                "Transaction commit failed, only rollback is allowed".to_string(),
            )),
            TransactionState::Committed => Err(StorageError::TransactionFailed(
                "Transaction already committed".to_string(),
            )),
            TransactionState::RolledBack => Err(StorageError::TransactionFailed(
                "Transaction already rolled back".to_string(),
            )),
        }
    }

    /// Check a rollback may be attempted
    pub fn check_rollback(&self) -> StorageResult<()> {
        match self {
            TransactionState::Open | TransactionState::CommitFailed => Ok(()),
            other => other.check_open(),
        }
    }
}
