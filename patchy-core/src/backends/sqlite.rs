//! SQLite backend over a single sqlx connection
//!
//! SQLite runs DDL transactionally, so a failed patch leaves no trace.

use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Row};
use std::str::FromStr;
use tracing::{debug, warn};

use crate::connection::{Backend, Connection, Transaction, TransactionState};
use crate::error::StorageResult;

fn bind_all<'q>(query: &'q str, params: &'q [&'q str]) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    params
        .iter()
        .fold(sqlx::query(query), |query, param| query.bind(*param))
}

/// A connection to an SQLite database
pub struct SqliteBackend {
    conn: SqliteConnection,
}

impl SqliteBackend {
    /// Connect to `url`, creating the database file if it does not exist
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let conn = options.connect().await?;
        debug!("SQLite connection established");
        Ok(Self { conn })
    }

    /// Fresh private in-memory database
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect("sqlite::memory:").await
    }
}

#[async_trait]
impl Connection for SqliteBackend {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    async fn table_exists(&mut self, table: &str) -> StorageResult<bool> {
        let found = sqlx::query("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .bind(table)
            .fetch_optional(&mut self.conn)
            .await?;
        Ok(found.is_some())
    }

    async fn execute(&mut self, query: &str, params: &[&str]) -> StorageResult<u64> {
        let result = bind_all(query, params).execute(&mut self.conn).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_optional_text(
        &mut self,
        query: &str,
        params: &[&str],
    ) -> StorageResult<Option<String>> {
        let row = bind_all(query, params).fetch_optional(&mut self.conn).await?;
        match row {
            Some(row) => Ok(row.try_get::<Option<String>, _>(0)?),
            None => Ok(None),
        }
    }

    async fn begin_transaction<'a>(&'a mut self) -> StorageResult<Box<dyn Transaction + 'a>> {
        sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql("BEGIN")).await?;
        Ok(Box::new(SqliteTransaction {
            conn: &mut self.conn,
            state: TransactionState::Open,
        }))
    }
}

/// Transaction borrowing the backend's connection
pub struct SqliteTransaction<'a> {
    conn: &'a mut SqliteConnection,
    state: TransactionState,
}

#[async_trait]
impl Transaction for SqliteTransaction<'_> {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    async fn execute_script(&mut self, sql: &str) -> StorageResult<()> {
        self.state.check_open()?;
        sqlx::Executor::execute(&mut *self.conn, sqlx::raw_sql(sql)).await?;
        Ok(())
    }

    async fn execute(&mut self, query: &str, params: &[&str]) -> StorageResult<u64> {
        self.state.check_open()?;
        let result = bind_all(query, params).execute(&mut *self.conn).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_optional_text(
        &mut self,
        query: &str,
        params: &[&str],
    ) -> StorageResult<Option<String>> {
        self.state.check_open()?;
        let row = bind_all(query, params).fetch_optional(&mut *self.conn).await?;
        match row {
            Some(row) => Ok(row.try_get::<Option<String>, _>(0)?),
            None => Ok(None),
        }
    }

    async fn commit(&mut self) -> StorageResult<()> {
        self.state.check_open()?;
        match sqlx::Executor::execute(&mut *self.conn, sqlx::raw_sql("COMMIT")).await {
            Ok(_) => {
                self.state = TransactionState::Committed;
                Ok(())
            }
            Err(e) => {
                self.state = TransactionState::CommitFailed;
                Err(e.into())
            }
        }
    }

    async fn rollback(&mut self) -> StorageResult<()> {
        self.state.check_rollback()?;
        sqlx::Executor::execute(&mut *self.conn, sqlx::raw_sql("ROLLBACK")).await?;
        self.state = TransactionState::RolledBack;
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if matches!(self.state, TransactionState::Open | TransactionState::CommitFailed) {
            warn!("SQLite transaction dropped while still open");
        }
    }
}
