//! PostgreSQL backend over a single sqlx connection
//!
//! PostgreSQL runs most DDL transactionally. Statements that cannot run inside
//! a transaction block (`CREATE INDEX CONCURRENTLY`, `ALTER TYPE ... ADD VALUE`
//! on older servers, `VACUUM`) make the whole step fail and roll back.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, Postgres};
use sqlx::query::Query;
use sqlx::{ConnectOptions, Row};
use std::str::FromStr;
use tracing::{debug, warn};

use crate::connection::{Backend, Connection, Transaction, TransactionState};
use crate::error::StorageResult;

fn bind_all<'q>(query: &'q str, params: &'q [&'q str]) -> Query<'q, Postgres, PgArguments> {
    params
        .iter()
        .fold(sqlx::query(query), |query, param| query.bind(*param))
}

/// A connection to a PostgreSQL database
pub struct PostgresBackend {
    conn: PgConnection,
}

impl PostgresBackend {
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let options = PgConnectOptions::from_str(url)?;
        let conn = options.connect().await?;
        debug!("PostgreSQL connection established");
        Ok(Self { conn })
    }
}

#[async_trait]
impl Connection for PostgresBackend {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    async fn table_exists(&mut self, table: &str) -> StorageResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"SELECT EXISTS (
                SELECT 1
                FROM information_schema.tables
                WHERE table_schema = current_schema()
                AND table_name = $1
            )"#,
        )
        .bind(table)
        .fetch_one(&mut self.conn)
        .await?;
        Ok(exists)
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
        Ok(Box::new(PostgresTransaction {
            conn: &mut self.conn,
            state: TransactionState::Open,
        }))
    }
}

/// Transaction borrowing the backend's connection
pub struct PostgresTransaction<'a> {
    conn: &'a mut PgConnection,
    state: TransactionState,
}

#[async_trait]
impl Transaction for PostgresTransaction<'_> {
    fn backend(&self) -> Backend {
        Backend::Postgres
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

impl Drop for PostgresTransaction<'_> {
    fn drop(&mut self) {
        if matches!(self.state, TransactionState::Open | TransactionState::CommitFailed) {
            warn!("PostgreSQL transaction dropped while still open");
        }
    }
}
