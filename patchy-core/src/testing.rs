//! Testing utilities for patchy-core
//!
//! [`PatchDir`] writes patch files into a temporary directory and
//! [`FaultyConnection`] wraps a real connection to count what it runs and to
//! inject commit, rollback and statement failures.

use async_trait::async_trait;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::connection::{Backend, Connection, Transaction};
use crate::error::{StorageError, StorageResult};
use crate::patch::Direction;

/// Temporary patch directory, removed on drop
pub struct PatchDir {
    dir: TempDir,
}

impl PatchDir {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `{level}-{direction}.sql`
    pub fn write_patch(&self, level: u32, direction: Direction, sql: &str) -> io::Result<PathBuf> {
        self.write_file(&format!("{}{}", level, direction.file_suffix()), sql)
    }

    pub fn write_file(&self, name: &str, contents: &str) -> io::Result<PathBuf> {
        let path = self.dir.path().join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Add a forward patch
    pub fn forward(self, level: u32, sql: &str) -> Self {
        self.write_patch(level, Direction::Forward, sql)
            .expect("Failed to write forward patch");
        self
    }

    /// Add a reverse patch
    pub fn reverse(self, level: u32, sql: &str) -> Self {
        self.write_patch(level, Direction::Reverse, sql)
            .expect("Failed to write reverse patch");
        self
    }

    /// Add an arbitrary file
    pub fn file(self, name: &str, contents: &str) -> Self {
        self.write_file(name, contents)
            .expect("Failed to write file");
        self
    }
}

/// Counters and injected failures shared by a [`FaultyConnection`] and the
/// transactions it hands out
#[derive(Debug, Default)]
pub struct Faults {
    transactions_begun: AtomicUsize,
    scripts_executed: AtomicUsize,
    commits_attempted: AtomicUsize,
    /// 1-based commit attempt to fail, 0 for none
    fail_commit_at: AtomicUsize,
    fail_rollback: AtomicBool,
    fail_statement_containing: Mutex<Option<String>>,
}

impl Faults {
    /// Fail the `n`th commit attempt (counting from 1)
    pub fn fail_commit_at(&self, n: usize) {
        self.fail_commit_at.store(n, Ordering::SeqCst);
    }

    /// Make every rollback report failure
    pub fn fail_rollback(&self) {
        self.fail_rollback.store(true, Ordering::SeqCst);
    }

    /// Fail any statement or script whose text contains `needle`
    pub fn fail_statement_containing(&self, needle: impl Into<String>) {
        *self.statement_filter() = Some(needle.into());
    }

    /// Clear all injected failures, keeping the counters
    pub fn heal(&self) {
        self.fail_commit_at.store(0, Ordering::SeqCst);
        self.fail_rollback.store(false, Ordering::SeqCst);
        *self.statement_filter() = None;
    }

    pub fn transactions_begun(&self) -> usize {
        self.transactions_begun.load(Ordering::SeqCst)
    }

    pub fn scripts_executed(&self) -> usize {
        self.scripts_executed.load(Ordering::SeqCst)
    }

    pub fn commits_attempted(&self) -> usize {
        self.commits_attempted.load(Ordering::SeqCst)
    }

    fn statement_filter(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.fail_statement_containing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_statement(&self, sql: &str) -> StorageResult<()> {
        match self.statement_filter().as_deref() {
            Some(needle) if sql.contains(needle) => Err(StorageError::QueryFailed(format!(
                "injected failure for statement containing '{}'",
                needle
            ))),
            _ => Ok(()),
        }
    }
}

/// Wraps a connection, counting activity and injecting failures
pub struct FaultyConnection<C> {
    inner: C,
    faults: Arc<Faults>,
}

impl<C: Connection> FaultyConnection<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            faults: Arc::new(Faults::default()),
        }
    }

    /// Shared handle, usable while the connection is borrowed elsewhere
    pub fn faults(&self) -> Arc<Faults> {
        Arc::clone(&self.faults)
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

#[async_trait]
impl<C: Connection> Connection for FaultyConnection<C> {
    fn backend(&self) -> Backend {
        self.inner.backend()
    }

    async fn table_exists(&mut self, table: &str) -> StorageResult<bool> {
        self.inner.table_exists(table).await
    }

    async fn execute(&mut self, query: &str, params: &[&str]) -> StorageResult<u64> {
        self.faults.check_statement(query)?;
        self.inner.execute(query, params).await
    }

    async fn fetch_optional_text(
        &mut self,
        query: &str,
        params: &[&str],
    ) -> StorageResult<Option<String>> {
        self.inner.fetch_optional_text(query, params).await
    }

    async fn begin_transaction<'a>(&'a mut self) -> StorageResult<Box<dyn Transaction + 'a>> {
        self.faults.transactions_begun.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.begin_transaction().await?;
        Ok(Box::new(FaultyTransaction {
            inner,
            faults: Arc::clone(&self.faults),
        }))
    }
}

struct FaultyTransaction<'a> {
    inner: Box<dyn Transaction + 'a>,
    faults: Arc<Faults>,
}

#[async_trait]
impl Transaction for FaultyTransaction<'_> {
    fn backend(&self) -> Backend {
        self.inner.backend()
    }

    async fn execute_script(&mut self, sql: &str) -> StorageResult<()> {
        self.faults.scripts_executed.fetch_add(1, Ordering::SeqCst);
        self.faults.check_statement(sql)?;
        self.inner.execute_script(sql).await
    }

    async fn execute(&mut self, query: &str, params: &[&str]) -> StorageResult<u64> {
        self.faults.check_statement(query)?;
        self.inner.execute(query, params).await
    }

    async fn fetch_optional_text(
        &mut self,
        query: &str,
        params: &[&str],
    ) -> StorageResult<Option<String>> {
        self.inner.fetch_optional_text(query, params).await
    }

    async fn commit(&mut self) -> StorageResult<()> {
        let attempt = self.faults.commits_attempted.fetch_add(1, Ordering::SeqCst) + 1;
        if self.faults.fail_commit_at.load(Ordering::SeqCst) == attempt {
            return Err(StorageError::TransactionFailed(
                "injected commit failure".to_string(),
            ));
        }
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> StorageResult<()> {
        if self.faults.fail_rollback.load(Ordering::SeqCst) {
            // Still roll back underneath so the wrapped database stays usable
            let _ = self.inner.rollback().await;
            return Err(StorageError::TransactionFailed(
                "injected rollback failure".to_string(),
            ));
        }
        self.inner.rollback().await
    }
}
