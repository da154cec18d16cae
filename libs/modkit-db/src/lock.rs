//! Distributed lock abstraction (spec §4.I): `acquire(key) -> guard`, where
//! dropping (or explicitly releasing) the guard releases the lock.
//!
//! Two implementations are provided: [`DbLock`], backed by a unique-keyed
//! row in a `_locks` table so it works across any number of processes
//! sharing one database, and [`InProcessLock`], a single-writer mutex for
//! deployments that never run more than one instance of the engine.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sea_orm::sea_query::{ColumnDef, Table};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, ExecResult, Statement};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use modkit_errors::EngineError;

/// Held until dropped (or [`LockGuard::release`] is called explicitly),
/// at which point the underlying lock is released.
pub struct LockGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self { release: Some(Box::new(release)) }
    }

    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Acquire the named lock, blocking until it is available.
    ///
    /// # Errors
    /// Returns `EngineError::LockUnavailable` for implementations that
    /// fail fast instead of waiting (none currently do, but the contract
    /// allows it), and other `EngineError` variants for backend failures.
    async fn acquire(&self, key: &str) -> Result<LockGuard, EngineError>;
}

/// Single-process lock backed by a map of named async mutexes. Correct
/// only within one OS process; multiple engine instances sharing a
/// database must use [`DbLock`] instead.
#[derive(Default)]
pub struct InProcessLock {
    mutexes: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

#[async_trait]
impl DistributedLock for InProcessLock {
    async fn acquire(&self, key: &str) -> Result<LockGuard, EngineError> {
        let mutex = {
            let mut mutexes = self.mutexes.lock();
            mutexes.entry(key.to_owned()).or_default().clone()
        };

        let guard: OwnedMutexGuard<()> = mutex.lock_owned().await;
        Ok(LockGuard::new(move || drop(guard)))
    }
}

/// Multi-process lock backed by a row in a `_locks` table: acquiring
/// inserts `(key)`, which a unique constraint makes fail for any
/// concurrent holder; releasing deletes the row.
pub struct DbLock {
    connection: Arc<DatabaseConnection>,
}

impl DbLock {
    #[must_use]
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    /// Create the `_locks` table if it doesn't already exist.
    ///
    /// # Errors
    /// Propagates the underlying DDL failure.
    pub async fn ensure_schema(&self) -> Result<(), DbErr> {
        let builder = self.connection.get_database_backend();
        let stmt = builder.build(
            Table::create()
                .table(LocksTable)
                .if_not_exists()
                .col(ColumnDef::new(LocksColumn::Key).string().not_null().primary_key())
                .col(ColumnDef::new(LocksColumn::AcquiredAt).string().not_null()),
        );
        self.connection.execute(stmt).await?;
        Ok(())
    }
}

#[derive(sea_orm::Iden)]
struct LocksTable;

#[derive(sea_orm::Iden)]
enum LocksColumn {
    Key,
    AcquiredAt,
}

#[async_trait]
impl DistributedLock for DbLock {
    async fn acquire(&self, key: &str) -> Result<LockGuard, EngineError> {
        let insert = Statement::from_sql_and_values(
            self.connection.get_database_backend(),
            "INSERT INTO _locks (key, acquired_at) VALUES ($1, $2)",
            [key.into(), chrono::Utc::now().to_rfc3339().into()],
        );

        self.connection.execute(insert).await.map_err(|_source| {
            EngineError::LockUnavailable { key: key.to_owned() }
        })?;

        let connection = self.connection.clone();
        let key_owned = key.to_owned();
        Ok(LockGuard::new(move || {
            tokio::spawn(async move {
                let delete = Statement::from_sql_and_values(
                    connection.get_database_backend(),
                    "DELETE FROM _locks WHERE key = $1",
                    [key_owned.into()],
                );
                if let Err(source) = connection.execute(delete).await as Result<ExecResult, DbErr> {
                    tracing::warn!(error = %source, "failed to release db lock row");
                }
            });
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_process_lock_serializes_acquisitions() {
        let lock = InProcessLock::default();
        let guard = lock.acquire("migration:core").await.unwrap();

        let lock = Arc::new(lock);
        let lock2 = lock.clone();
        let handle = tokio::spawn(async move { lock2.acquire("migration:core").await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        guard.release();
        let second = handle.await.unwrap();
        assert!(second.is_ok());
    }
}
