//! Distributed-lock-protected schema migration runner (spec §4.I):
//! versioned diffs applied once per cluster, one transaction per diff.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use modkit_db::DistributedLock;
use modkit_errors::EngineError;
use sea_orm::sea_query::{ColumnDef, Index, Table};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, Statement, TransactionTrait};

/// One versioned schema change, applied inside a single transaction.
#[derive(Debug, Clone)]
pub struct Diff {
    pub from_version: u32,
    pub to_version: u32,
    pub checksum: String,
    pub statements: Vec<String>,
}

/// One schema's migration history: its declared diffs and, for a
/// brand-new schema, the DDL to bootstrap it in one shot.
pub trait MigrationProvider: Send + Sync {
    fn schema_name(&self) -> &str;
    fn target_version(&self) -> u32;
    fn diffs(&self) -> &[Diff];
    fn initial_ddl(&self) -> Option<&[String]> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct MigrationRecord {
    pub schema_name: String,
    pub version: u32,
    pub checksum: String,
}

const MIGRATION_LOCK_KEY: &str = "migration_runner";

/// Applies [`MigrationProvider`]s' diffs against a database, coordinated
/// by a distributed lock so at most one process migrates a schema at a
/// time.
pub struct MigrationRunner {
    connection: Arc<DatabaseConnection>,
    lock: Arc<dyn DistributedLock>,
}

impl MigrationRunner {
    #[must_use]
    pub fn new(connection: Arc<DatabaseConnection>, lock: Arc<dyn DistributedLock>) -> Self {
        Self { connection, lock }
    }

    /// Create the `_migrations` bookkeeping table if it doesn't exist.
    ///
    /// # Errors
    /// Propagates the underlying DDL failure.
    pub async fn ensure_schema(&self) -> Result<(), DbErr> {
        let builder = self.connection.get_database_backend();
        let stmt = builder.build(
            Table::create()
                .table(MigrationsTable)
                .if_not_exists()
                .col(ColumnDef::new(MigrationsColumn::SchemaName).string().not_null())
                .col(ColumnDef::new(MigrationsColumn::Version).integer().not_null())
                .col(ColumnDef::new(MigrationsColumn::Checksum).string().not_null())
                .col(ColumnDef::new(MigrationsColumn::AppliedAt).string().not_null())
                .primary_key(
                    Index::create()
                        .col(MigrationsColumn::SchemaName)
                        .col(MigrationsColumn::Version),
                ),
        );
        self.connection.execute(stmt).await?;
        Ok(())
    }

    /// Diff `toVersion`s not yet applied, per schema, in ascending order.
    ///
    /// # Errors
    /// Propagates a database read failure.
    pub async fn pending(&self, providers: &[Arc<dyn MigrationProvider>]) -> Result<HashMap<String, Vec<u32>>, EngineError> {
        let mut result = HashMap::new();
        for provider in providers {
            let current = self.highest_applied_version(provider.schema_name()).await?;
            let pending: Vec<u32> = provider
                .diffs()
                .iter()
                .filter(|diff| current.is_none_or(|v| diff.from_version >= v) && diff.to_version > current.unwrap_or(0))
                .map(|diff| diff.to_version)
                .collect();
            result.insert(provider.schema_name().to_owned(), pending);
        }
        Ok(result)
    }

    /// Highest applied version per schema (`None` for an unmigrated
    /// schema).
    ///
    /// # Errors
    /// Propagates a database read failure.
    pub async fn status(&self, providers: &[Arc<dyn MigrationProvider>]) -> Result<HashMap<String, Option<u32>>, EngineError> {
        let mut result = HashMap::new();
        for provider in providers {
            let current = self.highest_applied_version(provider.schema_name()).await?;
            result.insert(provider.schema_name().to_owned(), current);
        }
        Ok(result)
    }

    /// Migrate every provider to its target version. Stops at the first
    /// failure, leaving already-migrated providers applied (running again
    /// is a no-op for them).
    ///
    /// # Errors
    /// `EngineError::LockUnavailable` if the migration lock cannot be
    /// acquired; `EngineError::MigrationFailed` if a diff's transaction
    /// fails (rolled back before returning).
    pub async fn run(&self, providers: &[Arc<dyn MigrationProvider>]) -> Result<(), EngineError> {
        for provider in providers {
            let guard = self.lock.acquire(MIGRATION_LOCK_KEY).await?;
            let result = self.migrate_one(provider.as_ref()).await;
            guard.release();
            result?;
        }
        Ok(())
    }

    async fn migrate_one(&self, provider: &dyn MigrationProvider) -> Result<(), EngineError> {
        let current = self.highest_applied_version(provider.schema_name()).await?;

        if current.is_none() && provider.diffs().is_empty() {
            if let Some(ddl) = provider.initial_ddl() {
                return self.apply_ddl(provider.schema_name(), provider.target_version(), ddl).await;
            }
        }

        let mut pending: Vec<&Diff> = provider
            .diffs()
            .iter()
            .filter(|diff| current.is_none_or(|v| diff.from_version >= v) && diff.to_version > current.unwrap_or(0))
            .collect();
        pending.sort_by_key(|diff| diff.to_version);

        for diff in pending {
            self.apply_diff(provider.schema_name(), diff).await?;
        }
        Ok(())
    }

    async fn apply_ddl(&self, schema_name: &str, target_version: u32, statements: &[String]) -> Result<(), EngineError> {
        let checksum = checksum_of(statements);
        let txn = self.connection.begin().await.map_err(|source| migration_failed(schema_name, target_version, source))?;
        for sql in statements {
            let stmt = Statement::from_string(txn.get_database_backend(), sql.clone());
            txn.execute(stmt).await.map_err(|source| migration_failed(schema_name, target_version, source))?;
        }
        self.record_version(&txn, schema_name, target_version, &checksum)
            .await
            .map_err(|source| migration_failed(schema_name, target_version, source))?;
        txn.commit().await.map_err(|source| migration_failed(schema_name, target_version, source))?;
        Ok(())
    }

    async fn apply_diff(&self, schema_name: &str, diff: &Diff) -> Result<(), EngineError> {
        let txn = self.connection.begin().await.map_err(|source| migration_failed(schema_name, diff.to_version, source))?;
        for sql in &diff.statements {
            let stmt = Statement::from_string(txn.get_database_backend(), sql.clone());
            txn.execute(stmt).await.map_err(|source| migration_failed(schema_name, diff.to_version, source))?;
        }
        self.record_version(&txn, schema_name, diff.to_version, &diff.checksum)
            .await
            .map_err(|source| migration_failed(schema_name, diff.to_version, source))?;
        txn.commit().await.map_err(|source| migration_failed(schema_name, diff.to_version, source))?;
        Ok(())
    }

    async fn record_version(&self, txn: &impl ConnectionTrait, schema_name: &str, version: u32, checksum: &str) -> Result<(), DbErr> {
        let insert = Statement::from_sql_and_values(
            txn.get_database_backend(),
            "INSERT INTO _migrations (schema_name, version, checksum, applied_at) VALUES ($1, $2, $3, $4)",
            [schema_name.into(), i32::try_from(version).unwrap_or(i32::MAX).into(), checksum.into(), Utc::now().to_rfc3339().into()],
        );
        txn.execute(insert).await?;
        Ok(())
    }

    async fn highest_applied_version(&self, schema_name: &str) -> Result<Option<u32>, EngineError> {
        let stmt = Statement::from_sql_and_values(
            self.connection.get_database_backend(),
            "SELECT version FROM _migrations WHERE schema_name = $1 ORDER BY version DESC LIMIT 1",
            [schema_name.into()],
        );
        let row = self.connection.query_one(stmt).await.map_err(|source| EngineError::MigrationFailed {
            version: "unknown".to_owned(),
            source: source.into(),
        })?;
        Ok(row.and_then(|row| row.try_get::<i32>("", "version").ok()).and_then(|v| u32::try_from(v).ok()))
    }
}

fn migration_failed(schema_name: &str, version: u32, source: impl Into<anyhow::Error>) -> EngineError {
    EngineError::MigrationFailed { version: format!("{schema_name}@{version}"), source: source.into() }
}

fn checksum_of(statements: &[String]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for statement in statements {
        hasher.update(statement.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[derive(sea_orm::Iden)]
struct MigrationsTable;

#[derive(sea_orm::Iden)]
enum MigrationsColumn {
    SchemaName,
    Version,
    Checksum,
    AppliedAt,
}

#[cfg(test)]
mod tests {
    use super::*;
    use modkit_db::InProcessLock;
    use sea_orm::Database;

    struct TestProvider {
        schema_name: String,
        target_version: u32,
        diffs: Vec<Diff>,
    }

    impl MigrationProvider for TestProvider {
        fn schema_name(&self) -> &str {
            &self.schema_name
        }

        fn target_version(&self) -> u32 {
            self.target_version
        }

        fn diffs(&self) -> &[Diff] {
            &self.diffs
        }
    }

    async fn runner() -> MigrationRunner {
        let connection = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
        let runner = MigrationRunner::new(connection, Arc::new(InProcessLock::default()));
        runner.ensure_schema().await.unwrap();
        runner
    }

    fn widgets_provider() -> Arc<dyn MigrationProvider> {
        Arc::new(TestProvider {
            schema_name: "widgets".to_owned(),
            target_version: 2,
            diffs: vec![
                Diff {
                    from_version: 0,
                    to_version: 1,
                    checksum: "c1".to_owned(),
                    statements: vec!["CREATE TABLE widgets (id INTEGER PRIMARY KEY)".to_owned()],
                },
                Diff {
                    from_version: 1,
                    to_version: 2,
                    checksum: "c2".to_owned(),
                    statements: vec!["ALTER TABLE widgets ADD COLUMN name TEXT".to_owned()],
                },
            ],
        })
    }

    #[tokio::test]
    async fn running_twice_is_a_no_op() {
        let runner = runner().await;
        let provider = widgets_provider();
        let providers = vec![provider];

        runner.run(&providers).await.unwrap();
        let status = runner.status(&providers).await.unwrap();
        assert_eq!(status.get("widgets"), Some(&Some(2)));

        runner.run(&providers).await.unwrap();
        let pending = runner.pending(&providers).await.unwrap();
        assert_eq!(pending.get("widgets"), Some(&Vec::new()));
    }

    #[tokio::test]
    async fn pending_reports_unapplied_diffs() {
        let runner = runner().await;
        let providers = vec![widgets_provider()];
        let pending = runner.pending(&providers).await.unwrap();
        assert_eq!(pending.get("widgets"), Some(&vec![1, 2]));
    }

    #[tokio::test]
    async fn a_failing_diff_rolls_back_and_does_not_record_a_version() {
        let runner = runner().await;
        let provider: Arc<dyn MigrationProvider> = Arc::new(TestProvider {
            schema_name: "broken".to_owned(),
            target_version: 1,
            diffs: vec![Diff {
                from_version: 0,
                to_version: 1,
                checksum: "c1".to_owned(),
                statements: vec!["NOT VALID SQL".to_owned()],
            }],
        });
        let providers = vec![provider];

        let err = runner.run(&providers).await.unwrap_err();
        assert!(matches!(err, EngineError::MigrationFailed { .. }));

        let status = runner.status(&providers).await.unwrap();
        assert_eq!(status.get("broken"), Some(&None));
    }
}
