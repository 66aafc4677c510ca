//! Database lifecycle and schema migrations.

use crate::config::PersistenceConfig;
use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;
use std::time::Duration;

use super::{Database, Tx};

impl Database {
    /// Create a new database connection with the default lock wait
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        Self::open(path, PersistenceConfig::default().busy_timeout).await
    }

    /// Open the database described by a [`PersistenceConfig`]
    pub async fn from_config(config: &PersistenceConfig) -> Result<Self> {
        Self::open(&config.database_path, config.busy_timeout).await
    }

    /// Open (or create) the database at `path`
    ///
    /// `busy_timeout` bounds how long a writer blocks behind another writer's lock.
    pub async fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };

        db.run_migrations().await?;

        Ok(db)
    }

    /// Start a transaction
    ///
    /// Dropping the returned transaction without committing rolls it back and
    /// releases any lock it took.
    pub async fn begin(&self) -> Result<Tx> {
        self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })
    }

    /// Commit a transaction, releasing its lock
    pub async fn commit(tx: Tx) -> Result<()> {
        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit transaction: {}",
                e
            )))
        })
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .flatten();

        if current_version.unwrap_or(0) < 1 {
            Self::migrate_v1(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: download tasks and the creation-event outbox
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v1");

        // Wrap migration in a transaction so partial failures don't leave the DB in a broken state
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = async {
            Self::create_tasks_schema(conn).await?;
            Self::create_events_schema(conn).await?;
            Self::record_migration(conn, 1).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to commit migration v1: {}",
                            e
                        )))
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!("Database migration v1 complete");
        Ok(())
    }

    /// Create download_tasks table and its indexes
    async fn create_tasks_schema(conn: &mut SqliteConnection) -> Result<()> {
        for statement in [
            r#"
            CREATE TABLE download_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_account_id INTEGER NOT NULL,
                download_type INTEGER NOT NULL,
                url TEXT NOT NULL,
                status INTEGER NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                error_message TEXT,
                retryable INTEGER NOT NULL DEFAULT 1,
                attempt INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX idx_download_tasks_status ON download_tasks(status)",
            "CREATE INDEX idx_download_tasks_owner ON download_tasks(owner_account_id, id)",
        ] {
            sqlx::query(statement)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::MigrationFailed(format!(
                        "Failed to create download_tasks schema: {}",
                        e
                    )))
                })?;
        }

        Ok(())
    }

    /// Create task_events outbox table
    async fn create_events_schema(conn: &mut SqliteConnection) -> Result<()> {
        for statement in [
            r#"
            CREATE TABLE task_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                topic TEXT NOT NULL,
                payload TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                available_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX idx_task_events_available ON task_events(available_at, id)",
        ] {
            sqlx::query(statement)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::MigrationFailed(format!(
                        "Failed to create task_events schema: {}",
                        e
                    )))
                })?;
        }

        Ok(())
    }

    /// Record a migration version as applied
    async fn record_migration(conn: &mut SqliteConnection, version: i32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Close the database connection pool
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
