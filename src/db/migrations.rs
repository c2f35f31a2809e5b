//! Database lifecycle and schema migrations.

use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::error::{DatabaseError, Error, Result};

use super::Database;

impl Database {
    /// Open (or create) the store described by the DSN and run migrations.
    ///
    /// Accepts a plain file path or a full `sqlite:` DSN;
    /// `sqlite::memory:` gives an in-memory store for tests.
    pub async fn new(dsn: &str) -> Result<Self> {
        let in_memory = dsn.contains(":memory:");

        let url = if dsn.starts_with("sqlite:") {
            dsn.to_string()
        } else {
            // Create the parent directory for file-backed stores
            let path = std::path::Path::new(dsn);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::Database(DatabaseError::ConnectionFailed(format!(
                        "Failed to create database directory: {e}"
                    )))
                })?;
            }
            format!("sqlite:{dsn}")
        };

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database DSN: {e}"
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(if in_memory {
                SqliteJournalMode::Memory
            } else {
                SqliteJournalMode::Wal
            });

        // An in-memory SQLite database exists per connection, so the pool
        // must be pinned to a single connection to see one database.
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
        } else {
            SqlitePool::connect_with(options).await
        }
        .map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {e}"
            )))
        })?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {e}"
            )))
        })?;

        ddl(
            &mut conn,
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .await?;

        // MAX over an empty table yields a single NULL row
        let current_version: Option<i64> =
            sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(version) FROM schema_version")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {e}"
                    )))
                })?;

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: Create the full schema
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v1");

        // Wrap the migration in a transaction so partial failures don't leave
        // the store half-created
        ddl(conn, "BEGIN").await?;

        let result = async {
            Self::create_identity_schema(conn).await?;
            Self::create_jobs_schema(conn).await?;
            Self::create_bulk_tasks_schema(conn).await?;
            Self::create_coordination_schema(conn).await?;
            Self::create_audit_schema(conn).await?;
            Self::create_catalog_cache_schema(conn).await?;
            Self::record_migration(conn, 1).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => ddl(conn, "COMMIT").await?,
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!("Database migration v1 complete");
        Ok(())
    }

    /// Create users and providers tables
    async fn create_identity_schema(conn: &mut SqliteConnection) -> Result<()> {
        ddl(
            conn,
            r#"
            CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                role TEXT NOT NULL DEFAULT 'user',
                session_token TEXT UNIQUE,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .await?;

        ddl(
            conn,
            r#"
            CREATE TABLE providers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL UNIQUE,
                enabled INTEGER NOT NULL DEFAULT 1,
                config_ciphertext TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .await?;

        Ok(())
    }

    /// Create the jobs table and its indexes
    async fn create_jobs_schema(conn: &mut SqliteConnection) -> Result<()> {
        ddl(
            conn,
            r#"
            CREATE TABLE jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                provider_id INTEGER NOT NULL REFERENCES providers(id),
                provider_key TEXT NOT NULL,
                external_id TEXT NOT NULL,
                title TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT 'Movies',
                metadata TEXT,
                priority INTEGER NOT NULL DEFAULT 100,
                position INTEGER NOT NULL DEFAULT 0,
                status INTEGER NOT NULL DEFAULT 3,
                progress REAL NOT NULL DEFAULT 0.0,
                speed_bps INTEGER NOT NULL DEFAULT 0,
                eta_seconds INTEGER,
                downloader_handle TEXT,
                source_url TEXT,
                tmp_path TEXT,
                final_path TEXT,
                file_size_bytes INTEGER,
                error_text TEXT,
                pause_source TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            )
            "#,
        )
        .await?;

        ddl(conn, "CREATE INDEX idx_jobs_status ON jobs(status)").await?;
        ddl(
            conn,
            "CREATE INDEX idx_jobs_claim ON jobs(status, provider_key, priority, position, created_at, id)",
        )
        .await?;
        ddl(conn, "CREATE INDEX idx_jobs_user ON jobs(user_id, status)").await?;
        ddl(
            conn,
            "CREATE INDEX idx_jobs_handle ON jobs(downloader_handle)",
        )
        .await?;

        Ok(())
    }

    /// Create the bulk_tasks table
    async fn create_bulk_tasks_schema(conn: &mut SqliteConnection) -> Result<()> {
        ddl(
            conn,
            r#"
            CREATE TABLE bulk_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                payload TEXT NOT NULL,
                options TEXT,
                status INTEGER NOT NULL DEFAULT 0,
                total_items INTEGER NOT NULL DEFAULT 0,
                processed_items INTEGER NOT NULL DEFAULT 0,
                failed_items INTEGER NOT NULL DEFAULT 0,
                error_text TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .await?;

        ddl(
            conn,
            "CREATE INDEX idx_bulk_tasks_status ON bulk_tasks(status, id)",
        )
        .await?;

        Ok(())
    }

    /// Create provider pause and backoff tables
    async fn create_coordination_schema(conn: &mut SqliteConnection) -> Result<()> {
        ddl(
            conn,
            r#"
            CREATE TABLE provider_pause (
                provider_key TEXT PRIMARY KEY,
                paused_by TEXT NOT NULL,
                note TEXT,
                paused_at INTEGER NOT NULL
            )
            "#,
        )
        .await?;

        ddl(
            conn,
            r#"
            CREATE TABLE provider_backoff (
                provider_key TEXT PRIMARY KEY,
                reason TEXT NOT NULL,
                window_secs INTEGER NOT NULL,
                started_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .await?;

        Ok(())
    }

    /// Create audit_log and notifications tables
    async fn create_audit_schema(conn: &mut SqliteConnection) -> Result<()> {
        ddl(
            conn,
            r#"
            CREATE TABLE audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                actor TEXT NOT NULL,
                action TEXT NOT NULL,
                subject_type TEXT NOT NULL,
                subject_id TEXT,
                payload TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .await?;

        ddl(
            conn,
            "CREATE INDEX idx_audit_created ON audit_log(created_at DESC)",
        )
        .await?;

        ddl(
            conn,
            r#"
            CREATE TABLE notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                kind TEXT NOT NULL,
                payload TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .await?;

        ddl(
            conn,
            "CREATE INDEX idx_notifications_user ON notifications(user_id, created_at DESC)",
        )
        .await?;

        Ok(())
    }

    /// Create the catalog_cache table
    async fn create_catalog_cache_schema(conn: &mut SqliteConnection) -> Result<()> {
        ddl(
            conn,
            r#"
            CREATE TABLE catalog_cache (
                provider_key TEXT NOT NULL,
                kind TEXT NOT NULL,
                cache_key TEXT NOT NULL,
                payload TEXT NOT NULL,
                fetched_at INTEGER NOT NULL,
                ttl_seconds INTEGER NOT NULL,
                PRIMARY KEY (provider_key, kind, cache_key)
            )
            "#,
        )
        .await?;

        Ok(())
    }

    /// Record a migration version
    async fn record_migration(conn: &mut SqliteConnection, version: i32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration: {e}"
                )))
            })?;

        Ok(())
    }

    /// Close the database connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Execute a DDL statement, mapping failures to MigrationFailed
async fn ddl(conn: &mut SqliteConnection, sql: &str) -> Result<()> {
    sqlx::query(sql).execute(&mut *conn).await.map_err(|e| {
        Error::Database(DatabaseError::MigrationFailed(format!(
            "Migration statement failed: {e}"
        )))
    })?;
    Ok(())
}
