//! # Database Pool Management
//!
//! Connection pool creation and configuration for SQLite, plus the snapshot
//! boundary the sync agent uses to persist its queue.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Database Connection Pool                           │
//! │                                                                         │
//! │  OfflineSyncAgent::open                                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbConfig::new(path) ← Configure pool settings                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config).await ← Create pool + run migrations            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────┐                           │
//! │  │            SqlitePool                    │                           │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐       │                           │
//! │  │  │Conn1│ │Conn2│ │Conn3│ │Conn4│ ...   │  (max_connections)        │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘       │                           │
//! │  └─────────────────────────────────────────┘                           │
//! │       │                                                                 │
//! │       ├──► pending_operations()   (pending_changes)                    │
//! │       ├──► cached_entities()      (cached_items)                       │
//! │       ├──► sync_metadata()        (sync_metadata)                      │
//! │       ├──► scan_sessions()        (scan_sessions)                      │
//! │       └──► save_snapshot / load_snapshot  (one transaction)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! File databases run in WAL mode so the report binary can read while the
//! agent writes.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use stockzip_core::QueueSnapshot;

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::entities::{self, CachedEntityRepository};
use crate::repository::metadata::SyncMetadataRepository;
use crate::repository::operations::{self, PendingOperationRepository};
use crate::repository::scan_sessions::ScanSessionRepository;

/// Path that selects a private in-memory database.
const IN_MEMORY_PATH: &str = ":memory:";

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/path/to/offline.db")
///     .max_connections(5)
///     .min_connections(1);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file, or `:memory:`.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Connection timeout duration.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection. `None` keeps connections
    /// open, which an in-memory database needs to survive.
    pub idle_timeout: Option<Duration>,

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    ///
    /// The file is created if it doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            run_migrations: true,
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets whether to run migrations on connect.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// Each pool gets its own private database.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(IN_MEMORY_PATH),
            max_connections: 1, // In-memory requires single connection
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: None,
            run_migrations: true,
        }
    }

    /// Returns true when this config selects an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY_PATH
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        if self.is_in_memory() {
            return SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()));
        }

        Ok(SqliteConnectOptions::new()
            .filename(&self.database_path)
            // Readers don't block writers, writers don't block readers
            .journal_mode(SqliteJournalMode::Wal)
            // May lose the last transaction on power loss, never corrupts
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true))
    }
}

// =============================================================================
// Database
// =============================================================================

/// Main database handle providing repository access.
#[derive(Debug, Clone)]
pub struct Database {
    /// The SQLite connection pool.
    pool: SqlitePool,
}

impl Database {
    /// Creates a new database connection pool.
    ///
    /// ## What This Does
    /// 1. Creates the database file if it doesn't exist
    /// 2. Configures WAL mode and NORMAL synchronous for file databases
    /// 3. Creates the connection pool
    /// 4. Runs migrations (if enabled)
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Initializing database connection"
        );

        let connect_options = config.connect_options()?;
        debug!("Connection options configured");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(config.idle_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        let db = Database { pool };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Applies all pending migrations. Idempotent.
    pub async fn run_migrations(&self) -> DbResult<()> {
        info!("Running database migrations");
        migrations::run_migrations(&self.pool).await?;
        info!("Migrations complete");
        Ok(())
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the pending operation (queue) repository.
    pub fn pending_operations(&self) -> PendingOperationRepository {
        PendingOperationRepository::new(self.pool.clone())
    }

    /// Returns the cached entity (mirror) repository.
    pub fn cached_entities(&self) -> CachedEntityRepository {
        CachedEntityRepository::new(self.pool.clone())
    }

    /// Returns the sync metadata repository.
    pub fn sync_metadata(&self) -> SyncMetadataRepository {
        SyncMetadataRepository::new(self.pool.clone())
    }

    /// Returns the scan session repository.
    pub fn scan_sessions(&self) -> ScanSessionRepository {
        ScanSessionRepository::new(self.pool.clone())
    }

    // =========================================================================
    // Snapshot Boundary
    // =========================================================================

    /// Replaces the stored queue and mirror with `snapshot` in one transaction.
    ///
    /// A crash mid-write leaves the previous snapshot intact.
    pub async fn save_snapshot(&self, snapshot: &QueueSnapshot) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM pending_changes")
            .execute(&mut *tx)
            .await?;
        for op in &snapshot.operations {
            operations::write(&mut *tx, op).await?;
        }

        sqlx::query("DELETE FROM cached_items")
            .execute(&mut *tx)
            .await?;
        for entity in &snapshot.entities {
            entities::write(&mut *tx, entity).await?;
        }

        tx.commit().await?;

        debug!(
            operations = snapshot.operations.len(),
            entities = snapshot.entities.len(),
            "Queue snapshot saved"
        );
        Ok(())
    }

    /// Loads the stored queue and mirror.
    pub async fn load_snapshot(&self) -> DbResult<QueueSnapshot> {
        let operations = self.pending_operations().list_all().await?;
        let entities = self.cached_entities().list_all().await?;

        debug!(
            operations = operations.len(),
            entities = entities.len(),
            "Queue snapshot loaded"
        );
        Ok(QueueSnapshot {
            operations,
            entities,
        })
    }

    /// Closes the database connection pool.
    ///
    /// After calling close, all repository operations will fail.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Checks if the database can execute queries.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stockzip_core::{EntityType, FieldMap, MutationQueue};

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.health_check().await);
    }

    #[tokio::test]
    async fn test_in_memory_databases_are_private() {
        let a = Database::new(DbConfig::in_memory()).await.unwrap();
        let b = Database::new(DbConfig::in_memory()).await.unwrap();

        a.sync_metadata().set("k", "v").await.unwrap();
        assert!(b.sync_metadata().get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = DbConfig::new("/tmp/test.db")
            .max_connections(10)
            .min_connections(2);

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert!(!config.is_in_memory());
        assert!(DbConfig::in_memory().is_in_memory());
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline.db");

        let mut queue = MutationQueue::new();
        let mut fields = FieldMap::new();
        fields.insert("name".into(), json!("Widget"));
        fields.insert("barcode".into(), json!("0001"));
        let receipt = queue.enqueue_create(EntityType::Item, fields);
        queue.enqueue_quantity_adjustment(&receipt.optimistic_id, 4);

        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        db.save_snapshot(&queue.snapshot()).await.unwrap();
        db.close().await;

        let reopened = Database::new(DbConfig::new(&path)).await.unwrap();
        let snapshot = reopened.load_snapshot().await.unwrap();
        assert_eq!(snapshot, queue.snapshot());
    }

    #[tokio::test]
    async fn test_save_snapshot_replaces_previous() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut queue = MutationQueue::new();
        queue.enqueue_update("item-1", FieldMap::new());
        db.save_snapshot(&queue.snapshot()).await.unwrap();

        queue.clear();
        db.save_snapshot(&queue.snapshot()).await.unwrap();

        let snapshot = db.load_snapshot().await.unwrap();
        assert!(snapshot.operations.is_empty());
        assert!(snapshot.entities.is_empty());
    }
}
