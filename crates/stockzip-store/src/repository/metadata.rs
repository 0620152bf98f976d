//! # Sync Metadata Repository
//!
//! Small key/value table for sync bookkeeping that must survive restarts.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::{DbError, DbResult};

/// Time of the last sync pass in which at least one operation succeeded.
pub const LAST_SUCCESSFUL_SYNC: &str = "last_successful_sync";

/// Time the entity cache was last refreshed from the server.
pub const LAST_CACHE_SYNC: &str = "last_cache_sync";

/// Error message of the most recent failed operation, cleared on a clean pass.
pub const LAST_SYNC_ERROR: &str = "last_sync_error";

/// Repository for the `sync_metadata` table.
#[derive(Debug, Clone)]
pub struct SyncMetadataRepository {
    pool: SqlitePool,
}

impl SyncMetadataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncMetadataRepository { pool }
    }

    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM sync_metadata WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_metadata (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Removes a key. Returns false if it was not set.
    pub async fn remove(&self, key: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM sync_metadata WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Reads an RFC 3339 timestamp value.
    pub async fn get_timestamp(&self, key: &str) -> DbResult<Option<DateTime<Utc>>> {
        let Some(raw) = self.get(key).await? else {
            return Ok(None);
        };

        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|e| DbError::corrupt("value", key, e))
    }

    pub async fn set_timestamp(&self, key: &str, at: DateTime<Utc>) -> DbResult<()> {
        self.set(key, &at.to_rfc3339()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_set_overwrites() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sync_metadata();

        assert!(repo.get(LAST_SYNC_ERROR).await.unwrap().is_none());
        repo.set(LAST_SYNC_ERROR, "timeout").await.unwrap();
        repo.set(LAST_SYNC_ERROR, "Retry scheduled").await.unwrap();
        assert_eq!(repo.get(LAST_SYNC_ERROR).await.unwrap().as_deref(), Some("Retry scheduled"));

        assert!(repo.remove(LAST_SYNC_ERROR).await.unwrap());
        assert!(repo.get(LAST_SYNC_ERROR).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_timestamp_round_trip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sync_metadata();
        let at = Utc::now();

        repo.set_timestamp(LAST_SUCCESSFUL_SYNC, at).await.unwrap();
        assert_eq!(repo.get_timestamp(LAST_SUCCESSFUL_SYNC).await.unwrap(), Some(at));
        assert!(repo.get_timestamp(LAST_CACHE_SYNC).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_garbage_timestamp_is_corrupt() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sync_metadata();
        repo.set(LAST_CACHE_SYNC, "yesterday").await.unwrap();

        assert!(matches!(
            repo.get_timestamp(LAST_CACHE_SYNC).await,
            Err(DbError::CorruptRow { .. })
        ));
    }
}
