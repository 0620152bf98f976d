//! # Pending Operation Repository
//!
//! Persists the mutation queue in the `pending_changes` table.
//!
//! ## Row Layout
//! ```text
//! ┌──────────┬─────────────┬───────────┬────────────────────────────┬───────────┬─────────┬─────┐
//! │ id       │ entity_type │ entity_id │ payload                    │ timestamp │ status  │ ... │
//! ├──────────┼─────────────┼───────────┼────────────────────────────┼───────────┼─────────┼─────┤
//! │ 6f1c…    │ item        │ item-1    │ {"kind":"update",          │ 2026-…    │ pending │     │
//! │          │             │           │  "patch":{"quantity":45}}  │           │         │     │
//! └──────────┴─────────────┴───────────┴────────────────────────────┴───────────┴─────────┴─────┘
//! ```
//!
//! Rows come back in enqueue order (`timestamp`, then insertion `rowid`).

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

use stockzip_core::{OperationPayload, OperationStatus, QueuedOperation};

use crate::error::{DbError, DbResult};

const SELECT_COLUMNS: &str = r#"
    SELECT id, entity_type, entity_id, payload, timestamp,
           status, retry_count, max_retries, last_error
    FROM pending_changes
"#;

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, FromRow)]
struct PendingChangeRow {
    id: String,
    entity_type: String,
    entity_id: String,
    payload: String,
    timestamp: DateTime<Utc>,
    status: String,
    retry_count: i64,
    max_retries: i64,
    last_error: Option<String>,
}

impl TryFrom<PendingChangeRow> for QueuedOperation {
    type Error = DbError;

    fn try_from(row: PendingChangeRow) -> DbResult<Self> {
        let entity_type = row
            .entity_type
            .parse()
            .map_err(|e| DbError::corrupt("entity_type", &row.id, e))?;
        let status: OperationStatus = row
            .status
            .parse()
            .map_err(|e| DbError::corrupt("status", &row.id, e))?;
        let payload: OperationPayload = serde_json::from_str(&row.payload)
            .map_err(|e| DbError::corrupt("payload", &row.id, e))?;
        let retry_count =
            u32::try_from(row.retry_count).map_err(|e| DbError::corrupt("retry_count", &row.id, e))?;
        let max_retries =
            u32::try_from(row.max_retries).map_err(|e| DbError::corrupt("max_retries", &row.id, e))?;

        Ok(QueuedOperation {
            id: row.id,
            entity_type,
            entity_id: row.entity_id,
            payload,
            timestamp: row.timestamp,
            status,
            retry_count,
            max_retries,
            last_error: row.last_error,
        })
    }
}

fn decode_all(rows: Vec<PendingChangeRow>) -> DbResult<Vec<QueuedOperation>> {
    rows.into_iter().map(QueuedOperation::try_from).collect()
}

/// Inserts or overwrites one operation row on an open connection.
///
/// Used by the repository and by `Database::save_snapshot` inside its
/// transaction.
pub(crate) async fn write(conn: &mut SqliteConnection, op: &QueuedOperation) -> DbResult<()> {
    let payload =
        serde_json::to_string(&op.payload).map_err(|e| DbError::corrupt("payload", &op.id, e))?;

    sqlx::query(
        r#"
        INSERT INTO pending_changes (
            id, entity_type, entity_id, payload, timestamp,
            status, retry_count, max_retries, last_error
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            retry_count = excluded.retry_count,
            max_retries = excluded.max_retries,
            last_error = excluded.last_error
        "#,
    )
    .bind(&op.id)
    .bind(op.entity_type.as_str())
    .bind(&op.entity_id)
    .bind(payload)
    .bind(op.timestamp)
    .bind(op.status.as_str())
    .bind(i64::from(op.retry_count))
    .bind(i64::from(op.max_retries))
    .bind(&op.last_error)
    .execute(conn)
    .await?;

    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the persisted mutation queue.
#[derive(Debug, Clone)]
pub struct PendingOperationRepository {
    pool: SqlitePool,
}

impl PendingOperationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PendingOperationRepository { pool }
    }

    /// Inserts an operation, or updates its lifecycle columns if it exists.
    ///
    /// Payload, entity and timestamp are immutable once written.
    pub async fn upsert(&self, op: &QueuedOperation) -> DbResult<()> {
        debug!(
            operation_id = %op.id,
            kind = %op.kind(),
            status = %op.status,
            "Persisting operation"
        );

        let mut conn = self.pool.acquire().await?;
        write(&mut conn, op).await
    }

    /// Gets an operation by id.
    pub async fn get(&self, id: &str) -> DbResult<Option<QueuedOperation>> {
        let row: Option<PendingChangeRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(QueuedOperation::try_from).transpose()
    }

    /// Every stored operation, in enqueue order.
    pub async fn list_all(&self) -> DbResult<Vec<QueuedOperation>> {
        let rows: Vec<PendingChangeRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY timestamp ASC, rowid ASC"))
                .fetch_all(&self.pool)
                .await?;

        decode_all(rows)
    }

    /// Operations in one status, in enqueue order.
    pub async fn list_by_status(&self, status: OperationStatus) -> DbResult<Vec<QueuedOperation>> {
        let rows: Vec<PendingChangeRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE status = ?1 ORDER BY timestamp ASC, rowid ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        decode_all(rows)
    }

    /// Counts operations in one status.
    pub async fn count_by_status(&self, status: OperationStatus) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_changes WHERE status = ?1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Deletes completed operations. Returns the number removed.
    pub async fn delete_completed(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM pending_changes WHERE status = 'completed'")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Moves rows stranded in `syncing` back to `pending`.
    pub async fn requeue_syncing(&self) -> DbResult<u64> {
        let result =
            sqlx::query("UPDATE pending_changes SET status = 'pending' WHERE status = 'syncing'")
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use serde_json::json;
    use stockzip_core::{EntityType, FieldMap, MutationQueue};

    async fn setup() -> (Database, MutationQueue) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        (db, MutationQueue::new())
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let (db, mut queue) = setup().await;
        let mut patch = FieldMap::new();
        patch.insert("quantity".into(), json!(45));
        let id = queue.enqueue_update("item-1", patch).operation_id;

        let repo = db.pending_operations();
        repo.upsert(queue.get(&id).unwrap()).await.unwrap();

        let stored = repo.get(&id).await.unwrap().unwrap();
        assert_eq!(&stored, queue.get(&id).unwrap());
        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_updates_lifecycle_columns() {
        let (db, mut queue) = setup().await;
        let id = queue.enqueue_delete(EntityType::Item, "item-1").operation_id;
        let repo = db.pending_operations();
        repo.upsert(queue.get(&id).unwrap()).await.unwrap();

        queue.begin_sync(&id).unwrap();
        queue.record_failure(&id, "timeout").unwrap();
        repo.upsert(queue.get(&id).unwrap()).await.unwrap();

        let stored = repo.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.last_error.as_deref(), Some("timeout"));
        assert_eq!(repo.count_by_status(OperationStatus::Pending).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_keeps_enqueue_order() {
        let (db, mut queue) = setup().await;
        for delta in 1..=5 {
            queue.enqueue_quantity_adjustment("item-1", delta);
        }
        let repo = db.pending_operations();
        for op in queue.all().iter().rev() {
            repo.upsert(op).await.unwrap();
        }

        let stored: Vec<String> = repo.list_all().await.unwrap().into_iter().map(|op| op.id).collect();
        let expected: Vec<String> = queue.all().into_iter().map(|op| op.id).collect();
        assert_eq!(stored, expected);
    }

    #[tokio::test]
    async fn test_requeue_syncing_and_delete_completed() {
        let (db, mut queue) = setup().await;
        let stranded = queue.enqueue_update("item-1", FieldMap::new()).operation_id;
        let done = queue.enqueue_update("item-2", FieldMap::new()).operation_id;
        queue.begin_sync(&stranded).unwrap();
        queue.begin_sync(&done).unwrap();
        queue.mark_completed(&done).unwrap();

        let repo = db.pending_operations();
        for op in queue.all() {
            repo.upsert(&op).await.unwrap();
        }

        assert_eq!(repo.requeue_syncing().await.unwrap(), 1);
        assert_eq!(
            repo.list_by_status(OperationStatus::Pending).await.unwrap()[0].id,
            stranded
        );

        assert_eq!(repo.delete_completed().await.unwrap(), 1);
        assert!(repo.get(&done).await.unwrap().is_none());
        assert_eq!(repo.delete_completed().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_reported() {
        let (db, mut queue) = setup().await;
        let id = queue.enqueue_update("item-1", FieldMap::new()).operation_id;
        let repo = db.pending_operations();
        repo.upsert(queue.get(&id).unwrap()).await.unwrap();

        sqlx::query("UPDATE pending_changes SET payload = 'not json' WHERE id = ?1")
            .bind(&id)
            .execute(db.pool())
            .await
            .unwrap();

        let err = repo.get(&id).await.unwrap_err();
        assert!(matches!(err, DbError::CorruptRow { ref column, .. } if column == "payload"));
    }
}
