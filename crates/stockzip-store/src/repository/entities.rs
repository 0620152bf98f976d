//! # Cached Entity Repository
//!
//! Persists the optimistic mirror in the `cached_items` table.
//!
//! The `barcode` and `sku` columns are copied out of the JSON fields on every
//! write so scanner lookups can hit an index instead of parsing JSON.

use chrono::Utc;
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

use stockzip_core::{CachedEntity, FieldMap, SecondaryKey};

use crate::error::{DbError, DbResult};

const SELECT_COLUMNS: &str = "SELECT id, entity_type, fields FROM cached_items";

#[derive(Debug, FromRow)]
struct CachedItemRow {
    id: String,
    entity_type: String,
    fields: String,
}

impl TryFrom<CachedItemRow> for CachedEntity {
    type Error = DbError;

    fn try_from(row: CachedItemRow) -> DbResult<Self> {
        let entity_type = row
            .entity_type
            .parse()
            .map_err(|e| DbError::corrupt("entity_type", &row.id, e))?;
        let fields: FieldMap =
            serde_json::from_str(&row.fields).map_err(|e| DbError::corrupt("fields", &row.id, e))?;

        Ok(CachedEntity::new(row.id, entity_type, fields))
    }
}

/// Inserts or replaces one entity row on an open connection.
pub(crate) async fn write(conn: &mut SqliteConnection, entity: &CachedEntity) -> DbResult<()> {
    let fields = serde_json::to_string(&entity.fields)
        .map_err(|e| DbError::corrupt("fields", &entity.id, e))?;

    sqlx::query(
        r#"
        INSERT INTO cached_items (id, entity_type, barcode, sku, fields, cached_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(id) DO UPDATE SET
            entity_type = excluded.entity_type,
            barcode = excluded.barcode,
            sku = excluded.sku,
            fields = excluded.fields,
            cached_at = excluded.cached_at
        "#,
    )
    .bind(&entity.id)
    .bind(entity.entity_type.as_str())
    .bind(entity.str_field(SecondaryKey::Barcode.field_name()))
    .bind(entity.str_field(SecondaryKey::Sku.field_name()))
    .bind(fields)
    .bind(Utc::now())
    .execute(conn)
    .await?;

    Ok(())
}

/// Repository for the persisted mirror.
#[derive(Debug, Clone)]
pub struct CachedEntityRepository {
    pool: SqlitePool,
}

impl CachedEntityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CachedEntityRepository { pool }
    }

    /// Inserts or replaces an entity.
    pub async fn upsert(&self, entity: &CachedEntity) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        write(&mut conn, entity).await
    }

    /// Inserts or replaces a batch of entities (server refresh).
    ///
    /// Runs in one transaction; readers see either none or all of the batch.
    /// Rows not in the batch are kept.
    pub async fn upsert_all(&self, entities: &[CachedEntity]) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        for entity in entities {
            write(&mut *tx, entity).await?;
        }
        tx.commit().await?;

        debug!(count = entities.len(), "Entity batch cached");
        Ok(())
    }

    /// Gets an entity by primary id.
    pub async fn get(&self, id: &str) -> DbResult<Option<CachedEntity>> {
        let row: Option<CachedItemRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(CachedEntity::try_from).transpose()
    }

    /// Looks an entity up by barcode, then by SKU.
    pub async fn find_by_secondary_key(&self, key: &str) -> DbResult<Option<CachedEntity>> {
        for scheme in SecondaryKey::LOOKUP_ORDER {
            let sql = format!(
                "{SELECT_COLUMNS} WHERE {} = ?1 ORDER BY cached_at DESC LIMIT 1",
                scheme.field_name()
            );
            let row: Option<CachedItemRow> = sqlx::query_as(&sql)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

            if let Some(row) = row {
                return CachedEntity::try_from(row).map(Some);
            }
        }
        Ok(None)
    }

    /// Every cached entity, ordered by id.
    pub async fn list_all(&self) -> DbResult<Vec<CachedEntity>> {
        let rows: Vec<CachedItemRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY id ASC"))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(CachedEntity::try_from).collect()
    }

    /// Removes an entity. Returns false if it was not cached.
    pub async fn remove(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM cached_items WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cached_items")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
