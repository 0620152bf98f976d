//! # Scan Session Repository
//!
//! Persists batch scanning sessions in the `scan_sessions` table.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use stockzip_core::{ScanEntry, ScanSession};

use crate::error::{DbError, DbResult};

const SELECT_COLUMNS: &str = r#"
    SELECT id, name, entries, created_at, updated_at, completed_at
    FROM scan_sessions
"#;

#[derive(Debug, FromRow)]
struct ScanSessionRow {
    id: String,
    name: Option<String>,
    entries: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ScanSessionRow> for ScanSession {
    type Error = DbError;

    fn try_from(row: ScanSessionRow) -> DbResult<Self> {
        let entries: Vec<ScanEntry> = serde_json::from_str(&row.entries)
            .map_err(|e| DbError::corrupt("entries", &row.id, e))?;

        Ok(ScanSession {
            id: row.id,
            name: row.name,
            entries,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

/// Repository for scan sessions.
#[derive(Debug, Clone)]
pub struct ScanSessionRepository {
    pool: SqlitePool,
}

impl ScanSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ScanSessionRepository { pool }
    }

    /// Inserts a session or overwrites the stored copy.
    pub async fn save(&self, session: &ScanSession) -> DbResult<()> {
        let entries = serde_json::to_string(&session.entries)
            .map_err(|e| DbError::corrupt("entries", &session.id, e))?;

        sqlx::query(
            r#"
            INSERT INTO scan_sessions (id, name, entries, created_at, updated_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                entries = excluded.entries,
                updated_at = excluded.updated_at,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(&session.id)
        .bind(&session.name)
        .bind(entries)
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(session.completed_at)
        .execute(&self.pool)
        .await?;

        debug!(
            session_id = %session.id,
            entries = session.entries.len(),
            active = session.is_active(),
            "Scan session saved"
        );
        Ok(())
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<ScanSession>> {
        let row: Option<ScanSessionRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ScanSession::try_from).transpose()
    }

    /// The most recently touched session that is not completed.
    pub async fn active(&self) -> DbResult<Option<ScanSession>> {
        let row: Option<ScanSessionRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE completed_at IS NULL ORDER BY updated_at DESC, rowid DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(ScanSession::try_from).transpose()
    }

    /// Every session, newest first.
    pub async fn list_all(&self) -> DbResult<Vec<ScanSession>> {
        let rows: Vec<ScanSessionRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY created_at DESC, rowid DESC"))
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(ScanSession::try_from).collect()
    }

    /// Deletes a session. Returns false if it did not exist.
    pub async fn delete(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM scan_sessions WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
