//! PostgreSQL attachment record store.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgRow;
use sqlx::{Connection, PgConnection, PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::debug;

use stowage_core::{
    AttachmentId, AttachmentRecord, AttachmentUpdate, CandidateSelection, Error, FieldChange,
    NewAttachment, RecordSession, RecordStore, ReferenceCounter, Result, StorageKey, UnitOfWork,
};

const RECORD_COLUMNS: &str = r#"id, name, inline_payload, storage_key, byte_size,
       verified_binary, index_content, index_media_type, created_at, updated_at"#;

/// PostgreSQL implementation of [`RecordStore`].
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_record(row: &PgRow) -> Result<AttachmentRecord> {
    let storage_key = row
        .get::<Option<String>, _>("storage_key")
        .map(|raw| StorageKey::parse(&raw))
        .transpose()?;

    Ok(AttachmentRecord {
        id: AttachmentId(row.get("id")),
        name: row.get("name"),
        inline_payload: row.get("inline_payload"),
        storage_key,
        byte_size: row.get("byte_size"),
        verified_binary: row.get("verified_binary"),
        index_content: row.get("index_content"),
        index_media_type: row.get("index_media_type"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn candidate_query(selection: CandidateSelection) -> &'static str {
    match selection {
        CandidateSelection::PendingMove => {
            r#"SELECT id FROM attachment
               WHERE storage_key IS NULL
                 AND inline_payload IS NOT NULL
                 AND octet_length(inline_payload) > 0
               ORDER BY id ASC
               LIMIT $1"#
        }
        CandidateSelection::UnverifiedBinary => {
            r#"SELECT id FROM attachment
               WHERE storage_key IS NOT NULL
                 AND NOT verified_binary
               ORDER BY id DESC
               LIMIT $1"#
        }
        CandidateSelection::Unindexed => {
            r#"SELECT id FROM attachment
               WHERE storage_key IS NOT NULL
                 AND (index_content IS NULL OR index_content = '')
               ORDER BY id DESC
               LIMIT $1"#
        }
    }
}

async fn fetch_record(conn: &mut PgConnection, id: AttachmentId) -> Result<AttachmentRecord> {
    let sql = format!("SELECT {} FROM attachment WHERE id = $1", RECORD_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.0)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("attachment {}", id)))?;
    row_to_record(&row)
}

fn push_optional<'a, T>(
    builder: &mut QueryBuilder<'a, Postgres>,
    column: &str,
    change: FieldChange<T>,
) where
    T: 'a + sqlx::Encode<'a, Postgres> + sqlx::Type<Postgres>,
{
    match change {
        FieldChange::Keep => {}
        FieldChange::Set(value) => {
            builder.push(", ").push(column).push(" = ").push_bind(value);
        }
        FieldChange::Clear => {
            builder.push(", ").push(column).push(" = NULL");
        }
    }
}

/// Build `UPDATE attachment SET ...` for the assignments in `update`.
fn build_update(id: AttachmentId, update: AttachmentUpdate) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("UPDATE attachment SET updated_at = NOW()");

    let storage_key = match update.storage_key {
        FieldChange::Keep => FieldChange::Keep,
        FieldChange::Set(key) => FieldChange::Set(key.to_string()),
        FieldChange::Clear => FieldChange::Clear,
    };

    push_optional(&mut builder, "inline_payload", update.inline_payload);
    push_optional(&mut builder, "storage_key", storage_key);
    if let Some(byte_size) = update.byte_size {
        builder.push(", byte_size = ").push_bind(byte_size);
    }
    if update.mark_verified_binary {
        builder.push(", verified_binary = TRUE");
    }
    push_optional(&mut builder, "index_content", update.index_content);
    push_optional(&mut builder, "index_media_type", update.index_media_type);

    builder.push(" WHERE id = ").push_bind(id.0);
    builder
}

#[async_trait]
impl ReferenceCounter for PgRecordStore {
    async fn count_references(&self, key: &StorageKey) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM attachment WHERE storage_key = $1",
        )
        .bind(key.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn select_candidates(
        &self,
        selection: CandidateSelection,
        limit: i64,
    ) -> Result<Vec<AttachmentId>> {
        let ids = sqlx::query_scalar::<_, i64>(candidate_query(selection))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        debug!(
            subsystem = "db",
            component = "attachments",
            op = "select_candidates",
            selection = ?selection,
            limit,
            found = ids.len(),
            "Selected batch candidates"
        );
        Ok(ids.into_iter().map(AttachmentId).collect())
    }

    async fn session(&self) -> Result<Box<dyn RecordSession>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgSession { conn }))
    }

    async fn insert(&self, record: NewAttachment) -> Result<AttachmentId> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO attachment (name, inline_payload, storage_key, byte_size)
               VALUES ($1, $2, $3, $4)
               RETURNING id"#,
        )
        .bind(&record.name)
        .bind(&record.inline_payload)
        .bind(record.storage_key.as_ref().map(|k| k.to_string()))
        .bind(record.byte_size)
        .fetch_one(&self.pool)
        .await?;
        Ok(AttachmentId(id))
    }

    async fn get(&self, id: AttachmentId) -> Result<AttachmentRecord> {
        let mut conn = self.pool.acquire().await?;
        fetch_record(&mut conn, id).await
    }

    async fn delete(&self, id: AttachmentId) -> Result<()> {
        let result = sqlx::query("DELETE FROM attachment WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("attachment {}", id)));
        }
        Ok(())
    }
}

/// Dedicated pooled connection, separate from whatever the caller holds.
pub struct PgSession {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl RecordSession for PgSession {
    async fn begin<'a>(&'a mut self) -> Result<Box<dyn UnitOfWork + 'a>> {
        let conn: &mut PgConnection = &mut self.conn;
        let tx = conn.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

/// One transaction per record. Dropping it rolls back.
pub struct PgUnitOfWork<'a> {
    tx: Transaction<'a, Postgres>,
}

#[async_trait]
impl<'a> UnitOfWork for PgUnitOfWork<'a> {
    async fn read(&mut self, id: AttachmentId) -> Result<AttachmentRecord> {
        fetch_record(&mut self.tx, id).await
    }

    async fn update(&mut self, id: AttachmentId, update: AttachmentUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        let mut builder = build_update(id, update);
        let result = builder.build().execute(&mut *self.tx).await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("attachment {}", id)));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Execute;
    use stowage_core::address_of;

    #[test]
    fn test_candidate_order_by_selection() {
        assert!(candidate_query(CandidateSelection::PendingMove).contains("ORDER BY id ASC"));
        assert!(candidate_query(CandidateSelection::UnverifiedBinary).contains("ORDER BY id DESC"));
        assert!(candidate_query(CandidateSelection::Unindexed).contains("ORDER BY id DESC"));
    }

    #[test]
    fn test_update_sql_for_move() {
        let update = AttachmentUpdate::moved_to(address_of(b"x"), 1);
        let mut builder = build_update(AttachmentId(9), update);
        let sql = builder.build().sql().to_string();
        assert!(sql.starts_with("UPDATE attachment SET updated_at = NOW()"));
        assert!(sql.contains("inline_payload = NULL"));
        assert!(sql.contains("storage_key = $1"));
        assert!(sql.contains("byte_size = $2"));
        assert!(sql.ends_with("WHERE id = $3"));
        assert!(!sql.contains("verified_binary"));
    }

    #[test]
    fn test_update_sql_only_raises_verified_flag() {
        let mut builder = build_update(AttachmentId(1), AttachmentUpdate::new().verified_binary());
        let sql = builder.build().sql().to_string();
        assert!(sql.contains("verified_binary = TRUE"));
    }

    #[test]
    fn test_update_sql_clears_media_type() {
        let update = AttachmentUpdate::new().with_index("--n/a--".to_string(), None);
        let mut builder = build_update(AttachmentId(1), update);
        let sql = builder.build().sql().to_string();
        assert!(sql.contains("index_content = $1"));
        assert!(sql.contains("index_media_type = NULL"));
    }
}
