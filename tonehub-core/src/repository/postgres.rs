use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use tonehub_model::{
    CatalogEntry, DirtyMarkers, EntryId, EntryTag, EntryValue, FormatCategory,
    MimeType, Source, SourceId, Tag,
};
use tracing::info;
use uuid::Uuid;

use super::{CatalogRepository, EntryChanges, EntryRecord};
use crate::error::{IndexError, Result};

const ENTRY_COLUMNS: &str = "id, source_id, location, hash, size, format, media_type, \
     sub_type, modified_at, last_checked_at, enabled";

/// PostgreSQL catalog adapter. Each `apply_entry_changes` call runs in its
/// own transaction.
#[derive(Clone, Debug)]
pub struct PostgresCatalog {
    pool: PgPool,
}

impl PostgresCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply bundled migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| IndexError::Persistence(format!("migration failed: {e}")))?;
        info!("catalog migrations applied");
        Ok(())
    }

    pub async fn upsert_source(&self, source: &Source) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO catalog_sources (id, location, format_filter, enabled)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET location = EXCLUDED.location,
                format_filter = EXCLUDED.format_filter,
                enabled = EXCLUDED.enabled
            "#,
        )
        .bind(source.id.to_uuid())
        .bind(source.location.to_string_lossy().into_owned())
        .bind(source.format_filter.as_raw())
        .bind(source.enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn with_associations(
        conn: &mut PgConnection,
        entries: Vec<CatalogEntry>,
    ) -> Result<Vec<EntryRecord>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = entries.iter().map(|entry| entry.id.to_uuid()).collect();

        let tag_rows: Vec<EntryTagRow> = sqlx::query_as(
            r#"
            SELECT et.id, et.entry_id, et.namespace, et.type_code,
                   t.id AS tag_id, t.value AS tag_value
            FROM catalog_entry_tags et
            JOIN catalog_tags t ON t.id = et.tag_id
            WHERE et.entry_id = ANY($1)
            ORDER BY et.id
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await?;

        let value_rows: Vec<EntryValueRow> = sqlx::query_as(
            r#"
            SELECT id, entry_id, namespace, type_code, value
            FROM catalog_entry_values
            WHERE entry_id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await?;

        let mut records: Vec<EntryRecord> =
            entries.into_iter().map(EntryRecord::new).collect();
        let index: HashMap<Uuid, usize> = records
            .iter()
            .enumerate()
            .map(|(at, record)| (record.entry.id.to_uuid(), at))
            .collect();

        for row in tag_rows {
            if let Some(&at) = index.get(&row.entry_id) {
                records[at].tags.push(row.try_into()?);
            }
        }
        for row in value_rows {
            if let Some(&at) = index.get(&row.entry_id) {
                records[at].values.push(row.try_into()?);
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl CatalogRepository for PostgresCatalog {
    async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows: Vec<SourceRow> = sqlx::query_as(
            "SELECT id, location, format_filter, enabled FROM catalog_sources ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Source::from).collect())
    }

    async fn get_source(&self, id: SourceId) -> Result<Option<Source>> {
        let row: Option<SourceRow> = sqlx::query_as(
            "SELECT id, location, format_filter, enabled FROM catalog_sources WHERE id = $1",
        )
        .bind(id.to_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Source::from))
    }

    async fn entries_by_paths(
        &self,
        source: SourceId,
        locations: &[String],
    ) -> Result<Vec<EntryRecord>> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS} FROM catalog_entries \
             WHERE source_id = $1 AND location = ANY($2)"
        ))
        .bind(source.to_uuid())
        .bind(locations)
        .fetch_all(&mut *conn)
        .await?;
        let entries = rows.into_iter().map(CatalogEntry::from).collect();
        Self::with_associations(&mut *conn, entries).await
    }

    async fn entries_by_hash(
        &self,
        source: SourceId,
        hash: &str,
    ) -> Result<Vec<EntryRecord>> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS} FROM catalog_entries \
             WHERE source_id = $1 AND hash = $2"
        ))
        .bind(source.to_uuid())
        .bind(hash)
        .fetch_all(&mut *conn)
        .await?;
        let entries = rows.into_iter().map(CatalogEntry::from).collect();
        Self::with_associations(&mut *conn, entries).await
    }

    async fn find_tag_by_value(&self, value: &str) -> Result<Option<Tag>> {
        let row: Option<(Uuid, String)> =
            sqlx::query_as("SELECT id, value FROM catalog_tags WHERE value = $1")
                .bind(value)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, value)| Tag {
            id: id.into(),
            value,
        }))
    }

    async fn apply_entry_changes(&self, changes: EntryChanges) -> Result<EntryRecord> {
        let mut tx = self.pool.begin().await?;
        let entry = &changes.entry;
        let entry_id = entry.id.to_uuid();

        sqlx::query(
            r#"
            INSERT INTO catalog_entries (
                id, source_id, location, hash, size, format, media_type,
                sub_type, modified_at, last_checked_at, enabled
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE
            SET location = EXCLUDED.location,
                hash = EXCLUDED.hash,
                size = EXCLUDED.size,
                format = EXCLUDED.format,
                media_type = EXCLUDED.media_type,
                sub_type = EXCLUDED.sub_type,
                modified_at = EXCLUDED.modified_at,
                last_checked_at = EXCLUDED.last_checked_at,
                enabled = EXCLUDED.enabled
            "#,
        )
        .bind(entry_id)
        .bind(entry.source_id.to_uuid())
        .bind(&entry.location)
        .bind(&entry.hash)
        .bind(i64::try_from(entry.size).unwrap_or(i64::MAX))
        .bind(entry.format.as_raw())
        .bind(&entry.mime.media_type)
        .bind(&entry.mime.sub_type)
        .bind(entry.modified_at)
        .bind(entry.last_checked_at)
        .bind(entry.enabled)
        .execute(&mut *tx)
        .await?;

        if !changes.remove_tags.is_empty() {
            let ids: Vec<Uuid> = changes.remove_tags.iter().map(|id| id.to_uuid()).collect();
            sqlx::query("DELETE FROM catalog_entry_tags WHERE entry_id = $1 AND id = ANY($2)")
                .bind(entry_id)
                .bind(&ids)
                .execute(&mut *tx)
                .await?;
        }
        if !changes.remove_values.is_empty() {
            let ids: Vec<Uuid> =
                changes.remove_values.iter().map(|id| id.to_uuid()).collect();
            sqlx::query(
                "DELETE FROM catalog_entry_values WHERE entry_id = $1 AND id = ANY($2)",
            )
            .bind(entry_id)
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        }

        for added in &changes.add_tags {
            // The no-op update makes RETURNING yield the existing row too.
            let (tag_id,): (Uuid,) = sqlx::query_as(
                r#"
                INSERT INTO catalog_tags (id, value) VALUES ($1, $2)
                ON CONFLICT (value) DO UPDATE SET value = EXCLUDED.value
                RETURNING id
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(&added.value)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO catalog_entry_tags (id, entry_id, tag_id, namespace, type_code)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(entry_id)
            .bind(tag_id)
            .bind(&added.namespace)
            .bind(i64::from(added.type_code))
            .execute(&mut *tx)
            .await?;
        }

        for added in &changes.add_values {
            sqlx::query(
                r#"
                INSERT INTO catalog_entry_values (id, entry_id, namespace, type_code, value)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(entry_id)
            .bind(&added.namespace)
            .bind(i64::from(added.type_code))
            .bind(&added.value)
            .execute(&mut *tx)
            .await?;
        }

        let mut stored = changes.entry.clone();
        stored.dirty = DirtyMarkers::default();
        let mut records = Self::with_associations(&mut *tx, vec![stored]).await?;
        tx.commit().await?;

        records
            .pop()
            .ok_or_else(|| IndexError::Internal("committed entry vanished".into()))
    }

    async fn mark_seen(&self, entry: EntryId, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE catalog_entries SET last_checked_at = $2, enabled = TRUE WHERE id = $1",
        )
        .bind(entry.to_uuid())
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(IndexError::NotFound(format!("entry {entry}")));
        }
        Ok(())
    }

    async fn entries_checked_before(
        &self,
        source: SourceId,
        before: DateTime<Utc>,
        only_enabled: bool,
    ) -> Result<Vec<CatalogEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS} FROM catalog_entries \
             WHERE source_id = $1 AND last_checked_at < $2 AND ($3 = FALSE OR enabled) \
             ORDER BY last_checked_at"
        ))
        .bind(source.to_uuid())
        .bind(before)
        .bind(only_enabled)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(CatalogEntry::from).collect())
    }

    async fn disable_entry(&self, entry: EntryId) -> Result<()> {
        sqlx::query("UPDATE catalog_entries SET enabled = FALSE WHERE id = $1")
            .bind(entry.to_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_entry(&self, entry: EntryId) -> Result<()> {
        // Associations go with the entry through ON DELETE CASCADE.
        sqlx::query("DELETE FROM catalog_entries WHERE id = $1")
            .bind(entry.to_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_orphan_tags(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM catalog_tags t
            WHERE NOT EXISTS (
                SELECT 1 FROM catalog_entry_tags et WHERE et.tag_id = t.id
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: Uuid,
    location: String,
    format_filter: i32,
    enabled: bool,
}

impl From<SourceRow> for Source {
    fn from(row: SourceRow) -> Self {
        Source {
            id: row.id.into(),
            location: PathBuf::from(row.location),
            format_filter: FormatCategory::from_raw(i64::from(row.format_filter)),
            enabled: row.enabled,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: Uuid,
    source_id: Uuid,
    location: String,
    hash: String,
    size: i64,
    format: i32,
    media_type: String,
    sub_type: String,
    modified_at: DateTime<Utc>,
    last_checked_at: DateTime<Utc>,
    enabled: bool,
}

impl From<EntryRow> for CatalogEntry {
    fn from(row: EntryRow) -> Self {
        CatalogEntry {
            id: row.id.into(),
            source_id: row.source_id.into(),
            location: row.location,
            hash: row.hash,
            size: u64::try_from(row.size).unwrap_or_default(),
            format: FormatCategory::from_raw(i64::from(row.format)),
            mime: MimeType::new(row.media_type, row.sub_type),
            modified_at: row.modified_at,
            last_checked_at: row.last_checked_at,
            enabled: row.enabled,
            dirty: DirtyMarkers::default(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct EntryTagRow {
    id: Uuid,
    entry_id: Uuid,
    namespace: String,
    type_code: i64,
    tag_id: Uuid,
    tag_value: String,
}

impl TryFrom<EntryTagRow> for EntryTag {
    type Error = IndexError;

    fn try_from(row: EntryTagRow) -> Result<Self> {
        Ok(EntryTag {
            id: row.id.into(),
            entry_id: row.entry_id.into(),
            namespace: row.namespace,
            type_code: type_code(row.type_code)?,
            tag: Tag {
                id: row.tag_id.into(),
                value: row.tag_value,
            },
        })
    }
}

#[derive(sqlx::FromRow)]
struct EntryValueRow {
    id: Uuid,
    entry_id: Uuid,
    namespace: String,
    type_code: i64,
    value: serde_json::Value,
}

impl TryFrom<EntryValueRow> for EntryValue {
    type Error = IndexError;

    fn try_from(row: EntryValueRow) -> Result<Self> {
        Ok(EntryValue {
            id: row.id.into(),
            entry_id: row.entry_id.into(),
            namespace: row.namespace,
            type_code: type_code(row.type_code)?,
            value: row.value,
        })
    }
}

fn type_code(raw: i64) -> Result<u32> {
    u32::try_from(raw)
        .map_err(|_| IndexError::Internal(format!("type code {raw} out of range")))
}
