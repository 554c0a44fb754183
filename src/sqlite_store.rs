//! SQLite implementations of the core store traits.
//!
//! Natural-key lookups compare every key column with SQLite's null-safe
//! `IS` operator, so a missing component matches a missing component and
//! re-ingesting a record with an absent study or series UID still finds its
//! existing row.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::SqlitePool;

use dicom_sink_core::keys::{KeyModel, NaturalKey};
use dicom_sink_core::store::{
    next_revision, ColumnStore, ContentStore, DocumentStore, IndexStore, StoreError, StoreResult,
};
use dicom_sink_core::tag::Tag;

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.into())
}

/// `t00100020 IS ? AND t0020000d IS ? AND ...`
fn key_predicate(keys: &KeyModel) -> String {
    keys.natural_key
        .iter()
        .map(|t| format!("{} IS ?", t.json_key()))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn key_column_list(keys: &KeyModel) -> String {
    keys.natural_key
        .iter()
        .map(|t| t.json_key())
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Index and tags rows in `dicom_index` / `dicom_tags`.
pub struct SqliteIndexStore {
    pool: SqlitePool,
    keys: KeyModel,
}

impl SqliteIndexStore {
    pub fn new(pool: SqlitePool, keys: KeyModel) -> Self {
        Self { pool, keys }
    }

    fn descriptive_column(&self, tag: Tag) -> StoreResult<String> {
        if self.keys.descriptive.contains(&tag) {
            Ok(tag.json_key())
        } else {
            Err(anyhow::anyhow!("{tag} is not an index column").into())
        }
    }
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    async fn find_index_row(&self, key: &NaturalKey) -> StoreResult<Option<i64>> {
        let sql = format!(
            "SELECT id FROM dicom_index WHERE {} LIMIT 1",
            key_predicate(&self.keys)
        );
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for component in key.components() {
            query = query.bind(component);
        }
        query.fetch_optional(&self.pool).await.map_err(backend)
    }

    async fn insert_index_row(&self, key: &NaturalKey, columns: &[(Tag, String)]) -> StoreResult<i64> {
        let mut names = key_column_list(&self.keys);
        for (tag, _) in columns {
            names.push_str(", ");
            names.push_str(&self.descriptive_column(*tag)?);
        }
        let sql = format!(
            "INSERT INTO dicom_index ({names}) VALUES ({})",
            placeholders(4 + columns.len())
        );
        let mut query = sqlx::query(&sql);
        for component in key.components() {
            query = query.bind(component);
        }
        for (_, value) in columns {
            query = query.bind(value.as_str());
        }
        let result = query.execute(&self.pool).await.map_err(backend)?;
        Ok(result.last_insert_rowid())
    }

    async fn update_index_row(&self, id: i64, columns: &[(Tag, String)]) -> StoreResult<()> {
        if columns.is_empty() {
            return Ok(());
        }
        let assignments = columns
            .iter()
            .map(|(tag, _)| self.descriptive_column(*tag).map(|c| format!("{c} = ?")))
            .collect::<StoreResult<Vec<_>>>()?
            .join(", ");
        let sql = format!("UPDATE dicom_index SET {assignments} WHERE id = ?");
        let mut query = sqlx::query(&sql);
        for (_, value) in columns {
            query = query.bind(value.as_str());
        }
        query.bind(id).execute(&self.pool).await.map_err(backend)?;
        Ok(())
    }

    async fn tags_row_exists(&self, key: &NaturalKey) -> StoreResult<bool> {
        let sql = format!(
            "SELECT COUNT(*) > 0 FROM dicom_tags WHERE {}",
            key_predicate(&self.keys)
        );
        let mut query = sqlx::query_scalar::<_, bool>(&sql);
        for component in key.components() {
            query = query.bind(component);
        }
        query.fetch_one(&self.pool).await.map_err(backend)
    }

    async fn insert_tags_row(&self, key: &NaturalKey, document: &str) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO dicom_tags ({}, tags) VALUES ({})",
            key_column_list(&self.keys),
            placeholders(5)
        );
        let mut query = sqlx::query(&sql);
        for component in key.components() {
            query = query.bind(component);
        }
        query
            .bind(document)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn update_tags_row(&self, key: &NaturalKey, document: &str) -> StoreResult<()> {
        let sql = format!(
            "UPDATE dicom_tags SET tags = ? WHERE {}",
            key_predicate(&self.keys)
        );
        let mut query = sqlx::query(&sql).bind(document);
        for component in key.components() {
            query = query.bind(component);
        }
        query.execute(&self.pool).await.map_err(backend)?;
        Ok(())
    }
}

/// Append-only raw content in `dicom_image`.
pub struct SqliteContentStore {
    pool: SqlitePool,
    keys: KeyModel,
}

impl SqliteContentStore {
    pub fn new(pool: SqlitePool, keys: KeyModel) -> Self {
        Self { pool, keys }
    }
}

#[async_trait]
impl ContentStore for SqliteContentStore {
    async fn insert_content(&self, key: &NaturalKey, bytes: &[u8]) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO dicom_image ({}, data, ingested_at) VALUES ({})",
            key_column_list(&self.keys),
            placeholders(6)
        );
        let mut query = sqlx::query(&sql);
        for component in key.components() {
            query = query.bind(component);
        }
        query
            .bind(bytes)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

/// Revisioned documents in `dicom_documents`.
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn body_text(body: &Map<String, Value>) -> StoreResult<String> {
    serde_json::to_string(body).map_err(|e| StoreError::Backend(e.into()))
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn fetch_revision(&self, id: &str) -> StoreResult<Option<String>> {
        sqlx::query_scalar("SELECT rev FROM dicom_documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)
    }

    async fn create_document(&self, id: &str, body: &Map<String, Value>) -> StoreResult<String> {
        let text = body_text(body)?;
        let rev = next_revision(None, text.as_bytes());
        let result = sqlx::query(
            "INSERT INTO dicom_documents (id, rev, body, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&rev)
        .bind(&text)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(rev),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Conflict { id: id.to_string() })
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn update_document(
        &self,
        id: &str,
        revision: &str,
        body: &Map<String, Value>,
    ) -> StoreResult<String> {
        let text = body_text(body)?;
        let rev = next_revision(Some(revision), text.as_bytes());
        let result = sqlx::query(
            "UPDATE dicom_documents SET rev = ?, body = ?, updated_at = ? WHERE id = ? AND rev = ?",
        )
        .bind(&rev)
        .bind(&text)
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .bind(revision)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict { id: id.to_string() });
        }
        Ok(rev)
    }
}

/// Wide column family in `dicom_columns`.
pub struct SqliteColumnStore {
    pool: SqlitePool,
}

impl SqliteColumnStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ColumnStore for SqliteColumnStore {
    async fn put_cell(&self, row_key: &str, column: &str, value: &[u8]) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO dicom_columns (row_key, column_name, value) VALUES (?, ?, ?)
            ON CONFLICT(row_key, column_name) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(row_key)
        .bind(column)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

/// Index and content stores sharing one pool.
pub fn indexed_stores(
    pool: &SqlitePool,
    keys: &KeyModel,
) -> (Arc<SqliteIndexStore>, Arc<SqliteContentStore>) {
    (
        Arc::new(SqliteIndexStore::new(pool.clone(), keys.clone())),
        Arc::new(SqliteContentStore::new(pool.clone(), keys.clone())),
    )
}
