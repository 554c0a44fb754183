//! SQLite schema.
//!
//! Key and descriptive columns are named after the JSON key of their tag
//! (`t00100020`, `t00080060`, ...), so the schema follows the [`KeyModel`].
//! All statements are `IF NOT EXISTS`; running them twice is harmless.

use anyhow::Result;
use sqlx::SqlitePool;

use dicom_sink_core::keys::KeyModel;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool, &KeyModel::standard()).await?;
    pool.close().await;
    Ok(())
}

pub async fn apply_schema(pool: &SqlitePool, keys: &KeyModel) -> Result<()> {
    let key_columns: Vec<String> = keys.natural_key.iter().map(|t| t.json_key()).collect();
    let key_defs = key_columns
        .iter()
        .map(|c| format!("{c} TEXT"))
        .collect::<Vec<_>>()
        .join(",\n            ");
    let descriptive_defs = keys
        .descriptive
        .iter()
        .map(|t| format!(",\n            {} TEXT", t.json_key()))
        .collect::<String>();

    // Sparse index over the natural key
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS dicom_index (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            {key_defs}{descriptive_defs}
        )
        "#
    ))
    .execute(pool)
    .await?;

    // Full document per natural key
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS dicom_tags (
            {key_defs},
            tags TEXT NOT NULL
        )
        "#
    ))
    .execute(pool)
    .await?;

    // Raw input bytes, appended on every ingest
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS dicom_image (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            {key_defs},
            data BLOB NOT NULL,
            ingested_at INTEGER NOT NULL
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dicom_documents (
            id TEXT PRIMARY KEY,
            rev TEXT NOT NULL,
            body TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dicom_columns (
            row_key TEXT NOT NULL,
            column_name TEXT NOT NULL,
            value BLOB NOT NULL,
            PRIMARY KEY (row_key, column_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    let key_list = key_columns.join(", ");
    for table in ["dicom_index", "dicom_tags", "dicom_image"] {
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_key ON {table}({key_list})"
        ))
        .execute(pool)
        .await?;
    }
    let instance = keys.primary.json_key();
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_dicom_tags_instance ON dicom_tags({instance})"
    ))
    .execute(pool)
    .await?;

    tracing::debug!("schema applied");
    Ok(())
}
