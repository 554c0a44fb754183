//! Instance retrieval by SOP Instance UID.
//!
//! Looks the UID up in the tags table first and falls back to the
//! document table, so `dcmsink get` works with either backend variant.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use dicom_sink_core::keys::{KeyModel, NaturalKey};

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone, Serialize)]
pub struct InstanceResponse {
    pub instance_uid: String,
    /// `tags` or `documents`.
    pub table: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<NaturalKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Raw content records stored under the same natural key.
    pub content_records: i64,
    pub document: serde_json::Value,
}

pub async fn get_instance(config: &Config, uid: &str) -> Result<InstanceResponse> {
    let pool = db::connect(config).await?;
    let result = lookup(&pool, &KeyModel::standard(), uid).await;
    pool.close().await;
    result
}

async fn lookup(pool: &SqlitePool, keys: &KeyModel, uid: &str) -> Result<InstanceResponse> {
    let key_columns: Vec<String> = keys.natural_key.iter().map(|t| t.json_key()).collect();
    let sql = format!(
        "SELECT {}, tags FROM dicom_tags WHERE {} = ? LIMIT 1",
        key_columns.join(", "),
        keys.primary.json_key()
    );

    if let Some(row) = sqlx::query(&sql).bind(uid).fetch_optional(pool).await? {
        let [owner, study, series, instance] =
            [0, 1, 2, 3].map(|i| row.get::<Option<String>, _>(key_columns[i].as_str()));
        let key = NaturalKey {
            owner,
            study,
            series,
            instance,
        };
        let tags: String = row.get("tags");

        let predicate = key_columns
            .iter()
            .map(|c| format!("{c} IS ?"))
            .collect::<Vec<_>>()
            .join(" AND ");
        let count_sql = format!("SELECT COUNT(*) FROM dicom_image WHERE {predicate}");
        let mut count = sqlx::query_scalar::<_, i64>(&count_sql);
        for component in key.components() {
            count = count.bind(component);
        }
        let content_records = count.fetch_one(pool).await?;

        return Ok(InstanceResponse {
            instance_uid: uid.to_string(),
            table: "tags",
            key: Some(key),
            revision: None,
            content_records,
            document: serde_json::from_str(&tags).context("Stored tags are not valid JSON")?,
        });
    }

    let doc_row = sqlx::query("SELECT rev, body FROM dicom_documents WHERE id = ?")
        .bind(uid)
        .fetch_optional(pool)
        .await?;

    match doc_row {
        Some(row) => {
            let body: String = row.get("body");
            let content_records: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM dicom_columns WHERE column_name = ?",
            )
            .bind(format!("data:{uid}"))
            .fetch_one(pool)
            .await?;
            Ok(InstanceResponse {
                instance_uid: uid.to_string(),
                table: "documents",
                key: None,
                revision: Some(row.get("rev")),
                content_records,
                document: serde_json::from_str(&body).context("Stored document is not valid JSON")?,
            })
        }
        None => bail!("instance not found: {}", uid),
    }
}

/// CLI entry point: print the instance as pretty JSON.
pub async fn run_get(config: &Config, uid: &str) -> Result<()> {
    let instance = get_instance(config, uid).await?;
    println!("{}", serde_json::to_string_pretty(&instance)?);
    Ok(())
}
