//! Database statistics.
//!
//! Row counts for every table, a per-modality breakdown of the index and
//! the time of the most recent content insert. Used by `dcmsink stats`.

use anyhow::Result;
use sqlx::Row;

use dicom_sink_core::tag::tags;

use crate::config::Config;
use crate::db;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let mut counts = Vec::new();
    for table in [
        "dicom_index",
        "dicom_tags",
        "dicom_image",
        "dicom_documents",
        "dicom_columns",
    ] {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&pool)
            .await?;
        counts.push((table, count));
    }

    let last_ingest: Option<i64> = sqlx::query_scalar("SELECT MAX(ingested_at) FROM dicom_image")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("dicom-sink Database Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!(
        "  Last ingest: {}",
        last_ingest.map_or_else(|| "never".to_string(), format_ts_relative)
    );
    println!();
    for (table, count) in &counts {
        println!("  {:<16} {:>8}", table, count);
    }

    // Per-modality breakdown
    let modality = tags::MODALITY.json_key();
    let rows = sqlx::query(&format!(
        r#"
        SELECT COALESCE({modality}, '(none)') AS modality, COUNT(*) AS instances
        FROM dicom_index
        GROUP BY {modality}
        ORDER BY instances DESC, modality ASC
        "#
    ))
    .fetch_all(&pool)
    .await?;

    if !rows.is_empty() {
        println!();
        println!("  By modality:");
        println!("  {:<16} {:>8}", "MODALITY", "ROWS");
        println!("  {}", "-".repeat(25));
        for row in &rows {
            let name: String = row.get("modality");
            let instances: i64 = row.get("instances");
            println!("  {:<16} {:>8}", name, instances);
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now ("3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
