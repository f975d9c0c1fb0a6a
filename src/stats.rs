//! Index statistics.
//!
//! Summarizes what the persistent index holds: entry count, size on disk,
//! and a per-model breakdown with dimensionality and last update. Used by
//! `snapsweep stats`.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelStats {
    pub model: String,
    pub dims: i64,
    pub entries: i64,
    pub last_update: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub path: String,
    pub size_bytes: u64,
    pub entries: i64,
    pub models: Vec<ModelStats>,
}

pub async fn collect(pool: &SqlitePool, db_path: &Path) -> Result<IndexStats> {
    let entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM image_embeddings")
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query(
        r#"
        SELECT model, dims, COUNT(*) AS entries, MAX(updated_at) AS last_update
        FROM image_embeddings
        GROUP BY model, dims
        ORDER BY entries DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let models = rows
        .iter()
        .map(|row| ModelStats {
            model: row.get("model"),
            dims: row.get("dims"),
            entries: row.get("entries"),
            last_update: row.get("last_update"),
        })
        .collect();

    Ok(IndexStats {
        path: db_path.display().to_string(),
        size_bytes: std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0),
        entries,
        models,
    })
}

pub fn print(stats: &IndexStats) {
    println!("snapsweep index");
    println!("===============");
    println!();
    println!("  Index:       {}", stats.path);
    println!("  Size:        {}", format_bytes(stats.size_bytes));
    println!("  Entries:     {}", stats.entries);

    if !stats.models.is_empty() {
        println!();
        println!("  {:<28} {:>6} {:>9}   {}", "MODEL", "DIMS", "ENTRIES", "LAST UPDATE");
        println!("  {}", "-".repeat(66));
        for m in &stats.models {
            let updated = match m.last_update {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!("  {:<28} {:>6} {:>9}   {}", m.model, m.dims, m.entries, updated);
        }
    }
    println!();
}

pub fn format_bytes(bytes: u64) -> String {
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
