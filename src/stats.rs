//! Ledger statistics.
//!
//! Gives operators a quick view of what is tracked: object and change
//! counts, pending notifications and commits, and a per-schema breakdown.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub objects: i64,
    pub snapshots: i64,
    pub changes: i64,
    pub unnotified: i64,
    pub uncommitted: i64,
    pub last_change: Option<String>,
    pub by_schema: Vec<SchemaStats>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaStats {
    pub schema: String,
    pub objects: i64,
    pub changes: i64,
}

pub async fn collect(pool: &SqlitePool) -> Result<LedgerStats> {
    let objects: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM (SELECT DISTINCT schema, object_name, object_type FROM object_state)",
    )
    .fetch_one(pool)
    .await?;

    let snapshots: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM object_source")
        .fetch_one(pool)
        .await?;

    let changes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM object_changes")
        .fetch_one(pool)
        .await?;

    let unnotified: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM object_changes WHERE notified = 0")
            .fetch_one(pool)
            .await?;

    let uncommitted: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM object_changes WHERE git_commit_sha IS NULL")
            .fetch_one(pool)
            .await?;

    let last_change: Option<String> = sqlx::query_scalar("SELECT MAX(detected_at) FROM object_changes")
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query(
        r#"
        SELECT s.schema,
               COUNT(DISTINCT s.object_name || '/' || s.object_type) AS objects,
               (SELECT COUNT(*) FROM object_changes c WHERE c.schema = s.schema) AS changes
        FROM object_state s
        GROUP BY s.schema
        ORDER BY s.schema
        "#,
    )
    .fetch_all(pool)
    .await?;

    let by_schema = rows
        .iter()
        .map(|row| SchemaStats {
            schema: row.get("schema"),
            objects: row.get("objects"),
            changes: row.get("changes"),
        })
        .collect();

    Ok(LedgerStats {
        objects,
        snapshots,
        changes,
        unnotified,
        uncommitted,
        last_change,
        by_schema,
    })
}

/// Run the stats command: query the ledger and print a summary.
pub async fn run_stats(config: &Config, pool: &SqlitePool) -> Result<()> {
    let stats = collect(pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("sourcewatch - Ledger Stats");
    println!("==========================");
    println!();
    println!("  Project:      {} ({})", config.tracker.project, config.tracker.env);
    println!("  Database:     {}", config.db.path.display());
    println!("  Size:         {}", format_bytes(db_size));
    println!();
    println!("  Objects:      {}", stats.objects);
    println!("  Snapshots:    {}", stats.snapshots);
    println!("  Changes:      {}", stats.changes);
    println!("  Unnotified:   {}", stats.unnotified);
    println!("  Uncommitted:  {}", stats.uncommitted);
    println!(
        "  Last change:  {}",
        stats.last_change.as_deref().unwrap_or("never")
    );

    if !stats.by_schema.is_empty() {
        println!();
        println!("  By schema:");
        println!("  {:<24} {:>8} {:>8}", "SCHEMA", "OBJECTS", "CHANGES");
        println!("  {}", "-".repeat(42));
        for s in &stats.by_schema {
            println!("  {:<24} {:>8} {:>8}", s.schema, s.objects, s.changes);
        }
    }

    println!();
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
