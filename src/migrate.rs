use anyhow::Result;
use sqlx::SqlitePool;

/// Create the ledger tables and indexes. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One baseline row per object and capture date
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS object_state (
            schema TEXT NOT NULL,
            object_name TEXT NOT NULL,
            object_type TEXT NOT NULL,
            hash TEXT NOT NULL,
            last_modified TEXT,
            capture_date TEXT NOT NULL,
            file_path TEXT,
            PRIMARY KEY (schema, object_name, object_type, capture_date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS object_changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            schema TEXT NOT NULL,
            object_name TEXT NOT NULL,
            object_type TEXT NOT NULL,
            change_date TEXT NOT NULL,
            detected_at TEXT NOT NULL,
            old_hash TEXT,
            new_hash TEXT NOT NULL,
            diff_summary TEXT NOT NULL,
            changed_lines INTEGER NOT NULL DEFAULT 0,
            file_path TEXT,
            git_commit_sha TEXT,
            notified INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Write-once snapshot text keyed by fingerprint
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS object_source (
            hash TEXT PRIMARY KEY,
            source_code TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_object_state_identity \
         ON object_state(schema, object_name, object_type, capture_date DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_object_changes_pending \
         ON object_changes(notified, change_date)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_object_changes_commit ON object_changes(git_commit_sha)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
