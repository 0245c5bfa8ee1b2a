//! SQLite-backed [`Ledger`] implementation.
//!
//! Dates are stored as `YYYY-MM-DD` text and timestamps as
//! `YYYY-MM-DD HH:MM:SS`, so lexical order in SQL matches time order.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use sourcewatch_core::ledger::Ledger;
use sourcewatch_core::models::{
    ChangeRecord, Fingerprint, NewChange, ObjectId, ObjectKind, ObjectState, PriorState,
};

use crate::{db, migrate};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// SQLite implementation of the [`Ledger`] trait over the `object_state`,
/// `object_changes` and `object_source` tables.
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `path` and apply migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect_path(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .with_context(|| format!("Invalid date in ledger: '{}'", text))
}

fn parse_timestamp(text: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .with_context(|| format!("Invalid timestamp in ledger: '{}'", text))
}

fn object_id_from_row(row: &SqliteRow) -> Result<ObjectId> {
    let kind: String = row.get("object_type");
    Ok(ObjectId::new(
        row.get::<String, _>("schema"),
        row.get::<String, _>("object_name"),
        kind.parse::<ObjectKind>()?,
    ))
}

fn change_from_row(row: &SqliteRow) -> Result<ChangeRecord> {
    let change_date: String = row.get("change_date");
    let detected_at: String = row.get("detected_at");
    let old_hash: Option<String> = row.get("old_hash");
    let changed_lines: i64 = row.get("changed_lines");
    let notified: i64 = row.get("notified");

    Ok(ChangeRecord {
        record_id: row.get("id"),
        id: object_id_from_row(row)?,
        old_fingerprint: old_hash.map(Fingerprint::from_hex),
        new_fingerprint: Fingerprint::from_hex(row.get::<String, _>("new_hash")),
        change_date: parse_date(&change_date)?,
        detected_at: parse_timestamp(&detected_at)?,
        diff_summary: row.get("diff_summary"),
        changed_lines: changed_lines.max(0) as usize,
        location: row.get("file_path"),
        commit_ref: row.get("git_commit_sha"),
        notified: notified != 0,
    })
}

const UPSERT_STATE: &str = r#"
    INSERT INTO object_state (schema, object_name, object_type, hash, last_modified,
                              capture_date, file_path)
    VALUES (?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(schema, object_name, object_type, capture_date) DO UPDATE SET
        hash = excluded.hash,
        last_modified = excluded.last_modified,
        file_path = excluded.file_path
"#;

const INSERT_CHANGE: &str = r#"
    INSERT INTO object_changes (schema, object_name, object_type, change_date, detected_at,
                                old_hash, new_hash, diff_summary, changed_lines, file_path)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const CHANGE_COLUMNS: &str = "id, schema, object_name, object_type, change_date, detected_at, \
     old_hash, new_hash, diff_summary, changed_lines, file_path, git_commit_sha, notified";

async fn upsert_state<'e, E>(executor: E, state: &ObjectState) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(UPSERT_STATE)
        .bind(&state.id.schema)
        .bind(&state.id.name)
        .bind(state.id.kind.as_str())
        .bind(state.fingerprint.as_str())
        .bind(state.last_modified.map(format_timestamp))
        .bind(format_date(state.capture_date))
        .bind(&state.location)
        .execute(executor)
        .await?;
    Ok(())
}

async fn insert_change<'e, E>(executor: E, change: &NewChange) -> Result<i64>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let result = sqlx::query(INSERT_CHANGE)
        .bind(&change.id.schema)
        .bind(&change.id.name)
        .bind(change.id.kind.as_str())
        .bind(format_date(change.change_date))
        .bind(format_timestamp(change.detected_at))
        .bind(change.old_fingerprint.as_ref().map(|f| f.as_str().to_string()))
        .bind(change.new_fingerprint.as_str())
        .bind(&change.diff_summary)
        .bind(change.changed_lines as i64)
        .bind(&change.location)
        .execute(executor)
        .await?;
    Ok(result.last_insert_rowid())
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn get_latest_state(&self, id: &ObjectId) -> Result<Option<PriorState>> {
        let row = sqlx::query(
            r#"
            SELECT s.hash, s.last_modified, s.capture_date, s.file_path, src.source_code
            FROM object_state s
            LEFT JOIN object_source src ON src.hash = s.hash
            WHERE s.schema = ? AND s.object_name = ? AND s.object_type = ?
            ORDER BY s.capture_date DESC
            LIMIT 1
            "#,
        )
        .bind(&id.schema)
        .bind(&id.name)
        .bind(id.kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let last_modified: Option<String> = row.get("last_modified");
        let capture_date: String = row.get("capture_date");

        Ok(Some(PriorState {
            state: ObjectState {
                id: id.clone(),
                fingerprint: Fingerprint::from_hex(row.get::<String, _>("hash")),
                last_modified: last_modified.as_deref().map(parse_timestamp).transpose()?,
                capture_date: parse_date(&capture_date)?,
                location: row.get("file_path"),
            },
            snapshot_text: row.get("source_code"),
        }))
    }

    async fn put_state(&self, state: &ObjectState) -> Result<()> {
        upsert_state(&self.pool, state).await
    }

    async fn put_snapshot_if_absent(&self, fingerprint: &Fingerprint, clean: &str) -> Result<bool> {
        if clean.is_empty() {
            return Ok(false);
        }
        let result =
            sqlx::query("INSERT OR IGNORE INTO object_source (hash, source_code) VALUES (?, ?)")
                .bind(fingerprint.as_str())
                .bind(clean)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_snapshot(&self, fingerprint: &Fingerprint) -> Result<Option<String>> {
        let text: Option<String> =
            sqlx::query_scalar("SELECT source_code FROM object_source WHERE hash = ?")
                .bind(fingerprint.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(text)
    }

    async fn create_change_record(&self, change: &NewChange) -> Result<i64> {
        insert_change(&self.pool, change).await
    }

    async fn record_observation(
        &self,
        state: &ObjectState,
        change: Option<&NewChange>,
    ) -> Result<Option<i64>> {
        let mut tx = self.pool.begin().await?;

        let record_id = match change {
            Some(change) => Some(insert_change(&mut *tx, change).await?),
            None => None,
        };
        upsert_state(&mut *tx, state).await?;

        tx.commit().await?;
        Ok(record_id)
    }

    async fn attach_commit_ref(&self, record_id: i64, commit_ref: &str) -> Result<()> {
        let result = sqlx::query("UPDATE object_changes SET git_commit_sha = ? WHERE id = ?")
            .bind(commit_ref)
            .bind(record_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("No change record with id {}", record_id);
        }
        Ok(())
    }

    async fn select_unnotified(&self, cutoff: NaiveDate) -> Result<Vec<ChangeRecord>> {
        let sql = format!(
            "SELECT {} FROM object_changes \
             WHERE notified = 0 AND change_date >= ? \
             ORDER BY schema, object_type, object_name, id",
            CHANGE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(format_date(cutoff))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(change_from_row).collect()
    }

    async fn select_uncommitted(&self) -> Result<Vec<ChangeRecord>> {
        let sql = format!(
            "SELECT {} FROM object_changes WHERE git_commit_sha IS NULL ORDER BY id",
            CHANGE_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(change_from_row).collect()
    }

    async fn mark_notified(&self, record_ids: &[i64]) -> Result<()> {
        if record_ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for &id in record_ids {
            sqlx::query("UPDATE object_changes SET notified = 1 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
