//! Notification batch selection.
//!
//! Picks the changes that have not been announced yet within a trailing
//! window, trims each diff to a short preview of added lines, and marks the
//! batch notified only after the [`Notifier`] confirms delivery.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::diff::added_lines;
use crate::ledger::Ledger;
use crate::models::{ChangeRecord, ObjectId};

/// Maximum added lines shown per change.
pub const PREVIEW_LINES: usize = 10;

/// One change as presented in a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSummary {
    pub record_id: i64,
    pub id: ObjectId,
    pub change_date: NaiveDate,
    pub changed_lines: usize,
    pub location: Option<String>,
    pub commit_ref: Option<String>,
    pub preview: String,
}

impl From<&ChangeRecord> for ChangeSummary {
    fn from(record: &ChangeRecord) -> Self {
        Self {
            record_id: record.record_id,
            id: record.id.clone(),
            change_date: record.change_date,
            changed_lines: record.changed_lines,
            location: record.location.clone(),
            commit_ref: record.commit_ref.clone(),
            preview: preview(&record.diff_summary),
        }
    }
}

/// The set of changes handed to a notifier in one delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationBatch {
    pub cutoff: NaiveDate,
    pub entries: Vec<ChangeSummary>,
}

impl NotificationBatch {
    pub fn ids(&self) -> Vec<i64> {
        self.entries.iter().map(|e| e.record_id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Delivery channel for notification batches.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver the batch. `Ok(true)` means the transport confirmed delivery
    /// of the whole batch.
    async fn send(&self, batch: &NotificationBatch) -> Result<bool>;
}

/// Added lines of a diff, capped at [`PREVIEW_LINES`] with a trailing
/// `...` when more were present.
pub fn preview(diff_summary: &str) -> String {
    let added = added_lines(diff_summary);
    let mut out = added
        .iter()
        .take(PREVIEW_LINES)
        .copied()
        .collect::<Vec<_>>()
        .join("\n");
    if added.len() > PREVIEW_LINES {
        out.push_str("\n...");
    }
    out
}

/// First day included in a window of `window_hours` ending at `now`.
pub fn window_cutoff(window_hours: u32, now: NaiveDateTime) -> NaiveDate {
    (now - Duration::hours(i64::from(window_hours))).date()
}

/// Unnotified changes dated within the trailing window.
pub async fn select_unnotified(
    ledger: &dyn Ledger,
    window_hours: u32,
    now: NaiveDateTime,
) -> Result<NotificationBatch> {
    let cutoff = window_cutoff(window_hours, now);
    let records = ledger
        .select_unnotified(cutoff)
        .await
        .context("Failed to read unnotified changes")?;

    tracing::info!(
        "Found {} unnotified changes from the past {} hours",
        records.len(),
        window_hours
    );

    Ok(NotificationBatch {
        cutoff,
        entries: records.iter().map(ChangeSummary::from).collect(),
    })
}

/// Flag the given changes as notified.
///
/// Call only with the ids of a batch whose delivery was confirmed.
pub async fn mark_notified(ledger: &dyn Ledger, ids: &[i64]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    ledger
        .mark_notified(ids)
        .await
        .context("Failed to mark changes as notified")?;
    tracing::info!("Marked {} changes as notified", ids.len());
    Ok(())
}

/// What happened to a summary dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered and marked; carries the number of changes.
    Delivered(usize),
    /// The notifier refused or failed; nothing was marked.
    NotDelivered,
    /// Nothing to send and empty summaries are disabled.
    Empty,
}

/// Select, send and mark one notification batch.
///
/// Delivery is all-or-nothing: every id in the batch is marked after a
/// confirmed send, none otherwise. A transport error is logged and leaves
/// the flags untouched for the next attempt.
pub async fn dispatch_summary(
    ledger: &dyn Ledger,
    notifier: &dyn Notifier,
    window_hours: u32,
    now: NaiveDateTime,
    send_when_empty: bool,
) -> Result<DispatchOutcome> {
    let batch = select_unnotified(ledger, window_hours, now).await?;

    if batch.is_empty() && !send_when_empty {
        tracing::info!("No unnotified changes, skipping summary");
        return Ok(DispatchOutcome::Empty);
    }

    let delivered = match notifier.send(&batch).await {
        Ok(delivered) => delivered,
        Err(e) => {
            tracing::error!("Failed to send summary: {:#}", e);
            false
        }
    };

    if !delivered {
        return Ok(DispatchOutcome::NotDelivered);
    }

    mark_notified(ledger, &batch.ids()).await?;
    Ok(DispatchOutcome::Delivered(batch.len()))
}
