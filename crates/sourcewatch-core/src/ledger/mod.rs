//! Ledger abstraction for sourcewatch.
//!
//! The [`Ledger`] trait covers all persistent state the change recorder
//! and notification selector need: the per-object baseline
//! ([`ObjectState`]), the immutable [`ChangeRecord`]s, and the
//! content-addressed snapshot table.
//!
//! Lookups distinguish absence from failure: `Ok(None)` means the row does
//! not exist, `Err` means the backend could not answer.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::{ChangeRecord, Fingerprint, NewChange, ObjectId, ObjectState, PriorState};

/// Abstract storage backend for object states, changes and snapshots.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_latest_state`](Ledger::get_latest_state) | Most recent baseline by capture date |
/// | [`record_observation`](Ledger::record_observation) | Atomically refresh state and add a change |
/// | [`put_snapshot_if_absent`](Ledger::put_snapshot_if_absent) | Write-once snapshot storage |
/// | [`attach_commit_ref`](Ledger::attach_commit_ref) | Link a change to its commit |
/// | [`select_unnotified`](Ledger::select_unnotified) | Changes awaiting notification |
/// | [`mark_notified`](Ledger::mark_notified) | Confirm delivery of a batch |
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Latest state for `id` (highest capture date), with the snapshot text
    /// stored under its fingerprint if still present.
    async fn get_latest_state(&self, id: &ObjectId) -> Result<Option<PriorState>>;

    /// Insert or replace the state row for `(id, capture_date)`.
    async fn put_state(&self, state: &ObjectState) -> Result<()>;

    /// Store `clean` under `fingerprint` unless a snapshot already exists.
    ///
    /// Returns `true` when the text was written.
    async fn put_snapshot_if_absent(&self, fingerprint: &Fingerprint, clean: &str) -> Result<bool>;

    /// Snapshot text stored under `fingerprint`.
    async fn get_snapshot(&self, fingerprint: &Fingerprint) -> Result<Option<String>>;

    /// Insert a change record, returning its id.
    async fn create_change_record(&self, change: &NewChange) -> Result<i64>;

    /// Refresh `state` and, when given, create `change` in one atomic step.
    ///
    /// Either both are persisted or neither is.
    async fn record_observation(
        &self,
        state: &ObjectState,
        change: Option<&NewChange>,
    ) -> Result<Option<i64>>;

    /// Set the version-control commit reference of a change.
    async fn attach_commit_ref(&self, record_id: i64, commit_ref: &str) -> Result<()>;

    /// Unnotified changes dated on or after `cutoff`, ordered by schema,
    /// kind and name.
    async fn select_unnotified(&self, cutoff: NaiveDate) -> Result<Vec<ChangeRecord>>;

    /// Changes that have no commit reference yet, oldest first.
    async fn select_uncommitted(&self) -> Result<Vec<ChangeRecord>>;

    /// Mark the given changes as notified.
    async fn mark_notified(&self, record_ids: &[i64]) -> Result<()>;
}
