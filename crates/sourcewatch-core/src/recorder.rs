//! Change classification and recording.
//!
//! [`Recorder::process`] takes one object's freshly fetched source through
//! the per-object state machine:
//!
//! ```text
//! FETCHED → NORMALIZED → HASHED → ┬ no prior state   → New
//!                                 ├ prior matches    → Unchanged
//!                                 └ prior differs    → Changed
//! ```
//!
//! Empty or missing source short-circuits to `Skipped` before anything is
//! written. In every other case a fresh [`ObjectState`] row is persisted
//! for the capture date, together with the [`ChangeRecord`] (if any) in a
//! single [`Ledger::record_observation`] call.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};

use crate::diff::diff;
use crate::fingerprint::snapshot;
use crate::ledger::Ledger;
use crate::models::{ChangeRecord, NewChange, ObjectId, ObjectState};

/// Result of processing one object.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Source was empty or unavailable; nothing was persisted.
    Skipped,
    /// First time this object was seen.
    New(ChangeRecord),
    /// Fingerprint matches the baseline; only the state was refreshed.
    Unchanged,
    /// Fingerprint moved; a diff against the previous snapshot was recorded.
    Changed(ChangeRecord),
}

/// Summary text recorded for objects seen for the first time.
pub fn new_object_note(date: NaiveDate) -> String {
    format!("New object created on {}", date.format("%Y-%m-%d"))
}

/// Classifies objects against the ledger baseline and records the result.
pub struct Recorder<'a> {
    ledger: &'a dyn Ledger,
    capture_date: NaiveDate,
    detected_at: NaiveDateTime,
}

impl<'a> Recorder<'a> {
    /// A recorder for one scan. `detected_at` stamps every change it creates;
    /// its date is the capture date of every state row.
    pub fn new(ledger: &'a dyn Ledger, detected_at: NaiveDateTime) -> Self {
        Self {
            ledger,
            capture_date: detected_at.date(),
            detected_at,
        }
    }

    /// Process one object's current source.
    ///
    /// `location` is where the snapshot lives in the snapshot tree and is
    /// stored on both the state and the change.
    ///
    /// # Errors
    ///
    /// Ledger failures propagate. Since state and change are written in one
    /// call, an error leaves the ledger untouched for this object and it is
    /// reprocessed on the next scan.
    pub async fn process(
        &self,
        id: &ObjectId,
        raw_source: Option<&str>,
        observed_modified_at: Option<NaiveDateTime>,
        location: Option<&str>,
    ) -> Result<Outcome> {
        let raw = match raw_source {
            Some(raw) if !raw.trim().is_empty() => raw,
            _ => {
                tracing::warn!("Could not fetch source for {}, skipping", id);
                return Ok(Outcome::Skipped);
            }
        };

        let snap = snapshot(Some(raw));

        self.ledger
            .put_snapshot_if_absent(&snap.fingerprint, &snap.clean)
            .await
            .with_context(|| format!("Failed to store snapshot for {}", id))?;

        let prior = self
            .ledger
            .get_latest_state(id)
            .await
            .with_context(|| format!("Failed to read previous state for {}", id))?;

        let location = location.map(str::to_string);
        let state = ObjectState {
            id: id.clone(),
            fingerprint: snap.fingerprint.clone(),
            last_modified: observed_modified_at,
            capture_date: self.capture_date,
            location: location.clone(),
        };

        let change = match &prior {
            None => {
                tracing::info!("New object: {}", id);
                Some(NewChange {
                    id: id.clone(),
                    old_fingerprint: None,
                    new_fingerprint: snap.fingerprint.clone(),
                    change_date: self.capture_date,
                    detected_at: self.detected_at,
                    diff_summary: new_object_note(self.capture_date),
                    changed_lines: snap.clean.lines().count(),
                    location,
                })
            }
            Some(prior) if prior.state.fingerprint == snap.fingerprint => None,
            Some(prior) => {
                if prior.snapshot_text.is_none() {
                    tracing::warn!(
                        "Previous snapshot {} for {} is missing, diffing against empty text",
                        prior.state.fingerprint,
                        id
                    );
                }
                let line_diff = diff(prior.snapshot_text.as_deref(), Some(&snap.clean));
                tracing::info!(
                    "Changed object: {} - {} lines changed",
                    id,
                    line_diff.changed_lines
                );
                Some(NewChange {
                    id: id.clone(),
                    old_fingerprint: Some(prior.state.fingerprint.clone()),
                    new_fingerprint: snap.fingerprint.clone(),
                    change_date: self.capture_date,
                    detected_at: self.detected_at,
                    diff_summary: line_diff.text,
                    changed_lines: line_diff.changed_lines,
                    location,
                })
            }
        };

        let record_id = self
            .ledger
            .record_observation(&state, change.as_ref())
            .await
            .with_context(|| format!("Failed to record observation for {}", id))?;

        Ok(match (change, record_id) {
            (Some(change), Some(record_id)) => {
                let is_new = change.old_fingerprint.is_none();
                let record = ChangeRecord::from_new(record_id, change);
                if is_new {
                    Outcome::New(record)
                } else {
                    Outcome::Changed(record)
                }
            }
            (Some(_), None) => bail!("Ledger returned no record id for the change to {}", id),
            (None, _) => Outcome::Unchanged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;
    use crate::ledger::memory::InMemoryLedger;
    use crate::models::{Fingerprint, ObjectKind, PriorState};
    use async_trait::async_trait;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn proc_id() -> ObjectId {
        ObjectId::new("APP", "P_SHIP", ObjectKind::Procedure)
    }

    #[tokio::test]
    async fn test_new_object() {
        let ledger = InMemoryLedger::new();
        let recorder = Recorder::new(&ledger, at(1, 9));
        let source = "PROCEDURE P IS BEGIN NULL; END;";

        let outcome = recorder
            .process(&proc_id(), Some(source), None, Some("APP/PROCEDURE/P_SHIP.sql"))
            .await
            .unwrap();

        let Outcome::New(record) = outcome else {
            panic!("expected New, got {:?}", outcome);
        };
        assert_eq!(record.changed_lines, 1);
        assert_eq!(record.old_fingerprint, None);
        assert_eq!(record.diff_summary, "New object created on 2024-05-01");
        assert_eq!(record.location.as_deref(), Some("APP/PROCEDURE/P_SHIP.sql"));
        assert!(!record.notified);
        assert_eq!(ledger.state_rows().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_second_pass_is_unchanged() {
        let ledger = InMemoryLedger::new();
        let recorder = Recorder::new(&ledger, at(1, 9));
        let source = "PROCEDURE P IS\nBEGIN\n  NULL;\nEND;";

        let first = recorder.process(&proc_id(), Some(source), None, None).await.unwrap();
        assert!(matches!(first, Outcome::New(_)));

        let second = recorder.process(&proc_id(), Some(source), None, None).await.unwrap();
        assert_eq!(second, Outcome::Unchanged);
        assert_eq!(ledger.changes().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reformat_is_unchanged_but_refreshes_state() {
        let ledger = InMemoryLedger::new();
        Recorder::new(&ledger, at(1, 9))
            .process(&proc_id(), Some("select 1; -- note"), None, None)
            .await
            .unwrap();

        let later = Recorder::new(&ledger, at(2, 9));
        let modified = Some(at(2, 8));
        let outcome = later
            .process(&proc_id(), Some("SELECT   1;"), modified, None)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Unchanged);

        let prior = ledger.get_latest_state(&proc_id()).await.unwrap().unwrap();
        assert_eq!(prior.state.capture_date, at(2, 0).date());
        assert_eq!(prior.state.last_modified, modified);
        assert_eq!(ledger.changes().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_real_change_is_diffed_against_previous_snapshot() {
        let ledger = InMemoryLedger::new();
        Recorder::new(&ledger, at(1, 9))
            .process(&proc_id(), Some("a\nb\n"), None, None)
            .await
            .unwrap();

        let outcome = Recorder::new(&ledger, at(2, 9))
            .process(&proc_id(), Some("a\nc\n"), None, None)
            .await
            .unwrap();

        let Outcome::Changed(record) = outcome else {
            panic!("expected Changed, got {:?}", outcome);
        };
        assert_eq!(record.changed_lines, 2);
        assert!(record.diff_summary.contains("\n-b\n+c"));
        assert_eq!(record.old_fingerprint, Some(fingerprint("A B")));
        assert_eq!(record.new_fingerprint, fingerprint("A C"));
    }

    #[tokio::test]
    async fn test_empty_source_writes_nothing() {
        let ledger = InMemoryLedger::new();
        let recorder = Recorder::new(&ledger, at(1, 9));

        assert_eq!(
            recorder.process(&proc_id(), None, None, None).await.unwrap(),
            Outcome::Skipped
        );
        assert_eq!(
            recorder.process(&proc_id(), Some("  \n"), None, None).await.unwrap(),
            Outcome::Skipped
        );
        assert_eq!(ledger.state_rows().unwrap(), 0);
        assert!(ledger.get_latest_state(&proc_id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_previous_snapshot_diffs_against_empty() {
        let ledger = InMemoryLedger::new();
        ledger
            .put_state(&ObjectState {
                id: proc_id(),
                fingerprint: Fingerprint::from_hex("feedface"),
                last_modified: None,
                capture_date: at(1, 0).date(),
                location: None,
            })
            .await
            .unwrap();

        let outcome = Recorder::new(&ledger, at(2, 9))
            .process(&proc_id(), Some("x\ny"), None, None)
            .await
            .unwrap();
        let Outcome::Changed(record) = outcome else {
            panic!("expected Changed, got {:?}", outcome);
        };
        assert_eq!(record.changed_lines, 2);
        assert!(record.diff_summary.contains("@@ -0,0 +1,2 @@"));
    }

    /// Ledger whose observation write misbehaves: it either fails, or
    /// persists but reports no record id.
    struct FaultyLedger {
        inner: InMemoryLedger,
        drop_ids: bool,
    }

    #[async_trait]
    impl Ledger for FaultyLedger {
        async fn get_latest_state(&self, id: &ObjectId) -> Result<Option<PriorState>> {
            self.inner.get_latest_state(id).await
        }
        async fn put_state(&self, state: &ObjectState) -> Result<()> {
            self.inner.put_state(state).await
        }
        async fn put_snapshot_if_absent(&self, fp: &Fingerprint, clean: &str) -> Result<bool> {
            self.inner.put_snapshot_if_absent(fp, clean).await
        }
        async fn get_snapshot(&self, fp: &Fingerprint) -> Result<Option<String>> {
            self.inner.get_snapshot(fp).await
        }
        async fn create_change_record(&self, change: &NewChange) -> Result<i64> {
            self.inner.create_change_record(change).await
        }
        async fn record_observation(
            &self,
            state: &ObjectState,
            change: Option<&NewChange>,
        ) -> Result<Option<i64>> {
            if !self.drop_ids {
                bail!("disk full");
            }
            self.inner.record_observation(state, change).await?;
            Ok(None)
        }
        async fn attach_commit_ref(&self, record_id: i64, commit_ref: &str) -> Result<()> {
            self.inner.attach_commit_ref(record_id, commit_ref).await
        }
        async fn select_unnotified(&self, cutoff: NaiveDate) -> Result<Vec<ChangeRecord>> {
            self.inner.select_unnotified(cutoff).await
        }
        async fn select_uncommitted(&self) -> Result<Vec<ChangeRecord>> {
            self.inner.select_uncommitted().await
        }
        async fn mark_notified(&self, record_ids: &[i64]) -> Result<()> {
            self.inner.mark_notified(record_ids).await
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_propagates_without_partial_write() {
        let ledger = FaultyLedger {
            inner: InMemoryLedger::new(),
            drop_ids: false,
        };
        let err = Recorder::new(&ledger, at(1, 9))
            .process(&proc_id(), Some("PROCEDURE P IS BEGIN NULL; END;"), None, None)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("disk full"));
        assert_eq!(ledger.inner.state_rows().unwrap(), 0);
        assert!(ledger.inner.changes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_record_id_is_an_error() {
        let ledger = FaultyLedger {
            inner: InMemoryLedger::new(),
            drop_ids: true,
        };
        let err = Recorder::new(&ledger, at(1, 9))
            .process(&proc_id(), Some("PROCEDURE P IS BEGIN NULL; END;"), None, None)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("no record id"));

        // An unchanged pass creates no change and needs no id.
        let outcome = Recorder::new(&ledger, at(1, 10))
            .process(&proc_id(), Some("PROCEDURE P IS BEGIN NULL; END;"), None, None)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Unchanged);
    }
}
