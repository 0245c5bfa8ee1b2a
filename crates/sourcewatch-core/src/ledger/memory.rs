//! In-memory [`Ledger`] implementation for testing.
//!
//! All tables live behind one `std::sync::RwLock`, so every trait call,
//! including [`record_observation`](Ledger::record_observation), is applied
//! under a single write guard.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::{ChangeRecord, Fingerprint, NewChange, ObjectId, ObjectState, PriorState};

use super::Ledger;

#[derive(Default)]
struct Tables {
    states: HashMap<(ObjectId, NaiveDate), ObjectState>,
    changes: Vec<ChangeRecord>,
    snapshots: HashMap<Fingerprint, String>,
    next_id: i64,
}

impl Tables {
    fn upsert_state(&mut self, state: &ObjectState) {
        self.states
            .insert((state.id.clone(), state.capture_date), state.clone());
    }

    fn insert_change(&mut self, change: &NewChange) -> i64 {
        self.next_id += 1;
        let id = self.next_id;
        self.changes.push(ChangeRecord::from_new(id, change.clone()));
        id
    }
}

/// In-memory ledger for tests and dry runs.
#[derive(Default)]
pub struct InMemoryLedger {
    tables: RwLock<Tables>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| anyhow!("in-memory ledger lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| anyhow!("in-memory ledger lock poisoned"))
    }

    /// All change records, in creation order.
    pub fn changes(&self) -> Result<Vec<ChangeRecord>> {
        Ok(self.read()?.changes.clone())
    }

    /// Number of stored state rows (one per object and capture date).
    pub fn state_rows(&self) -> Result<usize> {
        Ok(self.read()?.states.len())
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn get_latest_state(&self, id: &ObjectId) -> Result<Option<PriorState>> {
        let tables = self.read()?;
        let latest = tables
            .states
            .iter()
            .filter(|((state_id, _), _)| state_id == id)
            .max_by_key(|((_, date), _)| *date)
            .map(|(_, state)| state.clone());

        Ok(latest.map(|state| {
            let snapshot_text = tables.snapshots.get(&state.fingerprint).cloned();
            PriorState {
                state,
                snapshot_text,
            }
        }))
    }

    async fn put_state(&self, state: &ObjectState) -> Result<()> {
        self.write()?.upsert_state(state);
        Ok(())
    }

    async fn put_snapshot_if_absent(&self, fingerprint: &Fingerprint, clean: &str) -> Result<bool> {
        if clean.is_empty() {
            return Ok(false);
        }
        let mut tables = self.write()?;
        if tables.snapshots.contains_key(fingerprint) {
            return Ok(false);
        }
        tables
            .snapshots
            .insert(fingerprint.clone(), clean.to_string());
        Ok(true)
    }

    async fn get_snapshot(&self, fingerprint: &Fingerprint) -> Result<Option<String>> {
        Ok(self.read()?.snapshots.get(fingerprint).cloned())
    }

    async fn create_change_record(&self, change: &NewChange) -> Result<i64> {
        Ok(self.write()?.insert_change(change))
    }

    async fn record_observation(
        &self,
        state: &ObjectState,
        change: Option<&NewChange>,
    ) -> Result<Option<i64>> {
        let mut tables = self.write()?;
        let record_id = change.map(|c| tables.insert_change(c));
        tables.upsert_state(state);
        Ok(record_id)
    }

    async fn attach_commit_ref(&self, record_id: i64, commit_ref: &str) -> Result<()> {
        let mut tables = self.write()?;
        match tables.changes.iter_mut().find(|c| c.record_id == record_id) {
            Some(change) => {
                change.commit_ref = Some(commit_ref.to_string());
                Ok(())
            }
            None => bail!("No change record with id {}", record_id),
        }
    }

    async fn select_unnotified(&self, cutoff: NaiveDate) -> Result<Vec<ChangeRecord>> {
        let tables = self.read()?;
        let mut selected: Vec<ChangeRecord> = tables
            .changes
            .iter()
            .filter(|c| !c.notified && c.change_date >= cutoff)
            .cloned()
            .collect();
        selected.sort_by(|a, b| {
            (&a.id.schema, a.id.kind.as_str(), &a.id.name)
                .cmp(&(&b.id.schema, b.id.kind.as_str(), &b.id.name))
        });
        Ok(selected)
    }

    async fn select_uncommitted(&self) -> Result<Vec<ChangeRecord>> {
        let tables = self.read()?;
        Ok(tables
            .changes
            .iter()
            .filter(|c| c.commit_ref.is_none())
            .cloned()
            .collect())
    }

    async fn mark_notified(&self, record_ids: &[i64]) -> Result<()> {
        let mut tables = self.write()?;
        for change in tables.changes.iter_mut() {
            if record_ids.contains(&change.record_id) {
                change.notified = true;
            }
        }
        Ok(())
    }
}
