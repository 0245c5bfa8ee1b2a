//! Collaborator traits for the tracking cycle.
//!
//! The scan cycle talks to the outside world through two seams defined
//! here, plus the [`Ledger`](sourcewatch_core::ledger::Ledger) and
//! [`Notifier`](sourcewatch_core::notify::Notifier) traits from the core
//! crate:
//!
//! ```text
//!   SourceProvider ──▶ Recorder ──▶ Ledger
//!                         │
//!                         ▼
//!                  VersionControl        (commit + push)
//!
//!   Ledger ──▶ select_unnotified ──▶ Notifier
//! ```
//!
//! A cycle is sequential: every call is awaited before the next is made.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

use sourcewatch_core::cadence::ObjectQuery;
use sourcewatch_core::models::{ObjectId, TrackedObject};

/// Lists tracked objects and fetches their current source.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Short label for logs, e.g. `"export:/srv/ddl"`.
    fn name(&self) -> String;

    /// Objects matching `query`, in a stable order.
    ///
    /// An `Err` aborts the cycle.
    async fn find_objects(&self, query: &ObjectQuery) -> Result<Vec<TrackedObject>>;

    /// Current source of one object.
    ///
    /// `Ok(None)` means the object exists but has no retrievable source;
    /// `Err` is a fetch failure. Both make the cycle skip the object.
    async fn fetch_source(&self, id: &ObjectId) -> Result<Option<String>>;
}

/// Versioned snapshot tree.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Write `clean` for `id` into the working tree, returning the
    /// path relative to the repository root.
    async fn save(&self, id: &ObjectId, clean: &str) -> Result<String>;

    /// Stage `paths` and commit them. Returns the id of the commit that
    /// holds them (the current head when they were already committed), or
    /// `None` when `paths` is empty.
    async fn commit(&self, paths: &[String], message: &str) -> Result<Option<String>>;

    /// Root of the working tree.
    fn root(&self) -> PathBuf;
}
