//! One tracking cycle.
//!
//! ```text
//! ExportDir::is_first_run ─▶ scan_policy ─▶ SourceProvider::find_objects
//!        │
//!        ▼  for each object, in order
//! fetch_source ─▶ Recorder::process ─▶ ExportDir::write + VersionControl::save
//!        │
//!        ▼  once, at the end
//! select_uncommitted ─▶ VersionControl::commit ─▶ attach_commit_ref
//! ```
//!
//! Per-object failures are logged and counted; only a provider listing
//! failure or an unreadable export directory aborts the cycle.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::path::Path;

use sourcewatch_core::cadence::scan_policy;
use sourcewatch_core::fingerprint::snapshot;
use sourcewatch_core::ledger::Ledger;
use sourcewatch_core::models::{ChangeRecord, Fingerprint, TrackedObject};
use sourcewatch_core::normalize::normalize;
use sourcewatch_core::recorder::{Outcome, Recorder};

use crate::config::TrackerConfig;
use crate::export::ExportDir;
use crate::traits::{SourceProvider, VersionControl};

/// Counts for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub full_scan: bool,
    pub total: usize,
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Commit holding this cycle's changes, if one was made.
    pub commit: Option<String>,
    /// Changes linked to `commit`, including ones retried from earlier cycles.
    pub committed: usize,
}

impl ScanReport {
    pub fn changes(&self) -> usize {
        self.new + self.changed
    }
}

/// The collaborators a cycle runs against.
pub struct Pipeline<'a> {
    pub provider: &'a dyn SourceProvider,
    pub ledger: &'a dyn Ledger,
    pub vcs: &'a dyn VersionControl,
    pub export: &'a ExportDir,
}

pub fn commit_message(project: &str, now: NaiveDateTime, changes: usize) -> String {
    format!(
        "Update {} objects on {} - {} changes detected",
        project,
        now.format("%Y-%m-%d"),
        changes
    )
}

impl Pipeline<'_> {
    /// Run one cycle stamped with `now`.
    pub async fn run_cycle(&self, tracker: &TrackerConfig, now: NaiveDateTime) -> Result<ScanReport> {
        let first_run = self.export.is_first_run()?;
        self.export.ensure()?;

        let query = scan_policy(first_run, &tracker.object_prefix, tracker.lookback_days);
        if first_run {
            tracing::info!("Export directory is empty, running a full scan");
        } else {
            tracing::info!("Scanning objects modified in the last {} days", tracker.lookback_days);
        }

        let objects = self
            .provider
            .find_objects(&query)
            .await
            .with_context(|| format!("Failed to list objects from {}", self.provider.name()))?;
        tracing::info!("Found {} objects from {}", objects.len(), self.provider.name());

        let mut report = ScanReport {
            full_scan: first_run,
            total: objects.len(),
            ..Default::default()
        };

        let recorder = Recorder::new(self.ledger, now);
        for object in &objects {
            self.track_object(&recorder, object, &mut report).await;
        }

        self.commit_pending(tracker, now, &mut report).await;

        tracing::info!(
            "Scan complete: {} objects, {} new, {} changed, {} skipped, {} failed",
            report.total,
            report.new,
            report.changed,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    async fn track_object(&self, recorder: &Recorder<'_>, object: &TrackedObject, report: &mut ScanReport) {
        let id = &object.id;

        let raw = match self.provider.fetch_source(id).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Failed to fetch source for {}: {:#}", id, e);
                report.skipped += 1;
                return;
            }
        };

        let location = id.relative_path();
        let outcome = match recorder
            .process(id, raw.as_deref(), object.last_modified, Some(&location))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Failed to record {}: {:#}", id, e);
                report.failed += 1;
                return;
            }
        };

        match &outcome {
            Outcome::Skipped => {
                report.skipped += 1;
                return;
            }
            Outcome::New(_) => report.new += 1,
            Outcome::Changed(_) => report.changed += 1,
            Outcome::Unchanged => report.unchanged += 1,
        }

        let clean = normalize(raw.as_deref()).clean;
        if let Err(e) = self.export.write(id, &clean) {
            tracing::error!("Failed to export {}: {:#}", id, e);
            report.failed += 1;
            return;
        }
        if let Err(e) = self.vcs.save(id, &clean).await {
            tracing::error!("Failed to save {} to the working tree: {:#}", id, e);
            report.failed += 1;
        }
    }

    /// Commit every change still lacking a commit reference, this cycle's
    /// and earlier ones, then link them to the new commit.
    ///
    /// A path is staged only when its working-tree file holds the latest
    /// pending version of the object. Changes whose file is missing or stale
    /// keep no commit reference and are retried on a later cycle.
    async fn commit_pending(&self, tracker: &TrackerConfig, now: NaiveDateTime, report: &mut ScanReport) {
        let pending = match self.ledger.select_uncommitted().await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!("Failed to read uncommitted changes: {:#}", e);
                return;
            }
        };
        if pending.is_empty() {
            return;
        }

        let mut by_path: BTreeMap<String, Vec<&ChangeRecord>> = BTreeMap::new();
        for change in &pending {
            let path = change.location.clone().unwrap_or_else(|| change.id.relative_path());
            by_path.entry(path).or_default().push(change);
        }

        let root = self.vcs.root();
        let mut paths = Vec::new();
        let mut ready = Vec::new();
        for (path, changes) in by_path {
            let Some(latest) = changes.iter().max_by_key(|c| c.record_id) else {
                continue;
            };
            if tree_holds(&root.join(&path), &latest.new_fingerprint) {
                paths.push(path);
                ready.extend(changes);
            } else {
                tracing::warn!(
                    "Working tree copy of {} does not hold its latest change, leaving {} changes pending",
                    latest.id,
                    changes.len()
                );
            }
        }
        if paths.is_empty() {
            return;
        }

        let retried = ready.len().saturating_sub(report.changes());
        if retried > 0 {
            tracing::info!("Retrying commit for {} earlier changes", retried);
        }

        let message = commit_message(&tracker.project, now, ready.len());
        let sha = match self.vcs.commit(&paths, &message).await {
            Ok(Some(sha)) => sha,
            Ok(None) => return,
            Err(e) => {
                tracing::error!("Failed to commit changes: {:#}", e);
                return;
            }
        };

        for change in ready {
            match self.ledger.attach_commit_ref(change.record_id, &sha).await {
                Ok(()) => report.committed += 1,
                Err(e) => tracing::error!("Failed to link change {} to {}: {:#}", change.record_id, sha, e),
            }
        }
        report.commit = Some(sha);
    }
}

/// True when the file at `path` fingerprints to `expected`.
fn tree_holds(path: &Path, expected: &Fingerprint) -> bool {
    match std::fs::read(path) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            snapshot(Some(text.as_ref())).fingerprint == *expected
        }
        Err(e) => {
            tracing::debug!("Cannot read {}: {}", path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use sourcewatch_core::cadence::ObjectQuery;
    use sourcewatch_core::ledger::memory::InMemoryLedger;
    use sourcewatch_core::models::{ObjectId, ObjectKind};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct StubProvider {
        sources: Mutex<HashMap<ObjectId, Option<String>>>,
        broken: Vec<ObjectId>,
        queries: Mutex<Vec<ObjectQuery>>,
    }

    impl StubProvider {
        fn new(entries: &[(&str, Option<&str>)]) -> Self {
            Self {
                sources: Mutex::new(
                    entries
                        .iter()
                        .map(|(name, src)| (id(name), src.map(str::to_string)))
                        .collect(),
                ),
                broken: Vec::new(),
                queries: Mutex::new(Vec::new()),
            }
        }

        fn set(&self, name: &str, src: &str) {
            self.sources.lock().unwrap().insert(id(name), Some(src.to_string()));
        }
    }

    #[async_trait]
    impl SourceProvider for StubProvider {
        fn name(&self) -> String {
            "stub".to_string()
        }

        async fn find_objects(&self, query: &ObjectQuery) -> Result<Vec<TrackedObject>> {
            self.queries.lock().unwrap().push(query.clone());
            let mut ids: Vec<ObjectId> = self.sources.lock().unwrap().keys().cloned().collect();
            ids.extend(self.broken.iter().cloned());
            ids.sort();
            Ok(ids
                .into_iter()
                .map(|id| TrackedObject { id, last_modified: None })
                .collect())
        }

        async fn fetch_source(&self, id: &ObjectId) -> Result<Option<String>> {
            if self.broken.contains(id) {
                bail!("ORA-04043: object does not exist");
            }
            Ok(self.sources.lock().unwrap().get(id).cloned().flatten())
        }
    }

    struct StubVcs {
        root: PathBuf,
        fail_saves: Mutex<Vec<ObjectId>>,
        fail_commits: Mutex<bool>,
        commits: Mutex<Vec<(Vec<String>, String)>>,
    }

    #[async_trait]
    impl VersionControl for StubVcs {
        async fn save(&self, id: &ObjectId, clean: &str) -> Result<String> {
            if self.fail_saves.lock().unwrap().contains(id) {
                bail!("permission denied");
            }
            let rel = id.relative_path();
            let path = self.root.join(&rel);
            std::fs::create_dir_all(path.parent().unwrap())?;
            std::fs::write(path, clean)?;
            Ok(rel)
        }

        async fn commit(&self, paths: &[String], message: &str) -> Result<Option<String>> {
            if *self.fail_commits.lock().unwrap() {
                bail!("remote rejected");
            }
            let mut commits = self.commits.lock().unwrap();
            commits.push((paths.to_vec(), message.to_string()));
            Ok(Some(format!("sha{}", commits.len())))
        }

        fn root(&self) -> PathBuf {
            self.root.clone()
        }
    }

    fn id(name: &str) -> ObjectId {
        ObjectId::new("APP", name, ObjectKind::Procedure)
    }

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, day)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn tracker() -> TrackerConfig {
        TrackerConfig {
            project: "ERP".to_string(),
            ..Default::default()
        }
    }

    struct Fixture {
        _tmp: TempDir,
        ledger: InMemoryLedger,
        vcs: StubVcs,
        export: ExportDir,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let vcs = StubVcs {
            root: tmp.path().join("repo"),
            fail_saves: Mutex::new(Vec::new()),
            fail_commits: Mutex::new(false),
            commits: Mutex::new(Vec::new()),
        };
        let export = ExportDir::new(tmp.path().join("code"));
        Fixture {
            _tmp: tmp,
            ledger: InMemoryLedger::new(),
            vcs,
            export,
        }
    }

    impl Fixture {
        fn tree_text(&self, name: &str) -> Option<String> {
            std::fs::read_to_string(self.vcs.root.join(id(name).relative_path())).ok()
        }

        fn pipeline<'a>(&'a self, provider: &'a StubProvider) -> Pipeline<'a> {
            Pipeline {
                provider,
                ledger: &self.ledger,
                vcs: &self.vcs,
                export: &self.export,
            }
        }
    }

    #[tokio::test]
    async fn test_first_cycle_records_and_commits() {
        let fx = fixture();
        let provider = StubProvider::new(&[
            ("P_ONE", Some("procedure p_one is begin null; end;")),
            ("P_TWO", Some("procedure p_two is begin null; end;")),
            ("P_EMPTY", Some("   ")),
        ]);

        let report = fx.pipeline(&provider).run_cycle(&tracker(), at(10)).await.unwrap();
        assert!(report.full_scan);
        assert_eq!(report.total, 3);
        assert_eq!(report.new, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.commit.as_deref(), Some("sha1"));
        assert_eq!(report.committed, 2);

        let commits = fx.vcs.commits.lock().unwrap();
        assert_eq!(
            commits[0].0,
            vec!["APP/PROCEDURE/P_ONE.sql".to_string(), "APP/PROCEDURE/P_TWO.sql".to_string()]
        );
        assert_eq!(commits[0].1, "Update ERP objects on 2024-06-10 - 2 changes detected");

        let exported = std::fs::read_to_string(fx.export.root().join("APP/PROCEDURE/P_ONE.sql")).unwrap();
        assert!(exported.starts_with("CREATE OR REPLACE procedure p_one"));
        assert!(fx.ledger.select_uncommitted().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_cycle_uses_lookback_and_detects_change() {
        let fx = fixture();
        let provider = StubProvider::new(&[("P_ONE", Some("procedure p_one is\nbegin\n  null;\nend;"))]);
        fx.pipeline(&provider).run_cycle(&tracker(), at(10)).await.unwrap();

        provider.set("P_ONE", "procedure p_one is\nbegin\n  commit;\nend;");
        let report = fx.pipeline(&provider).run_cycle(&tracker(), at(11)).await.unwrap();
        assert!(!report.full_scan);
        assert_eq!(report.changed, 1);
        assert_eq!(report.commit.as_deref(), Some("sha2"));

        let queries = provider.queries.lock().unwrap();
        assert!(queries[0].full_scan);
        assert!(!queries[1].full_scan);
        drop(queries);

        let unchanged = fx.pipeline(&provider).run_cycle(&tracker(), at(11)).await.unwrap();
        assert_eq!(unchanged.unchanged, 1);
        assert_eq!(unchanged.commit, None);
    }

    #[tokio::test]
    async fn test_failed_commit_is_retried_next_cycle() {
        let fx = fixture();
        let provider = StubProvider::new(&[("P_ONE", Some("procedure p_one"))]);

        *fx.vcs.fail_commits.lock().unwrap() = true;
        let report = fx.pipeline(&provider).run_cycle(&tracker(), at(10)).await.unwrap();
        assert_eq!(report.new, 1);
        assert_eq!(report.commit, None);
        assert_eq!(fx.ledger.select_uncommitted().await.unwrap().len(), 1);

        *fx.vcs.fail_commits.lock().unwrap() = false;
        let retry = fx.pipeline(&provider).run_cycle(&tracker(), at(10)).await.unwrap();
        assert_eq!(retry.changes(), 0);
        assert_eq!(retry.committed, 1);
        assert!(fx.ledger.select_uncommitted().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_skipped_not_fatal() {
        let fx = fixture();
        let mut provider = StubProvider::new(&[("P_GOOD", Some("procedure p_good"))]);
        provider.broken = vec![id("P_BAD")];

        let report = fx.pipeline(&provider).run_cycle(&tracker(), at(10)).await.unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.new, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_change_pending() {
        let fx = fixture();
        let provider = StubProvider::new(&[("P_ONE", Some("procedure p_one is\nbegin\n  null;\nend;"))]);
        fx.pipeline(&provider).run_cycle(&tracker(), at(10)).await.unwrap();

        provider.set("P_ONE", "procedure p_one is\nbegin\n  commit;\nend;");
        *fx.vcs.fail_saves.lock().unwrap() = vec![id("P_ONE")];
        let report = fx.pipeline(&provider).run_cycle(&tracker(), at(11)).await.unwrap();
        assert_eq!(report.changed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.commit, None);
        assert_eq!(report.committed, 0);
        assert!(fx.tree_text("P_ONE").unwrap().contains("null;"));
        assert_eq!(fx.ledger.select_uncommitted().await.unwrap().len(), 1);
        assert_eq!(fx.vcs.commits.lock().unwrap().len(), 1);

        fx.vcs.fail_saves.lock().unwrap().clear();
        let retry = fx.pipeline(&provider).run_cycle(&tracker(), at(12)).await.unwrap();
        assert_eq!(retry.unchanged, 1);
        assert_eq!(retry.commit.as_deref(), Some("sha2"));
        assert_eq!(retry.committed, 1);
        assert!(fx.tree_text("P_ONE").unwrap().contains("commit;"));
        assert!(fx.ledger.select_uncommitted().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_export_keeps_change_pending() {
        let fx = fixture();
        let provider = StubProvider::new(&[("P_ONE", Some("procedure p_one is begin null; end;"))]);
        fx.pipeline(&provider).run_cycle(&tracker(), at(10)).await.unwrap();

        // A directory where the export file should be makes the write fail.
        let export_file = fx.export.root().join(id("P_ONE").relative_path());
        std::fs::remove_file(&export_file).unwrap();
        std::fs::create_dir(&export_file).unwrap();

        provider.set("P_ONE", "procedure p_one is begin commit; end;");
        let report = fx.pipeline(&provider).run_cycle(&tracker(), at(11)).await.unwrap();
        assert_eq!(report.changed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.commit, None);
        assert!(fx.tree_text("P_ONE").unwrap().contains("null;"));
        assert_eq!(fx.ledger.select_uncommitted().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_change_without_tree_file_is_not_committed() {
        let fx = fixture();
        let provider = StubProvider::new(&[("P_ONE", Some("procedure p_one is begin null; end;"))]);

        *fx.vcs.fail_saves.lock().unwrap() = vec![id("P_ONE")];
        let report = fx.pipeline(&provider).run_cycle(&tracker(), at(10)).await.unwrap();
        assert_eq!(report.new, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.commit, None);
        assert!(fx.tree_text("P_ONE").is_none());
        assert!(fx.vcs.commits.lock().unwrap().is_empty());

        let pending = fx.ledger.select_uncommitted().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].commit_ref, None);
    }

    #[tokio::test]
    async fn test_only_changes_matching_the_tree_are_committed() {
        let fx = fixture();
        let provider = StubProvider::new(&[
            ("P_ONE", Some("procedure p_one is begin null; end;")),
            ("P_TWO", Some("procedure p_two is begin null; end;")),
        ]);
        fx.pipeline(&provider).run_cycle(&tracker(), at(10)).await.unwrap();

        provider.set("P_ONE", "procedure p_one is begin commit; end;");
        provider.set("P_TWO", "procedure p_two is begin rollback; end;");
        *fx.vcs.fail_saves.lock().unwrap() = vec![id("P_TWO")];
        let report = fx.pipeline(&provider).run_cycle(&tracker(), at(11)).await.unwrap();
        assert_eq!(report.changed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.commit.as_deref(), Some("sha2"));
        assert_eq!(report.committed, 1);

        let commits = fx.vcs.commits.lock().unwrap();
        assert_eq!(commits[1].0, vec!["APP/PROCEDURE/P_ONE.sql".to_string()]);
        assert_eq!(commits[1].1, "Update ERP objects on 2024-06-11 - 1 changes detected");
        drop(commits);

        let pending = fx.ledger.select_uncommitted().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id("P_TWO"));
    }
}
