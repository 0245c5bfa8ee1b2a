//! Long-running tracker service.
//!
//! [`Tracker`] owns the concrete collaborators built from config. The
//! `watch` loop runs a cycle, fires the daily summary once per day at the
//! configured hour, then sleeps until the next aligned scan boundary.
//! Ctrl-C is honoured only while sleeping, so a cycle always completes.

use anyhow::Result;
use chrono::{Local, NaiveDateTime};

use sourcewatch_core::cadence::{next_run, sleep_slice, SummaryGate, MAX_SLEEP};
use sourcewatch_core::notify::{dispatch_summary, DispatchOutcome};

use crate::config::Config;
use crate::export::ExportDir;
use crate::provider_fs::ExportDirProvider;
use crate::scan::{Pipeline, ScanReport};
use crate::sqlite_ledger::SqliteLedger;
use crate::vcs_git::GitRepo;
use crate::webhook::WebhookNotifier;

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub struct Tracker {
    config: Config,
    ledger: SqliteLedger,
    provider: ExportDirProvider,
    repo: GitRepo,
    export: ExportDir,
}

impl Tracker {
    /// Open the ledger (running migrations) and prepare the git tree.
    pub async fn open(config: &Config) -> Result<Self> {
        let ledger = SqliteLedger::open(&config.db.path).await?;
        let provider = ExportDirProvider::new(&config.source)?;
        let repo = GitRepo::new(&config.git, &config.tracker.project);
        repo.prepare()?;
        let export = ExportDir::new(&config.tracker.export_dir);

        Ok(Self {
            config: config.clone(),
            ledger,
            provider,
            repo,
            export,
        })
    }

    pub fn ledger(&self) -> &SqliteLedger {
        &self.ledger
    }

    pub fn export(&self) -> &ExportDir {
        &self.export
    }

    pub async fn scan(&self, at: NaiveDateTime) -> Result<ScanReport> {
        let pipeline = Pipeline {
            provider: &self.provider,
            ledger: &self.ledger,
            vcs: &self.repo,
            export: &self.export,
        };
        pipeline.run_cycle(&self.config.tracker, at).await
    }

    /// Send the summary now. `Ok(None)` when no webhook is configured.
    pub async fn summary(&self, at: NaiveDateTime) -> Result<Option<DispatchOutcome>> {
        let notify = &self.config.notify;
        if !notify.is_enabled() {
            tracing::warn!("No webhook URL configured, skipping summary");
            return Ok(None);
        }

        let notifier = WebhookNotifier::from_config(&self.config)?;
        let outcome = dispatch_summary(
            &self.ledger,
            &notifier,
            self.config.schedule.summary_window_hours,
            at,
            notify.send_when_empty,
        )
        .await?;
        Ok(Some(outcome))
    }

    /// One scan followed by the summary gate.
    pub async fn cycle(&self, gate: &mut SummaryGate) -> Result<ScanReport> {
        let started = now();
        let report = self.scan(started).await?;

        let at = now();
        if gate.should_fire(at) {
            tracing::info!("Notification hour reached, sending daily summary");
            if let Err(e) = self.summary(at).await {
                tracing::error!("Failed to send daily summary: {:#}", e);
            }
        }
        Ok(report)
    }

    pub async fn close(&self) {
        self.ledger.close().await;
    }
}

/// Run scans on the configured cadence until Ctrl-C.
pub async fn watch(config: &Config) -> Result<()> {
    let tracker = Tracker::open(config).await?;
    let mut gate = SummaryGate::new(config.schedule.notification_hour);
    let interval = config.schedule.scan_interval_hours;

    tracing::info!(
        "Watching {} every {} hours, summary at {:02}:00",
        config.tracker.project,
        interval,
        config.schedule.notification_hour
    );

    loop {
        match tracker.cycle(&mut gate).await {
            Ok(report) if report.failed > 0 => {
                tracing::warn!("Cycle finished with {} failures", report.failed)
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Scan cycle failed: {:#}", e),
        }

        let next = next_run(interval, now());
        tracing::info!("Next scan at {}", next.format("%Y-%m-%d %H:%M"));

        while let Some(slice) = sleep_slice(next, now(), MAX_SLEEP) {
            tokio::select! {
                _ = tokio::time::sleep(slice) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted, shutting down");
                    tracker.close().await;
                    return Ok(());
                }
            }
        }
    }
}
