//! # sourcewatch CLI
//!
//! ## Usage
//!
//! ```bash
//! sourcewatch --config ./config/sourcewatch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sourcewatch init` | Create the ledger, prepare the git tree and export directory |
//! | `sourcewatch scan` | Run a single tracking cycle |
//! | `sourcewatch watch` | Run tracking cycles on the configured cadence |
//! | `sourcewatch summary` | Send the change summary now |
//! | `sourcewatch stats` | Show ledger counts |

use anyhow::bail;
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use sourcewatch::config;
use sourcewatch::{logging, service, stats};
use sourcewatch_core::cadence::SummaryGate;
use sourcewatch_core::notify::DispatchOutcome;

#[derive(Parser)]
#[command(
    name = "sourcewatch",
    about = "Track source changes of database procedural objects",
    version,
    long_about = "sourcewatch fingerprints the source of database procedures, functions, \
    packages, triggers, views and types, records every change in a local SQLite ledger \
    and a git repository, and sends a daily summary of recent changes to a webhook."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sourcewatch.toml")]
    config: PathBuf,

    /// Override `tracker.env` from the config file.
    #[arg(long, global = true, value_enum)]
    env: Option<Environment>,

    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Environment {
    Dev,
    Uat,
    Prod,
}

impl Environment {
    fn label(self) -> &'static str {
        match self {
            Environment::Dev => "DEV",
            Environment::Uat => "UAT",
            Environment::Prod => "PROD",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the ledger, git repository and export directory.
    ///
    /// Idempotent: running it again only pulls the repository.
    Init,

    /// Run one tracking cycle and exit.
    ///
    /// Sends the daily summary as well when run during the notification hour.
    Scan,

    /// Run tracking cycles every `schedule.scan_interval_hours` until Ctrl-C.
    Watch,

    /// Send the summary of unnotified changes now, regardless of the hour.
    Summary,

    /// Show ledger statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut cfg = config::load_config(&cli.config)?;
    if let Some(env) = cli.env {
        cfg.tracker.env = env.label().to_string();
    }

    match cli.command {
        Commands::Init => {
            let tracker = service::Tracker::open(&cfg).await?;
            tracker.export().ensure()?;
            tracker.close().await;
            println!("Ledger initialized at {}", cfg.db.path.display());
            println!("Git repository ready at {}", cfg.git.repo_path.display());
        }
        Commands::Scan => {
            let tracker = service::Tracker::open(&cfg).await?;
            let mut gate = SummaryGate::new(cfg.schedule.notification_hour);
            let report = tracker.cycle(&mut gate).await?;
            tracker.close().await;

            println!(
                "Scan ({}) complete:",
                if report.full_scan { "full" } else { "incremental" }
            );
            println!("  Objects:   {}", report.total);
            println!("  New:       {}", report.new);
            println!("  Changed:   {}", report.changed);
            println!("  Unchanged: {}", report.unchanged);
            println!("  Skipped:   {}", report.skipped);
            println!("  Failed:    {}", report.failed);
            match &report.commit {
                Some(sha) => println!("  Commit:    {} ({} changes)", sha, report.committed),
                None => println!("  Commit:    none"),
            }

            if report.failed > 0 {
                bail!("{} objects failed to record", report.failed);
            }
        }
        Commands::Watch => {
            service::watch(&cfg).await?;
        }
        Commands::Summary => {
            let tracker = service::Tracker::open(&cfg).await?;
            let outcome = tracker.summary(Local::now().naive_local()).await?;
            tracker.close().await;

            match outcome {
                None => println!("Summary skipped: no webhook configured."),
                Some(DispatchOutcome::Empty) => println!("No unnotified changes."),
                Some(DispatchOutcome::Delivered(n)) => println!("Summary sent ({} changes).", n),
                Some(DispatchOutcome::NotDelivered) => bail!("Summary delivery failed"),
            }
        }
        Commands::Stats => {
            let ledger = sourcewatch::sqlite_ledger::SqliteLedger::open(&cfg.db.path).await?;
            stats::run_stats(&cfg, ledger.pool()).await?;
            ledger.close().await;
        }
    }

    Ok(())
}
