//! # sourcewatch
//!
//! Tracks source changes of database procedural objects (procedures,
//! functions, packages, triggers, views, types), records versioned
//! snapshots in a SQLite ledger and a git working tree, and sends a daily
//! summary of recent changes to a webhook.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────┐   ┌──────────────┐
//! │ Export tree  │──▶│ sourcewatch-core  │──▶│ SQLite ledger│
//! │ <S>/<K>/N.sql│   │ normalize / hash  │   └──────┬───────┘
//! └──────────────┘   │ diff / record     │          │
//!                    └─────────┬─────────┘          ▼
//!                              ▼              ┌───────────┐
//!                        ┌───────────┐        │  Webhook  │
//!                        │ Git tree  │        │  summary  │
//!                        └───────────┘        └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_ledger`] | SQLite `Ledger` implementation |
//! | [`traits`] | `SourceProvider` and `VersionControl` seams |
//! | [`provider_fs`] | Export-directory source provider |
//! | [`export`] | Deployable script directory |
//! | [`vcs_git`] | Git working tree sink |
//! | [`webhook`] | HTML summary notifier |
//! | [`scan`] | One tracking cycle |
//! | [`service`] | Cadence loop |
//! | [`stats`] | Ledger overview |
//! | [`logging`] | Subscriber setup |

pub mod config;
pub mod db;
pub mod export;
pub mod logging;
pub mod migrate;
pub mod provider_fs;
pub mod scan;
pub mod service;
pub mod sqlite_ledger;
pub mod stats;
pub mod traits;
pub mod vcs_git;
pub mod webhook;
