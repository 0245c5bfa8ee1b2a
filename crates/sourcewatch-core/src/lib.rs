//! # sourcewatch core
//!
//! Change-detection engine for database procedural objects: source
//! normalization, fingerprinting, line diffs, change classification,
//! notification batch selection and scan cadence.
//!
//! This crate contains no tokio, sqlx, process or network dependencies.
//! Persistence and delivery are reached through the [`ledger::Ledger`] and
//! [`notify::Notifier`] traits, implemented by the host application.

pub mod cadence;
pub mod diff;
pub mod fingerprint;
pub mod ledger;
pub mod models;
pub mod normalize;
pub mod notify;
pub mod recorder;
