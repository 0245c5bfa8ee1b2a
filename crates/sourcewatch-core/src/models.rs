//! Core data models used throughout sourcewatch.
//!
//! These types describe the tracked database objects, the states recorded
//! for them in the ledger, and the change records produced when their
//! source moves.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// The procedural object kinds sourcewatch tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    Procedure,
    Function,
    Package,
    PackageBody,
    Trigger,
    View,
    Type,
    TypeBody,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 8] = [
        ObjectKind::Function,
        ObjectKind::Procedure,
        ObjectKind::Package,
        ObjectKind::PackageBody,
        ObjectKind::Trigger,
        ObjectKind::View,
        ObjectKind::Type,
        ObjectKind::TypeBody,
    ];

    /// Dictionary spelling, e.g. `"PACKAGE BODY"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Procedure => "PROCEDURE",
            ObjectKind::Function => "FUNCTION",
            ObjectKind::Package => "PACKAGE",
            ObjectKind::PackageBody => "PACKAGE BODY",
            ObjectKind::Trigger => "TRIGGER",
            ObjectKind::View => "VIEW",
            ObjectKind::Type => "TYPE",
            ObjectKind::TypeBody => "TYPE BODY",
        }
    }

    /// Directory spelling, e.g. `"PACKAGE_BODY"`.
    pub fn dir_name(&self) -> String {
        self.as_str().replace(' ', "_")
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = anyhow::Error;

    /// Accepts both the dictionary and the directory spelling, in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('_', " ").to_uppercase();
        for kind in ObjectKind::ALL {
            if kind.as_str() == wanted {
                return Ok(kind);
            }
        }
        bail!("Unknown object kind: '{}'", s)
    }
}

/// Identity of a tracked object: `(schema, name, kind)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    pub schema: String,
    pub name: String,
    pub kind: ObjectKind,
}

impl ObjectId {
    pub fn new(schema: impl Into<String>, name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            kind,
        }
    }

    /// Location of this object's snapshot inside a snapshot tree:
    /// `<schema>/<KIND_WITH_UNDERSCORES>/<name>.sql`.
    pub fn relative_path(&self) -> String {
        format!("{}/{}/{}.sql", self.schema, self.kind.dir_name(), self.name)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} ({})", self.schema, self.name, self.kind)
    }
}

/// An object reported by the source provider for the current scan.
#[derive(Debug, Clone)]
pub struct TrackedObject {
    pub id: ObjectId,
    pub last_modified: Option<NaiveDateTime>,
}

/// Content digest of canonical source text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of one object at one point in time.
///
/// `canonical` is only held in memory for hashing; the ledger persists
/// `clean` under `fingerprint` and nothing else.
#[derive(Debug, Clone)]
pub struct SourceSnapshot {
    pub clean: String,
    pub canonical: String,
    pub fingerprint: Fingerprint,
}

/// The recorded baseline for one object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectState {
    pub id: ObjectId,
    pub fingerprint: Fingerprint,
    pub last_modified: Option<NaiveDateTime>,
    pub capture_date: NaiveDate,
    pub location: Option<String>,
}

/// The latest state together with the snapshot text stored for its fingerprint.
#[derive(Debug, Clone)]
pub struct PriorState {
    pub state: ObjectState,
    pub snapshot_text: Option<String>,
}

/// A transition about to be written to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChange {
    pub id: ObjectId,
    pub old_fingerprint: Option<Fingerprint>,
    pub new_fingerprint: Fingerprint,
    pub change_date: NaiveDate,
    pub detected_at: NaiveDateTime,
    pub diff_summary: String,
    pub changed_lines: usize,
    pub location: Option<String>,
}

/// A transition as persisted in the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub record_id: i64,
    pub id: ObjectId,
    pub old_fingerprint: Option<Fingerprint>,
    pub new_fingerprint: Fingerprint,
    pub change_date: NaiveDate,
    pub detected_at: NaiveDateTime,
    pub diff_summary: String,
    pub changed_lines: usize,
    pub location: Option<String>,
    pub commit_ref: Option<String>,
    pub notified: bool,
}

impl ChangeRecord {
    pub fn from_new(record_id: i64, change: NewChange) -> Self {
        Self {
            record_id,
            id: change.id,
            old_fingerprint: change.old_fingerprint,
            new_fingerprint: change.new_fingerprint,
            change_date: change.change_date,
            detected_at: change.detected_at,
            diff_summary: change.diff_summary,
            changed_lines: change.changed_lines,
            location: change.location,
            commit_ref: None,
            notified: false,
        }
    }
}
