//! Source normalization for change detection.
//!
//! [`normalize`] splits raw object source into two forms:
//!
//! - **clean**: line endings normalized to `\n`, otherwise verbatim. This is
//!   what gets diffed, stored in the snapshot table and written to the
//!   version-control tree.
//! - **canonical**: comments removed, create-statement wording unified,
//!   whitespace collapsed, upper-cased and schema qualifiers dropped from
//!   quoted identifiers. Only ever hashed.
//!
//! Comment edits, reformatting, case changes and `CREATE OR REPLACE`
//! variations therefore never register as changes.

use std::sync::LazyLock;

use regex::Regex;

static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid regex"));

static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)--.*$").expect("valid regex"));

/// Leading declaration with any create-statement wording in front of it.
static CREATE_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:CREATE\s+(?:OR\s+REPLACE\s+)?(?:(?:NON)?EDITIONABLE\s+)?)?(PACKAGE\s+BODY|TYPE\s+BODY|PROCEDURE|FUNCTION|PACKAGE|TRIGGER|VIEW|TYPE)\b",
    )
    .expect("valid regex")
});

/// Leading declaration without any create-statement wording.
static BARE_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(PACKAGE\s+BODY|TYPE\s+BODY|PROCEDURE|FUNCTION|PACKAGE|TRIGGER|VIEW|TYPE)\b",
    )
    .expect("valid regex")
});

static SCHEMA_QUALIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[A-Z0-9_$#]+"\.("[^"]*")"#).expect("valid regex"));

/// The two forms of a source text produced by [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Normalized {
    pub clean: String,
    pub canonical: String,
}

/// Normalize raw source. Absent source yields two empty strings.
pub fn normalize(raw: Option<&str>) -> Normalized {
    let Some(raw) = raw else {
        return Normalized::default();
    };

    let clean = raw.replace("\r\n", "\n");

    let stripped = BLOCK_COMMENT.replace_all(&clean, " ");
    let stripped = LINE_COMMENT.replace_all(&stripped, " ");
    let declared = CREATE_DECL.replace(&stripped, "CREATE OR REPLACE $1");

    let collapsed = declared.split_whitespace().collect::<Vec<_>>().join(" ");
    let upper = collapsed.to_uppercase();
    let unqualified = SCHEMA_QUALIFIER.replace_all(&upper, "$1");
    let canonical = unqualified.trim_end().to_string();

    Normalized { clean, canonical }
}

/// Render clean source as a runnable script, adding `CREATE OR REPLACE`
/// in front of a bare leading declaration.
///
/// Dictionary views return `PROCEDURE P IS ...` without the create
/// wording; this is only applied when writing export files, never to the
/// text stored in the ledger.
pub fn deployable_script(clean: &str) -> String {
    match BARE_DECL.captures(clean).and_then(|c| c.get(1)) {
        Some(decl) => {
            let mut out = String::with_capacity(clean.len() + 18);
            out.push_str(&clean[..decl.start()]);
            out.push_str("CREATE OR REPLACE ");
            out.push_str(&clean[decl.start()..]);
            out
        }
        None => clean.to_string(),
    }
}
