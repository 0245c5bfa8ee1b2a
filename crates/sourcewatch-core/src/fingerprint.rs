//! Content fingerprints for canonical source text.
//!
//! A fingerprint is the lowercase hex SHA-256 of the canonical form. It is
//! the only key used for state comparison and snapshot deduplication.

use sha2::{Digest, Sha256};

use crate::models::{Fingerprint, SourceSnapshot};
use crate::normalize::normalize;

/// Hash canonical text into a [`Fingerprint`].
pub fn fingerprint(canonical: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Fingerprint::from_hex(format!("{:x}", hasher.finalize()))
}

/// Normalize raw source and fingerprint its canonical form.
pub fn snapshot(raw: Option<&str>) -> SourceSnapshot {
    let normalized = normalize(raw);
    let fingerprint = fingerprint(&normalized.canonical);
    SourceSnapshot {
        clean: normalized.clean,
        canonical: normalized.canonical,
        fingerprint,
    }
}
