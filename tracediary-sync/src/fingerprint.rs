//! Content fingerprints for dirty detection without a network round trip.

use crate::entry::SyncEntryMetadata;
use sha2::{Digest, Sha256};

/// Line endings folded to LF, trailing spaces and tabs dropped per line,
/// trailing blank lines dropped.
pub fn normalize_content(content: &str) -> String {
    let unified = content.replace("\r\n", "\n");
    let lines: Vec<&str> = unified
        .split('\n')
        .map(|line| line.trim_end_matches([' ', '\t']))
        .collect();
    lines.join("\n").trim_end_matches('\n').to_string()
}

/// Whether two bodies are equal after normalization.
pub fn contents_match(a: &str, b: &str) -> bool {
    normalize_content(a) == normalize_content(b)
}

/// `v1:{sha256(scope \n normalized)}:{normalized char count}`.
pub fn fingerprint(entry: &SyncEntryMetadata) -> String {
    let normalized = normalize_content(entry.content());
    let mut hasher = Sha256::new();
    hasher.update(entry.scope().as_bytes());
    hasher.update(b"\n");
    hasher.update(normalized.as_bytes());
    format!(
        "v1:{}:{}",
        hex::encode(hasher.finalize()),
        normalized.chars().count()
    )
}
