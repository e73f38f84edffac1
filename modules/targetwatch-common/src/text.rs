use std::collections::BTreeSet;

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Content fingerprint of a digest's inputs.
///
/// Order-independent: ids are sorted and deduplicated, then the
/// comma-joined string is hashed with SHA-256 and hex-encoded.
pub fn digest_fingerprint(ids: &[Uuid]) -> String {
    let sorted: BTreeSet<String> = ids.iter().map(Uuid::to_string).collect();
    let joined = sorted.into_iter().collect::<Vec<_>>().join(",");
    hex::encode(Sha256::digest(joined.as_bytes()))
}

/// Lowercase, collapse whitespace and strip punctuation other than `-`.
pub fn normalize_text(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Jaccard similarity of the normalized token sets. Two empty strings score 1.0.
pub fn token_jaccard(a: &str, b: &str) -> f64 {
    let na = normalize_text(a);
    let nb = normalize_text(b);
    let ta: BTreeSet<&str> = na.split_whitespace().collect();
    let tb: BTreeSet<&str> = nb.split_whitespace().collect();
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let inter = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    inter / union
}

/// Truncate to `max_chars` characters, appending an ellipsis when cut.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Whether any of `terms` occurs in `haystack`, case-insensitively.
pub fn mentions_any(haystack: &str, terms: &[String]) -> bool {
    let lower = haystack.to_lowercase();
    terms.iter().any(|t| !t.is_empty() && lower.contains(t.as_str()))
}
