//! Duplicate and loop detection across pages.
//!
//! Backends asked to "continue" sometimes repeat the last page, re-emit a
//! chunk of earlier output, or start the whole answer over. Any of those
//! ends the session instead of being appended.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

/// Collapse whitespace runs to a single space, trim, lower-case.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SHA-256 hex digest of the normalized text.
pub fn fingerprint(text: &str) -> String {
    format!("{:x}", Sha256::digest(normalize(text).as_bytes()))
}

/// Why a page was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplicate {
    /// Same normalized text as an earlier page.
    SeenFingerprint,
    /// The page is a repeat of output already accumulated.
    ContainedInAccumulated,
    /// The page opens with everything accumulated so far (the backend started over).
    Restarted,
}

/// Per-session record of page fingerprints.
#[derive(Debug, Default)]
pub struct DedupGuard {
    seen: HashSet<String>,
}

impl DedupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a page before it is committed.
    ///
    /// `raw` is the page as streamed (fingerprinted as-is); `content` is the
    /// page with the continuation marker removed, compared against the
    /// accumulated text.
    pub fn check(&self, raw: &str, content: &str, accumulated: &str) -> Option<Duplicate> {
        if self.seen.contains(&fingerprint(raw)) {
            return Some(Duplicate::SeenFingerprint);
        }
        let page = normalize(content);
        let acc = normalize(accumulated);
        if acc.contains(&page) {
            return Some(Duplicate::ContainedInAccumulated);
        }
        if !acc.is_empty() && page.starts_with(&acc) {
            return Some(Duplicate::Restarted);
        }
        None
    }

    /// Remember a committed page.
    pub fn record(&mut self, raw: &str) {
        self.seen.insert(fingerprint(raw));
    }

    /// Number of distinct pages recorded.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
