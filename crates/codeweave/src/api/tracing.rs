//! Correlation ids for generate requests.
//!
//! Every engine session gets a `request_id`; each backend call within it gets
//! a span id derived from the page number. Both show up in log fields and the
//! request id is copied into escalation records.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Generate a unique id for one generate request.
pub fn generate_request_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    // Counter disambiguates ids minted within the same clock tick.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("cw-{ts:x}-{count:04x}")
}

/// Span id for one page (backend call) of a request.
pub fn page_span_id(request_id: &str, page: u32) -> String {
    format!("{request_id}:p{page}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique() {
        let id1 = generate_request_id();
        let id2 = generate_request_id();
        assert_ne!(id1, id2);
        assert!(id1.starts_with("cw-"));
    }

    #[test]
    fn span_id_includes_page() {
        let span = page_span_id("cw-abc-0001", 3);
        assert_eq!(span, "cw-abc-0001:p3");
    }
}
