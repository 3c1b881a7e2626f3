//! Status digest rendering and notification deduplication
//!
//! Dedup compares against the last delivered digest only: an exact repeat of
//! the previous notification is suppressed, while a digest that was delivered
//! earlier but differs from the immediately preceding one is sent again.

use shared::SourceKey;

/// Liveness of one monitored source in a single poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStatus {
    pub key: SourceKey,
    pub live: bool,
}

impl SourceStatus {
    pub fn label(&self) -> &'static str {
        if self.live { "LIVE" } else { "OFFLINE" }
    }
}

/// One line per source in the given order, e.g. `**chan** is currently **LIVE**`
pub fn render_digest(statuses: &[SourceStatus]) -> String {
    statuses
        .iter()
        .map(|status| format!("**{}** is currently **{}**", status.key, status.label()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Default)]
pub struct DigestDedup {
    last_delivered: Option<String>,
}

impl DigestDedup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_deliver(&self, digest: &str) -> bool {
        let digest = digest.trim();
        !digest.is_empty() && self.last_delivered.as_deref() != Some(digest)
    }

    pub fn mark_delivered(&mut self, digest: &str) {
        self.last_delivered = Some(digest.trim().to_string());
    }

    pub fn last_delivered(&self) -> Option<&str> {
        self.last_delivered.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(key: &str, live: bool) -> SourceStatus {
        SourceStatus {
            key: SourceKey::new(key).unwrap(),
            live,
        }
    }

    #[test]
    fn test_render_keeps_order() {
        let digest = render_digest(&[status("b", true), status("a", false)]);
        assert_eq!(digest, "**b** is currently **LIVE**\n**a** is currently **OFFLINE**");
        assert_eq!(render_digest(&[]), "");
    }

    #[test]
    fn test_identical_consecutive_digest_suppressed() {
        let mut dedup = DigestDedup::new();
        assert!(dedup.should_deliver("x"));
        dedup.mark_delivered("x");
        assert!(!dedup.should_deliver("x"));
        assert!(!dedup.should_deliver("  x \n"));
    }

    #[test]
    fn test_older_digest_redelivered_after_change() {
        let mut dedup = DigestDedup::new();
        dedup.mark_delivered("offline");
        dedup.mark_delivered("live");
        assert!(dedup.should_deliver("offline"));
        assert_eq!(dedup.last_delivered(), Some("live"));
    }

    #[test]
    fn test_empty_digest_never_delivered() {
        let dedup = DigestDedup::new();
        assert!(!dedup.should_deliver(""));
        assert!(!dedup.should_deliver("  \n"));
    }
}
