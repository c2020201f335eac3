//! Cross-database message identity.
//!
//! Row ids are assigned independently by each database, so a message is
//! matched against the other side by its signature: author identity, send
//! time at millisecond precision, and the normalized body text.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Composite key identifying one message independently of its row id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageSignature {
    /// Author identity
    pub author: String,
    /// Send time in milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Normalized body
    pub body: String,
}

impl MessageSignature {
    /// Build the signature for a message
    #[must_use]
    pub fn new(author: &str, timestamp: DateTime<Utc>, body: &str) -> Self {
        Self {
            author: author.trim().to_string(),
            timestamp_ms: timestamp.timestamp_millis(),
            body: normalize_body(body),
        }
    }
}

fn whitespace_regex() -> &'static Regex {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    WHITESPACE.get_or_init(|| Regex::new(r"\s+").unwrap_or_else(|_| unreachable!("static pattern")))
}

/// Normalize message text so that cosmetic differences between two copies of
/// the same message do not break matching.
///
/// Applies Unicode NFC, drops control characters other than whitespace,
/// collapses whitespace runs to one space and trims the ends.
#[must_use]
pub fn normalize_body(text: &str) -> String {
    let normalized = text
        .nfc()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect::<String>();
    whitespace_regex().replace_all(&normalized, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize_body("  hello \n\n  world\t"), "hello world");
    }

    #[test]
    fn test_normalize_composes_unicode() {
        // "e" + combining acute vs precomposed "é"
        assert_eq!(normalize_body("caf\u{0065}\u{0301}"), normalize_body("caf\u{00e9}"));
    }

    #[test]
    fn test_normalize_drops_control_characters() {
        assert_eq!(normalize_body("a\u{0007}b"), "ab");
    }

    #[test]
    fn test_signature_ignores_sub_millisecond_noise_only() {
        let t1 = Utc.timestamp_opt(100, 1_000).single().unwrap_or_default();
        let t2 = Utc.timestamp_opt(100, 2_000).single().unwrap_or_default();
        let t3 = Utc.timestamp_opt(101, 0).single().unwrap_or_default();
        assert_eq!(MessageSignature::new("alice", t1, "hi"), MessageSignature::new("alice", t2, "hi "));
        assert_ne!(MessageSignature::new("alice", t1, "hi"), MessageSignature::new("alice", t3, "hi"));
        assert_ne!(MessageSignature::new("alice", t1, "hi"), MessageSignature::new("bob", t1, "hi"));
    }
}
