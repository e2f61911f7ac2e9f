//! Deduplication key derivation.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Character substituted for anything non-alphanumeric in a subject.
const FILLER: char = '_';

/// Stable identifier for a (recipient, subject) pair.
///
/// The recipient is trimmed and lowercased. Every non-alphanumeric character
/// of the subject is replaced by `_` and the result is lowercased, so
/// punctuation and spacing differences do not defeat the check. The
/// normalized pair is hashed with SHA-256 and rendered as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    /// Derives the key for a recipient and rendered subject.
    #[must_use]
    pub fn derive(recipient: &str, subject: &str) -> Self {
        let recipient = normalize_recipient(recipient);
        let subject = normalize_subject(subject);

        let mut hasher = Sha256::new();
        hasher.update(recipient.as_bytes());
        // Separator byte cannot appear in either normalized component.
        hasher.update([0u8]);
        hasher.update(subject.as_bytes());
        let digest = hasher.finalize();

        let hex = digest.iter().fold(String::with_capacity(64), |mut acc, b| {
            use std::fmt::Write;
            let _ = write!(acc, "{b:02x}");
            acc
        });
        Self(hex)
    }

    /// Wraps an already-derived key (e.g. read back from storage).
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalizes a recipient address for keying.
#[must_use]
pub fn normalize_recipient(recipient: &str) -> String {
    recipient.trim().to_lowercase()
}

/// Normalizes a subject line for keying.
#[must_use]
pub fn normalize_subject(subject: &str) -> String {
    subject
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { FILLER })
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_subject() {
        assert_eq!(normalize_subject("Welcome, Ada!"), "welcome__ada_");
        assert_eq!(normalize_subject("Message 2"), "message_2");
        assert_eq!(normalize_subject(""), "");
    }

    #[test]
    fn test_key_is_hex_sha256() {
        let key = DedupKey::derive("a@x.com", "Hello");
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_recipient_case_and_whitespace_ignored() {
        assert_eq!(
            DedupKey::derive("  A@X.com ", "Hello"),
            DedupKey::derive("a@x.com", "Hello")
        );
    }

    #[test]
    fn test_punctuation_differences_collapse() {
        assert_eq!(
            DedupKey::derive("a@x.com", "Hello, world!"),
            DedupKey::derive("a@x.com", "hello  world?")
        );
    }

    #[test]
    fn test_personalized_subjects_differ() {
        assert_ne!(
            DedupKey::derive("a@x.com", "Welcome Ada"),
            DedupKey::derive("a@x.com", "Welcome Bob")
        );
    }

    #[test]
    fn test_recipients_differ() {
        assert_ne!(
            DedupKey::derive("a@x.com", "Message 1"),
            DedupKey::derive("b@x.com", "Message 1")
        );
    }

    #[test]
    fn test_component_boundary_is_unambiguous() {
        assert_ne!(
            DedupKey::derive("ab", "c"),
            DedupKey::derive("a", "bc")
        );
    }
}
