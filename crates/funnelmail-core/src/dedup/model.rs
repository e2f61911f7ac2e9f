//! Sent-record model and storage trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::key::{DedupKey, normalize_recipient};
use crate::Result;

/// Evidence that a message was delivered.
///
/// Created once after a confirmed delivery and never updated or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentRecord {
    /// Derived deduplication key.
    pub key: DedupKey,
    /// Normalized recipient address.
    pub recipient: String,
    /// Rendered subject as sent.
    pub subject: String,
    /// Identifier returned by the mail provider.
    pub message_id: String,
    /// When the delivery was confirmed.
    pub sent_at: DateTime<Utc>,
}

impl SentRecord {
    /// Creates a record for a delivered message.
    #[must_use]
    pub fn new(
        recipient: &str,
        subject: impl Into<String>,
        message_id: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        let subject = subject.into();
        Self {
            key: DedupKey::derive(recipient, &subject),
            recipient: normalize_recipient(recipient),
            subject,
            message_id: message_id.into(),
            sent_at,
        }
    }
}

/// A place sent records are kept.
#[async_trait]
pub trait SentStore: Send + Sync {
    /// Returns true if a record with this key exists.
    async fn contains(&self, key: &DedupKey) -> Result<bool>;

    /// Stores a record. Storing an existing key is a no-op.
    async fn insert(&self, record: &SentRecord) -> Result<()>;
}
