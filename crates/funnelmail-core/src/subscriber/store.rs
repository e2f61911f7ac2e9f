//! Subscriber store abstraction used by the sequencer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::model::Subscriber;
use crate::Result;

/// A progress update applied after a confirmed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advance {
    /// Subscriber key.
    pub email: String,
    /// The index that was just delivered. The update only applies if the
    /// stored index still equals it.
    pub from_index: u32,
    /// Next eligible send time.
    pub next_send_time: DateTime<Utc>,
    /// Set the one-time welcome marker.
    pub mark_welcome: bool,
}

/// A stored record that could not be decoded into a [`Subscriber`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableRecord {
    /// Stored key, empty if even that could not be read.
    pub email: String,
    /// What could not be decoded.
    pub reason: String,
}

/// Result of a due query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DueSubscribers {
    /// Subscribers ready to be processed, ordered by email.
    pub subscribers: Vec<Subscriber>,
    /// Due rows that could not be decoded.
    pub unreadable: Vec<UnreadableRecord>,
}

/// Storage for subscriber records.
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    /// Fetches subscribers that are not unsubscribed and whose next send time
    /// is absent or not after `now`.
    async fn fetch_due(&self, now: DateTime<Utc>) -> Result<DueSubscribers>;

    /// Gets a subscriber by email.
    async fn get(&self, email: &str) -> Result<Option<Subscriber>>;

    /// Atomically moves a subscriber to `from_index + 1`.
    ///
    /// Returns false if no record matched (unknown email or the index moved
    /// underneath us).
    async fn advance(&self, update: &Advance) -> Result<bool>;
}
