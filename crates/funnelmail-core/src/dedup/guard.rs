//! Two-tier duplicate guard.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::key::DedupKey;
use super::model::{SentRecord, SentStore};
use crate::Result;

/// Prevents the same (recipient, subject) pair from being sent twice.
///
/// The local tier is consulted first; a miss falls through to the shared
/// tier, which is the source of truth. Shared hits are copied back into the
/// local tier so later checks stay local.
#[derive(Clone)]
pub struct DuplicateGuard {
    local: Arc<dyn SentStore>,
    shared: Arc<dyn SentStore>,
}

impl DuplicateGuard {
    /// Creates a guard over a local and a shared tier.
    #[must_use]
    pub fn new(local: Arc<dyn SentStore>, shared: Arc<dyn SentStore>) -> Self {
        Self { local, shared }
    }

    /// Returns true if this message was already delivered.
    ///
    /// A local-tier failure is logged and treated as a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared tier cannot be queried.
    pub async fn is_already_sent(&self, recipient: &str, subject: &str) -> Result<bool> {
        let key = DedupKey::derive(recipient, subject);

        match self.local.contains(&key).await {
            Ok(true) => {
                debug!(%key, recipient, "Duplicate found in local tier");
                return Ok(true);
            }
            Ok(false) => {}
            Err(e) => warn!(%key, error = %e, "Local sent-marker lookup failed"),
        }

        if !self.shared.contains(&key).await? {
            return Ok(false);
        }

        debug!(%key, recipient, "Duplicate found in shared tier");
        let backfill = SentRecord::new(recipient, subject, String::new(), Utc::now());
        if let Err(e) = self.local.insert(&backfill).await {
            warn!(%key, error = %e, "Failed to back-fill local sent marker");
        }
        Ok(true)
    }

    /// Records a confirmed delivery in both tiers.
    ///
    /// Only call this after the mail provider accepted the message.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared tier write fails. A local-tier failure
    /// is logged only.
    pub async fn record_sent(
        &self,
        recipient: &str,
        subject: &str,
        message_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        let record = SentRecord::new(recipient, subject, message_id, sent_at);

        self.shared.insert(&record).await?;
        if let Err(e) = self.local.insert(&record).await {
            warn!(key = %record.key, error = %e, "Failed to write local sent marker");
        }
        Ok(())
    }
}
