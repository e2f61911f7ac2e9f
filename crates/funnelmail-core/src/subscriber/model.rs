//! Subscriber data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A subscriber progressing through the email sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)] // Mirrors the stored record flags
pub struct Subscriber {
    /// Email address (unique key).
    pub email: String,
    /// Display name used for personalization.
    pub name: String,
    /// When the subscriber joined.
    pub joined_at: DateTime<Utc>,
    /// Whether the address was confirmed.
    pub confirmed: bool,
    /// Whether the subscriber opted out.
    pub unsubscribed: bool,
    /// Set once the first sequence email was delivered.
    pub welcome_sent: bool,
    /// Number of sequence emails delivered so far.
    pub sequence_index: u32,
    /// Earliest time the next email may go out. `None` means now.
    pub next_send_time: Option<DateTime<Utc>>,
}

impl Subscriber {
    /// Creates a fresh subscriber at the start of the sequence, due immediately.
    #[must_use]
    pub fn new(name: impl Into<String>, email: &str, now: DateTime<Utc>) -> Self {
        Self {
            email: email.trim().to_lowercase(),
            name: name.into(),
            joined_at: now,
            confirmed: true,
            unsubscribed: false,
            welcome_sent: false,
            sequence_index: 0,
            next_send_time: Some(now),
        }
    }

    /// Returns true if the subscriber should be considered for sending at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.unsubscribed && self.next_send_time.is_none_or(|at| at <= now)
    }

    /// Returns true if every template has already been delivered.
    #[must_use]
    pub const fn has_completed(&self, template_count: usize) -> bool {
        self.sequence_index as usize >= template_count
    }

    /// Describes why this record cannot be sent to, if it cannot.
    #[must_use]
    pub fn malformed_reason(&self) -> Option<&'static str> {
        address_problem(&self.email)
    }
}

/// Describes why an address cannot be sent to, if it cannot.
pub(crate) fn address_problem(email: &str) -> Option<&'static str> {
    let email = email.trim();
    if email.is_empty() {
        return Some("empty email address");
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => None,
        _ => Some("invalid email address"),
    }
}

/// Result of a subscribe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// A new subscriber was stored.
    Created,
    /// The address was already subscribed; nothing changed.
    AlreadyExists,
}
