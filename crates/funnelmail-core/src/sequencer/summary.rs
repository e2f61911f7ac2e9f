//! Batch outcome reporting.

use std::fmt;

use serde::Serialize;

/// What happened to one subscriber during a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The message was delivered.
    Sent {
        /// Provider message id.
        message_id: String,
    },
    /// Dry run: the message would have been delivered. Nothing was recorded.
    WouldSend,
    /// This message was already delivered; state left alone.
    SkippedDuplicate,
    /// The subscriber finished the sequence.
    SkippedComplete,
    /// No template exists at the subscriber's position.
    SkippedMissingTemplate {
        /// Sequence position without a template.
        index: u32,
    },
    /// The subscriber record is unusable.
    SkippedMalformed(String),
    /// Delivery (or the duplicate lookup) failed; will retry next batch.
    Failed(String),
}

/// A per-subscriber note attached to the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberIssue {
    /// Subscriber email.
    pub email: String,
    /// What went wrong.
    pub detail: String,
}

/// Counts and notes for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Messages delivered.
    pub sent: usize,
    /// Messages a dry run would have delivered.
    pub would_send: usize,
    /// Subscribers skipped as already sent.
    pub skipped_duplicate: usize,
    /// Subscribers past the end of the sequence.
    pub skipped_complete: usize,
    /// Deliveries that failed.
    pub failed: usize,
    /// Subscribers whose next template is missing.
    pub skipped_missing_template: usize,
    /// Subscribers with unusable records.
    pub skipped_malformed: usize,
    /// Failure details.
    pub failures: Vec<SubscriberIssue>,
    /// Non-fatal warnings.
    pub warnings: Vec<SubscriberIssue>,
    /// The batch was stopped before every subscriber was processed.
    pub aborted: bool,
}

impl BatchSummary {
    /// Tallies one subscriber outcome.
    pub fn record(&mut self, email: &str, outcome: &Outcome) {
        match outcome {
            Outcome::Sent { .. } => self.sent += 1,
            Outcome::WouldSend => self.would_send += 1,
            Outcome::SkippedDuplicate => self.skipped_duplicate += 1,
            Outcome::SkippedComplete => self.skipped_complete += 1,
            Outcome::SkippedMissingTemplate { index } => {
                self.skipped_missing_template += 1;
                self.warn(email, format!("no template for sequence position {index}"));
            }
            Outcome::SkippedMalformed(reason) => {
                self.skipped_malformed += 1;
                self.warn(email, reason.clone());
            }
            Outcome::Failed(reason) => {
                self.failed += 1;
                self.failures.push(SubscriberIssue {
                    email: email.to_string(),
                    detail: reason.clone(),
                });
            }
        }
    }

    /// Adds a warning.
    pub fn warn(&mut self, email: &str, detail: impl Into<String>) {
        self.warnings.push(SubscriberIssue {
            email: email.to_string(),
            detail: detail.into(),
        });
    }

    /// Number of subscribers processed.
    #[must_use]
    pub const fn processed(&self) -> usize {
        self.sent
            + self.would_send
            + self.skipped_duplicate
            + self.skipped_complete
            + self.failed
            + self.skipped_missing_template
            + self.skipped_malformed
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent={} duplicate={} complete={} failed={} missing_template={} malformed={}",
            self.sent,
            self.skipped_duplicate,
            self.skipped_complete,
            self.failed,
            self.skipped_missing_template,
            self.skipped_malformed,
        )?;
        if self.would_send > 0 {
            write!(f, " would_send={}", self.would_send)?;
        }
        if self.aborted {
            f.write_str(" (aborted)")?;
        }
        Ok(())
    }
}
