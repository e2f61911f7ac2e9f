//! Batch processing.

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::summary::{BatchSummary, Outcome};
use crate::dedup::{DuplicateGuard, normalize_recipient};
use crate::mailer::{Delivery, Mailer, MailerError, OutgoingMessage};
use crate::schedule::next_weekday;
use crate::subscriber::{Advance, Subscriber, SubscriberStore, address_problem};
use crate::template::{Personalization, RenderedMessage, TemplateSource};
use crate::{Error, Result};

/// Tunables for a [`Sequencer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencerOptions {
    /// Sender address.
    pub from: String,
    /// Time of day for the next scheduled send; `None` keeps the run's time.
    pub send_time: Option<NaiveTime>,
    /// Delivery attempts per subscriber per batch (minimum 1).
    pub max_attempts: u32,
    /// Pause between delivery attempts.
    pub retry_delay: Duration,
    /// Render and report what would be sent without calling the mailer,
    /// recording sends or advancing subscribers.
    pub dry_run: bool,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self {
            from: String::new(),
            send_time: None,
            max_attempts: 1,
            retry_delay: Duration::ZERO,
            dry_run: false,
        }
    }
}

/// Runs drip-sequence batches.
pub struct Sequencer {
    store: Arc<dyn SubscriberStore>,
    templates: Arc<dyn TemplateSource>,
    mailer: Arc<dyn Mailer>,
    guard: DuplicateGuard,
    options: SequencerOptions,
    stop: Option<watch::Receiver<bool>>,
}

impl Sequencer {
    /// Creates a sequencer from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn SubscriberStore>,
        templates: Arc<dyn TemplateSource>,
        mailer: Arc<dyn Mailer>,
        guard: DuplicateGuard,
        options: SequencerOptions,
    ) -> Self {
        Self {
            store,
            templates,
            mailer,
            guard,
            options,
            stop: None,
        }
    }

    /// Attaches a stop signal. When it reads `true` the batch ends before the
    /// next subscriber; the one in flight is always finished.
    #[must_use]
    pub fn with_stop_signal(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Processes every due subscriber once.
    ///
    /// Per-subscriber problems are reported in the summary and never stop the
    /// batch.
    ///
    /// # Errors
    ///
    /// Returns an error only if the due subscribers cannot be fetched; in that
    /// case nothing was sent or modified.
    pub async fn run_batch(&self, now: DateTime<Utc>) -> Result<BatchSummary> {
        let due = self.store.fetch_due(now).await?;
        let template_count = self.templates.template_count();
        info!(
            due = due.subscribers.len(),
            template_count,
            dry_run = self.options.dry_run,
            %now,
            "Starting batch"
        );

        let mut summary = BatchSummary::default();
        for bad in &due.unreadable {
            summary.record(&bad.email, &Outcome::SkippedMalformed(bad.reason.clone()));
        }

        let mut seen = HashSet::new();
        for subscriber in due.subscribers {
            if self.stop_requested() {
                warn!("Stop requested, ending batch early");
                summary.aborted = true;
                break;
            }
            if !seen.insert(subscriber.email.clone()) {
                debug!(email = %subscriber.email, "Subscriber listed twice, skipping repeat");
                continue;
            }
            if !subscriber.is_due(now) {
                debug!(email = %subscriber.email, "Store returned a subscriber that is not due");
                continue;
            }

            let outcome = self
                .process(&subscriber, template_count, now, &mut summary)
                .await;
            summary.record(&subscriber.email, &outcome);
        }

        info!(%summary, "Batch complete");
        Ok(summary)
    }

    /// Sends the named template once to each recipient.
    ///
    /// Recipients go through the same duplicate guard as sequence emails, so
    /// repeating a broadcast only reaches addresses that missed it. Known
    /// subscribers are personalized with their stored name. Subscriber
    /// progress is never changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Template`] if no template has that name.
    pub async fn send_named(
        &self,
        name: &str,
        recipients: &[String],
        now: DateTime<Utc>,
    ) -> Result<BatchSummary> {
        let template = self
            .templates
            .resolve_named(name)
            .ok_or_else(|| Error::Template(format!("no template named {name}")))?;
        info!(template = name, recipients = recipients.len(), "Starting broadcast");

        let mut summary = BatchSummary::default();
        let mut seen = HashSet::new();
        for recipient in recipients {
            if self.stop_requested() {
                warn!("Stop requested, ending broadcast early");
                summary.aborted = true;
                break;
            }
            let email = normalize_recipient(recipient);
            if !seen.insert(email.clone()) {
                continue;
            }
            if let Some(reason) = address_problem(&email) {
                warn!(%email, reason, "Skipping malformed recipient");
                summary.record(&email, &Outcome::SkippedMalformed(reason.to_string()));
                continue;
            }

            let display_name = match self.store.get(&email).await {
                Ok(found) => found.map(|s| s.name).unwrap_or_default(),
                Err(e) => {
                    warn!(%email, error = %e, "Subscriber lookup failed, not personalizing");
                    String::new()
                }
            };
            let rendered = template.render(&Personalization::new(display_name, now));

            let outcome = match self.dispatch(&email, &rendered, now, &mut summary).await {
                ControlFlow::Continue(delivery) => Outcome::Sent {
                    message_id: delivery.message_id,
                },
                ControlFlow::Break(outcome) => outcome,
            };
            summary.record(&email, &outcome);
        }

        info!(%summary, template = name, "Broadcast complete");
        Ok(summary)
    }

    async fn process(
        &self,
        subscriber: &Subscriber,
        template_count: usize,
        now: DateTime<Utc>,
        summary: &mut BatchSummary,
    ) -> Outcome {
        let email = subscriber.email.as_str();

        if let Some(reason) = subscriber.malformed_reason() {
            warn!(email, reason, "Skipping malformed subscriber");
            return Outcome::SkippedMalformed(reason.to_string());
        }

        let index = subscriber.sequence_index;
        if subscriber.has_completed(template_count) {
            debug!(email, index, "Sequence complete");
            return Outcome::SkippedComplete;
        }

        let Some(template) = self.templates.resolve(index) else {
            warn!(email, index, "No template for sequence position");
            return Outcome::SkippedMissingTemplate { index };
        };

        let rendered = template.render(&Personalization::new(&subscriber.name, now));

        let delivery = match self.dispatch(email, &rendered, now, summary).await {
            ControlFlow::Continue(delivery) => delivery,
            ControlFlow::Break(outcome) => return outcome,
        };

        let update = Advance {
            email: email.to_string(),
            from_index: index,
            next_send_time: next_weekday(now, self.options.send_time),
            mark_welcome: index == 0,
        };
        match self.store.advance(&update).await {
            Ok(true) => {
                debug!(email, next = %update.next_send_time, "Advanced subscriber");
            }
            Ok(false) => {
                warn!(email, index, "Subscriber changed during send, not advanced");
                summary.warn(email, "sent but subscriber state changed; not advanced");
            }
            Err(e) => {
                warn!(email, error = %e, "Failed to advance subscriber");
                summary.warn(email, format!("sent but not advanced: {e}"));
            }
        }

        Outcome::Sent {
            message_id: delivery.message_id,
        }
    }

    /// Checks the duplicate guard, delivers and records one message.
    ///
    /// Breaks with the final outcome when nothing was delivered.
    async fn dispatch(
        &self,
        email: &str,
        rendered: &RenderedMessage,
        now: DateTime<Utc>,
        summary: &mut BatchSummary,
    ) -> ControlFlow<Outcome, Delivery> {
        match self.guard.is_already_sent(email, &rendered.subject).await {
            Ok(true) => {
                info!(email, subject = %rendered.subject, "Already sent, skipping");
                return ControlFlow::Break(Outcome::SkippedDuplicate);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(email, error = %e, "Duplicate check failed");
                return ControlFlow::Break(Outcome::Failed(format!(
                    "duplicate check failed: {e}"
                )));
            }
        }

        if self.options.dry_run {
            info!(
                email,
                subject = %rendered.subject,
                bytes = rendered.body.len(),
                "Dry run: would send"
            );
            return ControlFlow::Break(Outcome::WouldSend);
        }

        let message = OutgoingMessage::new(
            &self.options.from,
            email,
            &rendered.subject,
            rendered.body.clone(),
        );
        let delivery = match self.deliver(&message).await {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!(email, error = %e, "Delivery failed");
                return ControlFlow::Break(Outcome::Failed(e.to_string()));
            }
        };
        info!(email, message_id = %delivery.message_id, "Sent email");

        if let Err(e) = self
            .guard
            .record_sent(email, &rendered.subject, &delivery.message_id, now)
            .await
        {
            warn!(email, error = %e, "Failed to record sent message");
            summary.warn(email, format!("sent but not recorded: {e}"));
        }

        ControlFlow::Continue(delivery)
    }

    async fn deliver(
        &self,
        message: &OutgoingMessage,
    ) -> std::result::Result<Delivery, MailerError> {
        let attempts = self.options.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.mailer.send(message).await {
                Ok(delivery) => return Ok(delivery),
                Err(e) if attempt < attempts => {
                    warn!(to = %message.to, attempt, error = %e, "Send attempt failed, retrying");
                    if !self.options.retry_delay.is_zero() {
                        tokio::time::sleep(self.options.retry_delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
