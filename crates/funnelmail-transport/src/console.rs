//! Log-only mailer.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use funnelmail_core::{Delivery, Mailer, MailerError, OutgoingMessage};
use tracing::info;

/// Logs messages instead of sending them.
///
/// Every message is accepted with a synthetic id and counts as delivered, so
/// sends are recorded and subscribers advance. Previewing without touching
/// state is done by the sequencer's dry-run mode instead.
#[derive(Debug, Default)]
pub struct ConsoleMailer {
    counter: AtomicU64,
}

impl ConsoleMailer {
    /// Creates a console mailer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, message: &OutgoingMessage) -> Result<Delivery, MailerError> {
        if message.to.trim().is_empty() {
            return Err(MailerError::InvalidAddress("no recipient".into()));
        }

        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let message_id = format!("console-{n}");
        info!(
            %message_id,
            from = %message.from,
            to = %message.to,
            subject = %message.subject,
            bytes = message.body.len(),
            "Console transport: message logged, not sent"
        );
        Ok(Delivery::new(message_id))
    }
}
