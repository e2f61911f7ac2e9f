//! Outbound mail abstraction.
//!
//! The sequencer only ever talks to a [`Mailer`]; concrete transports live in
//! the `funnelmail-transport` crate.

use async_trait::async_trait;

/// Errors a mail transport can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MailerError {
    /// Connection failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The server rejected the message.
    #[error("Send failed: {0}")]
    Send(String),

    /// Invalid address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The message could not be built.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

/// A composed email ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Sender address.
    pub from: String,
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub body: String,
}

impl OutgoingMessage {
    /// Creates a new outgoing message.
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Confirmation of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Provider-assigned message identifier.
    pub message_id: String,
}

impl Delivery {
    /// Creates a delivery receipt.
    #[must_use]
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
        }
    }
}

/// Sends composed messages.
///
/// Implementations are not expected to be idempotent; duplicate protection
/// is the caller's job.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Attempts delivery of one message.
    async fn send(&self, message: &OutgoingMessage) -> Result<Delivery, MailerError>;
}
