//! SMTP delivery via `lettre`.

use std::sync::Arc;

use async_trait::async_trait;
use funnelmail_core::{Delivery, Mailer, MailerError, OutgoingMessage, Security, TransportConfig};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tokio::sync::Mutex;
use tracing::debug;

use crate::oauth::TokenSource;

/// How the mailer authenticates.
enum Auth {
    /// Username and password (PLAIN/LOGIN).
    Password(String),
    /// XOAUTH2 with a refreshed access token.
    OAuth(Arc<TokenSource>),
}

type Transport = AsyncSmtpTransport<Tokio1Executor>;

/// A pooled transport and the secret it authenticates with.
struct CachedTransport {
    secret: String,
    transport: Arc<Transport>,
}

/// Sends through an SMTP relay.
///
/// The underlying connection pool is kept between sends and rebuilt only when
/// the secret changes (a refreshed access token).
pub struct SmtpMailer {
    host: String,
    port: u16,
    security: Security,
    username: String,
    auth: Auth,
    cached: Mutex<Option<CachedTransport>>,
}

impl SmtpMailer {
    /// Creates a mailer that authenticates with the configured password.
    #[must_use]
    pub fn with_password(config: &TransportConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.effective_port(),
            security: config.security,
            username: config.username.clone(),
            auth: Auth::Password(config.password.clone()),
            cached: Mutex::new(None),
        }
    }

    /// Creates a mailer that authenticates with XOAUTH2.
    #[must_use]
    pub fn with_oauth(config: &TransportConfig, tokens: Arc<TokenSource>) -> Self {
        Self {
            host: config.host.clone(),
            port: config.effective_port(),
            security: config.security,
            username: config.username.clone(),
            auth: Auth::OAuth(tokens),
            cached: Mutex::new(None),
        }
    }

    async fn secret(&self) -> Result<String, MailerError> {
        match &self.auth {
            Auth::Password(password) => Ok(password.clone()),
            Auth::OAuth(tokens) => tokens
                .access_token()
                .await
                .map_err(|e| MailerError::Authentication(e.to_string())),
        }
    }

    const fn mechanisms(&self) -> &'static [Mechanism] {
        match self.auth {
            Auth::Password(_) => &[Mechanism::Plain, Mechanism::Login],
            Auth::OAuth(_) => &[Mechanism::Xoauth2],
        }
    }

    fn build_transport(&self, secret: &str) -> Result<Transport, MailerError> {
        let builder = match self.security {
            Security::Tls => Transport::relay(&self.host),
            Security::StartTls => Transport::starttls_relay(&self.host),
            Security::None => Ok(Transport::builder_dangerous(&self.host)),
        }
        .map_err(|e| MailerError::Connection(e.to_string()))?;

        Ok(builder
            .port(self.port)
            .credentials(Credentials::new(self.username.clone(), secret.to_string()))
            .authentication(self.mechanisms().to_vec())
            .build())
    }

    /// Returns the pooled transport, rebuilding it if the secret changed.
    async fn transport(&self) -> Result<Arc<Transport>, MailerError> {
        let secret = self.secret().await?;
        let mut cached = self.cached.lock().await;

        if let Some(entry) = cached.as_ref()
            && entry.secret == secret
        {
            return Ok(Arc::clone(&entry.transport));
        }

        debug!(host = %self.host, port = self.port, "Building SMTP transport");
        let transport = Arc::new(self.build_transport(&secret)?);
        *cached = Some(CachedTransport {
            secret,
            transport: Arc::clone(&transport),
        });
        Ok(transport)
    }
}

/// Builds a plain-text RFC 5322 message.
///
/// # Errors
///
/// Returns an error if an address cannot be parsed or the message cannot be
/// assembled.
pub fn build_message(message: &OutgoingMessage) -> Result<Message, MailerError> {
    let from: Mailbox = message
        .from
        .parse()
        .map_err(|e| MailerError::InvalidAddress(format!("{}: {e}", message.from)))?;
    let to: Mailbox = message
        .to
        .parse()
        .map_err(|e| MailerError::InvalidAddress(format!("{}: {e}", message.to)))?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(message.subject.as_str())
        .header(ContentType::TEXT_PLAIN)
        .body(message.body.clone())
        .map_err(|e| MailerError::InvalidMessage(e.to_string()))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &OutgoingMessage) -> Result<Delivery, MailerError> {
        let email = build_message(message)?;
        let message_id = email
            .headers()
            .get_raw("Message-ID")
            .map(str::to_string);

        let transport = self.transport().await?;
        let response = transport.send(email).await.map_err(|e| {
            if e.is_permanent() {
                MailerError::Send(e.to_string())
            } else {
                MailerError::Connection(e.to_string())
            }
        })?;

        debug!(to = %message.to, code = %response.code(), "SMTP accepted message");
        let id = message_id.unwrap_or_else(|| {
            response
                .message()
                .collect::<Vec<_>>()
                .join(" ")
        });
        Ok(Delivery::new(id))
    }
}
