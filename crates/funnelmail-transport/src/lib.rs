//! # funnelmail-transport
//!
//! [`Mailer`] implementations for `FunnelMail`:
//! - [`SmtpMailer`] - SMTP relay with password or XOAUTH2 authentication
//! - [`ConsoleMailer`] - logs instead of sending
//!
//! [`oauth`] handles the refresh-token grant needed for XOAUTH2.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod console;
pub mod oauth;
mod smtp;

use std::sync::Arc;

use funnelmail_core::{Mailer, TransportConfig, TransportKind};

pub use console::ConsoleMailer;
pub use smtp::{SmtpMailer, build_message};

/// Builds the mailer selected by the configuration.
///
/// # Errors
///
/// Returns an error if OAuth2 is selected but its settings are incomplete.
pub fn build_mailer(config: &TransportConfig) -> oauth::Result<Arc<dyn Mailer>> {
    let mailer: Arc<dyn Mailer> = match config.kind {
        TransportKind::Smtp => Arc::new(SmtpMailer::with_password(config)),
        TransportKind::Oauth2 => {
            let tokens = Arc::new(oauth::TokenSource::new(config.oauth.clone())?);
            Arc::new(SmtpMailer::with_oauth(config, tokens))
        }
        TransportKind::Console => Arc::new(ConsoleMailer::new()),
    };
    Ok(mailer)
}
