//! Runtime configuration.
//!
//! Settings are read from a JSON file and then overlaid with environment
//! variables, so secrets never have to live in the file.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SMTP_HOST` | `transport.host` |
//! | `SMTP_PORT` | `transport.port` |
//! | `SMTP_USER` | `transport.username` |
//! | `SMTP_PASS` | `transport.password` |
//! | `MAIL_FROM` | `from` |
//! | `GMAIL_USER` | `transport.username` (OAuth2) |
//! | `GMAIL_CLIENT_ID` | `transport.oauth.client_id` |
//! | `GMAIL_CLIENT_SECRET` | `transport.oauth.client_secret` |
//! | `GMAIL_REFRESH_TOKEN` | `transport.oauth.refresh_token` |

use std::path::{Path, PathBuf};

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Error, Result};

/// Application directory name under the platform config/data dirs.
const APP_DIR: &str = "funnelmail";

/// Google's OAuth2 token endpoint.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Security/encryption mode for the SMTP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// No encryption (not recommended).
    None,
    /// Implicit TLS (connect directly with TLS).
    #[default]
    Tls,
    /// STARTTLS upgrade after plaintext connect.
    StartTls,
}

impl Security {
    /// Get default port for the security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None => 25,
            Self::StartTls => 587,
            Self::Tls => 465,
        }
    }
}

/// Which mail transport to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// SMTP with username and password.
    #[default]
    Smtp,
    /// SMTP with XOAUTH2, using a refresh token.
    Oauth2,
    /// Log messages instead of sending them.
    Console,
}

/// OAuth2 client settings for XOAUTH2 sending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// OAuth2 client ID.
    pub client_id: String,
    /// OAuth2 client secret.
    pub client_secret: String,
    /// Long-lived refresh token.
    pub refresh_token: String,
    /// Token endpoint.
    pub token_url: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }
}

/// Mail transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Transport selection.
    pub kind: TransportKind,
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port; `0` means the security mode's default.
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Username (also the XOAUTH2 user).
    pub username: String,
    /// Password for plain SMTP auth.
    pub password: String,
    /// OAuth2 settings.
    pub oauth: OAuthConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Smtp,
            host: "smtp.gmail.com".to_string(),
            port: 0,
            security: Security::Tls,
            username: String::new(),
            password: String::new(),
            oauth: OAuthConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Returns the configured port, or the security mode's default.
    #[must_use]
    pub const fn effective_port(&self) -> u16 {
        if self.port == 0 {
            self.security.default_port()
        } else {
            self.port
        }
    }
}

/// Retry policy for a single delivery within one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per message, at least 1.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_secs: 2,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database holding subscribers and sent records.
    pub database_path: PathBuf,
    /// Funnel template directory.
    pub templates_dir: PathBuf,
    /// Local sent-marker directory.
    pub sent_dir: PathBuf,
    /// Run ledger file.
    pub ledger_path: PathBuf,
    /// Sender address (`Name <addr>` accepted).
    pub from: String,
    /// Hour of day (UTC) for scheduled sends; `None` keeps the run's time.
    pub send_hour: Option<u32>,
    /// Skip runs that start on Saturday or Sunday.
    pub weekdays_only: bool,
    /// Run day for the weekly cadence.
    pub weekly_weekday: Weekday,
    /// Delivery retry policy.
    pub retry: RetryConfig,
    /// Mail transport.
    pub transport: TransportConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            database_path: data_dir.join("funnelmail.db"),
            templates_dir: data_dir.join("FUNNEL"),
            sent_dir: data_dir.join("SENT"),
            ledger_path: data_dir.join("ledger.json"),
            from: String::new(),
            send_hour: Some(9),
            weekdays_only: true,
            weekly_weekday: Weekday::Mon,
            retry: RetryConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

/// Platform data directory for FunnelMail.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Platform location of the config file.
#[must_use]
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.json")
}

impl Config {
    /// Loads configuration from `path` (or the default location) and applies
    /// environment overrides. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map_or_else(default_config_path, Path::to_path_buf);

        let mut config = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                info!(path = %path.display(), "Loaded configuration");
                serde_json::from_str(&contents)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlays values from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(host) = get("SMTP_HOST") {
            self.transport.host = host;
        }
        if let Some(port) = get("SMTP_PORT").and_then(|p| p.parse().ok()) {
            self.transport.port = port;
        }
        if let Some(user) = get("SMTP_USER") {
            self.transport.username = user;
        }
        if let Some(pass) = get("SMTP_PASS") {
            self.transport.password = pass;
        }
        if let Some(from) = get("MAIL_FROM") {
            self.from = from;
        }
        if let Some(user) = get("GMAIL_USER") {
            self.transport.username = user;
        }
        if let Some(id) = get("GMAIL_CLIENT_ID") {
            self.transport.oauth.client_id = id;
        }
        if let Some(secret) = get("GMAIL_CLIENT_SECRET") {
            self.transport.oauth.client_secret = secret;
        }
        if let Some(token) = get("GMAIL_REFRESH_TOKEN") {
            self.transport.oauth.refresh_token = token;
        }
    }

    /// Scheduled send time of day, if configured.
    #[must_use]
    pub fn send_time(&self) -> Option<NaiveTime> {
        self.send_hour
            .and_then(|hour| NaiveTime::from_hms_opt(hour, 0, 0))
    }

    /// Sender address, falling back to the transport username.
    #[must_use]
    pub fn sender(&self) -> &str {
        if self.from.is_empty() {
            &self.transport.username
        } else {
            &self.from
        }
    }

    /// Checks that the selected transport has what it needs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.send_hour.is_some_and(|h| h > 23) {
            return Err(Error::Config("send_hour must be 0-23".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.transport.kind == TransportKind::Console {
            return Ok(());
        }

        let t = &self.transport;
        if t.host.trim().is_empty() {
            return Err(Error::Config("SMTP host is required".into()));
        }
        if t.username.trim().is_empty() {
            return Err(Error::Config("SMTP username is required".into()));
        }
        if self.sender().trim().is_empty() {
            return Err(Error::Config("sender address is required".into()));
        }
        match t.kind {
            TransportKind::Smtp if t.password.is_empty() => {
                Err(Error::Config("SMTP password is required".into()))
            }
            TransportKind::Oauth2
                if t.oauth.client_id.is_empty()
                    || t.oauth.client_secret.is_empty()
                    || t.oauth.refresh_token.is_empty() =>
            {
                Err(Error::Config(
                    "OAuth2 client id, client secret and refresh token are required".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "from": "Team <team@x.com>", "transport": { "kind": "console" } }"#,
        )
        .unwrap();

        assert_eq!(config.from, "Team <team@x.com>");
        assert_eq!(config.transport.kind, TransportKind::Console);
        assert_eq!(config.transport.host, "smtp.gmail.com");
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.send_hour, Some(9));
        assert!(config.weekdays_only);
    }

    #[test]
    fn test_security_serde_and_ports() {
        let t: TransportConfig =
            serde_json::from_str(r#"{ "security": "starttls", "port": 0 }"#).unwrap();
        assert_eq!(t.security, Security::StartTls);
        assert_eq!(t.effective_port(), 587);

        let t: TransportConfig = serde_json::from_str(r#"{ "port": 2525 }"#).unwrap();
        assert_eq!(t.effective_port(), 2525);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("SMTP_HOST", "mail.example.com"),
            ("SMTP_PORT", "2525"),
            ("SMTP_USER", "bot@example.com"),
            ("SMTP_PASS", "hunter2"),
            ("GMAIL_REFRESH_TOKEN", "refresh"),
            ("MAIL_FROM", ""),
        ]));

        assert_eq!(config.transport.host, "mail.example.com");
        assert_eq!(config.transport.port, 2525);
        assert_eq!(config.transport.username, "bot@example.com");
        assert_eq!(config.transport.password, "hunter2");
        assert_eq!(config.transport.oauth.refresh_token, "refresh");
        assert!(config.from.is_empty());
        assert_eq!(config.sender(), "bot@example.com");
    }

    #[test]
    fn test_send_time() {
        let mut config = Config::default();
        assert_eq!(config.send_time(), NaiveTime::from_hms_opt(9, 0, 0));
        config.send_hour = None;
        assert_eq!(config.send_time(), None);
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.transport.username = "bot@example.com".into();
        config.transport.password = "secret".into();
        assert!(config.validate().is_ok());

        config.transport.kind = TransportKind::Oauth2;
        assert!(config.validate().is_err());
        config.transport.oauth.client_id = "id".into();
        config.transport.oauth.client_secret = "secret".into();
        config.transport.oauth.refresh_token = "refresh".into();
        assert!(config.validate().is_ok());

        config.send_hour = Some(24);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_console_needs_no_credentials() {
        let mut config = Config::default();
        config.transport.kind = TransportKind::Console;
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("none.json")))
            .await
            .unwrap();
        assert_eq!(config.weekly_weekday, Weekday::Mon);
    }

    #[tokio::test]
    async fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "templates_dir": "/srv/funnel", "weekly_weekday": "Fri", "send_hour": null }"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).await.unwrap();
        assert_eq!(config.templates_dir, PathBuf::from("/srv/funnel"));
        assert_eq!(config.weekly_weekday, Weekday::Fri);
        assert_eq!(config.send_hour, None);
    }
}
