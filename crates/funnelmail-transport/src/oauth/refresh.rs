//! Refresh-token grant with caching.

use std::collections::HashMap;

use chrono::Utc;
use funnelmail_core::OAuthConfig;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::error::{Error, Result};
use super::token::{ErrorResponse, Token, TokenResponse};

/// Hands out valid access tokens, refreshing them when they expire.
pub struct TokenSource {
    http_client: reqwest::Client,
    config: OAuthConfig,
    cached: Mutex<Option<Token>>,
}

impl TokenSource {
    /// Creates a token source.
    ///
    /// # Errors
    ///
    /// Returns an error if the client id, secret or refresh token is missing.
    pub fn new(config: OAuthConfig) -> Result<Self> {
        if config.client_id.is_empty()
            || config.client_secret.is_empty()
            || config.refresh_token.is_empty()
        {
            return Err(Error::InvalidConfig(
                "client_id, client_secret and refresh_token are required".into(),
            ));
        }

        Ok(Self {
            http_client: reqwest::Client::new(),
            config,
            cached: Mutex::new(None),
        })
    }

    /// Returns a currently valid access token.
    ///
    /// # Errors
    ///
    /// Returns an error if a refresh was needed and failed.
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref()
            && !token.is_expired_at(Utc::now())
        {
            debug!("Using cached access token");
            return Ok(token.access_token.clone());
        }

        let token = self.refresh().await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    async fn refresh(&self) -> Result<Token> {
        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", self.config.refresh_token.as_str());
        params.insert("client_id", self.config.client_id.as_str());
        params.insert("client_secret", self.config.client_secret.as_str());

        let response = self
            .http_client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let error: ErrorResponse = response.json().await?;
            return Err(error.into_error());
        }

        let token_response: TokenResponse = response.json().await?;
        let token = Token::from_response(token_response, Utc::now());
        info!(expires_at = ?token.expires_at, "Refreshed OAuth2 access token");
        Ok(token)
    }
}
