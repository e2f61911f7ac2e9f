//! `OAuth2` access tokens for XOAUTH2 sending.
//!
//! Only the refresh-token grant is supported: an operator obtains a refresh
//! token once (e.g. through the provider's playground) and the sender trades
//! it for short-lived access tokens as needed.

mod error;
mod refresh;
mod token;

pub use error::{Error, Result};
pub use refresh::TokenSource;
pub use token::{ErrorResponse, Token, TokenResponse};
