//! Identity provider abstraction for OAuth login
//!
//! Defines the `ProviderClient` trait that decouples the login orchestrator from
//! a specific identity provider. Each variant owns its endpoint URLs, request
//! and response shapes, and auth header conventions; the orchestrator only sees
//! the normalized `TokenResponse` and `InspectResponse`.
//!
//! Variants:
//! - `StandardClient`: Write.as-shaped endpoints (also used for any provider
//!   that speaks the same shapes under another name)
//! - `SlackClient`: Slack's `oauth.access` / `users.identity` API

pub mod limited;
pub mod slack;
pub mod standard;

pub use limited::read_json_limited;
pub use slack::{SlackClient, SlackSettings};
pub use standard::{StandardClient, StandardSettings};

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Most bytes read from a token exchange response. One megabyte is plenty.
pub const TOKEN_RESPONSE_MAX_LEN: usize = 1_000_000;

/// Most bytes read from a token inspection response.
pub const INSPECT_RESPONSE_MAX_LEN: usize = 1_000_000;

/// User-Agent sent on every outbound provider request.
pub const USER_AGENT: &str = concat!("oauth-login/", env!("CARGO_PKG_VERSION"));

/// Boxed future returned by `ProviderClient` network operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Token data returned from an authorization code exchange.
///
/// Transient: consumed immediately by inspection and never persisted.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub error: String,
}

/// Remote profile data returned when an access token is inspected.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InspectResponse {
    #[serde(default)]
    pub client_id: String,
    /// Remote user id as reported by the provider
    #[serde(default)]
    pub user_id: String,
    /// RFC 3339 timestamp, passed through unparsed
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub error: String,
}

/// Errors from provider operations.
///
/// Messages carry provider detail for server-side logs only; the orchestrator
/// never relays them to the browser.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider configuration error: {0}")]
    Configuration(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("response larger than max read allowance of {limit} bytes")]
    ResponseTooLarge { limit: usize },

    #[error("request canceled: {0}")]
    Canceled(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),
}

impl ProviderError {
    /// Short label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Configuration(_) => "configuration",
            ProviderError::Network(_) => "network",
            ProviderError::Provider(_) => "provider",
            ProviderError::ResponseTooLarge { .. } => "response_too_large",
            ProviderError::Canceled(_) => "canceled",
            ProviderError::InvalidToken(_) => "invalid_token",
        }
    }

    /// Map a transport-level reqwest failure. Deadline expiry is reported as
    /// cancellation; everything else is a network failure.
    pub(crate) fn from_transport(context: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Canceled(format!("{context}: deadline elapsed: {err}"))
        } else {
            ProviderError::Network(format!("{context}: {err}"))
        }
    }
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Capability set every identity provider variant exposes.
///
/// Network operations never retry; a provider outage surfaces immediately.
/// Dropping the returned future cancels the in-flight request.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn ProviderClient>`).
pub trait ProviderClient: Send + Sync {
    /// Provider name used in routes and identity links (e.g. "writeas", "slack")
    fn provider(&self) -> &str;

    /// OAuth client id registered with the provider
    fn client_id(&self) -> &str;

    /// Redirect URL the provider sends the browser back to
    fn callback_location(&self) -> &str;

    /// Build the provider login URL embedding the CSRF `state`.
    fn build_login_url(&self, state: &str) -> Result<String>;

    /// Exchange an authorization code for an access token.
    fn exchange_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<TokenResponse>>;

    /// Inspect an access token to obtain the remote profile.
    fn inspect_token<'a>(&'a self, access_token: &'a str)
    -> BoxFuture<'a, Result<InspectResponse>>;
}

/// Reject empty required settings with a `Configuration` error naming the field.
pub(crate) fn require(provider: &str, fields: &[(&str, &str)]) -> Result<()> {
    for (name, value) in fields {
        if value.trim().is_empty() {
            return Err(ProviderError::Configuration(format!(
                "{provider}: {name} must not be empty"
            )));
        }
    }
    Ok(())
}
