//! Slack "Sign in with Slack" client
//!
//! Slack answers 200 for most failures and signals them with `ok: false` plus
//! an `error` string, so both calls check the body rather than the status.
//! Slack has no username concept; the username is a slug of the display name.

use common::Secret;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::{
    BoxFuture, INSPECT_RESPONSE_MAX_LEN, InspectResponse, ProviderClient, ProviderError, Result,
    TOKEN_RESPONSE_MAX_LEN, TokenResponse, read_json_limited, require,
};

pub const SLACK_AUTH_LOCATION: &str = "https://slack.com/oauth/authorize";
pub const SLACK_TOKEN_LOCATION: &str = "https://slack.com/api/oauth.access";
pub const SLACK_INSPECT_LOCATION: &str = "https://slack.com/api/users.identity";

/// Scopes needed for the identity lookup
pub const SLACK_SCOPES: &str = "identity.basic,identity.email,identity.team";

#[derive(Debug, Clone)]
pub struct SlackSettings {
    pub client_id: String,
    pub client_secret: Secret<String>,
    /// Restrict sign-in to one workspace
    pub team_id: Option<String>,
    pub auth_location: String,
    pub token_location: String,
    pub inspect_location: String,
    pub callback_location: String,
}

#[derive(Debug, Deserialize)]
struct SlackExchangeResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    scope: String,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Default, Deserialize)]
struct SlackUser {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
}

#[derive(Debug, Default, Deserialize)]
struct SlackTeam {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct SlackIdentityResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    user: SlackUser,
    #[serde(default)]
    team: SlackTeam,
    #[serde(default)]
    error: String,
}

pub struct SlackClient {
    settings: SlackSettings,
    http: reqwest::Client,
}

impl SlackClient {
    pub fn new(settings: SlackSettings, http: reqwest::Client) -> Result<Self> {
        let client = Self { settings, http };
        client.check_settings()?;
        Ok(client)
    }

    fn check_settings(&self) -> Result<()> {
        let s = &self.settings;
        require(
            "slack",
            &[
                ("client_id", &s.client_id),
                ("client_secret", s.client_secret.expose()),
                ("auth_location", &s.auth_location),
                ("token_location", &s.token_location),
                ("inspect_location", &s.inspect_location),
                ("callback_location", &s.callback_location),
            ],
        )
    }
}

impl ProviderClient for SlackClient {
    fn provider(&self) -> &str {
        "slack"
    }

    fn client_id(&self) -> &str {
        &self.settings.client_id
    }

    fn callback_location(&self) -> &str {
        &self.settings.callback_location
    }

    fn build_login_url(&self, state: &str) -> Result<String> {
        self.check_settings()?;
        let mut url = reqwest::Url::parse(&self.settings.auth_location).map_err(|e| {
            ProviderError::Configuration(format!("slack: invalid auth_location: {e}"))
        })?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.settings.client_id)
                .append_pair("scope", SLACK_SCOPES)
                .append_pair("redirect_uri", &self.settings.callback_location)
                .append_pair("state", state);
            if let Some(team) = self.settings.team_id.as_deref().filter(|t| !t.is_empty()) {
                query.append_pair("team", team);
            }
        }
        Ok(url.to_string())
    }

    #[instrument(skip_all, fields(provider = "slack"))]
    fn exchange_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<TokenResponse>> {
        Box::pin(async move {
            let response = self
                .http
                .post(&self.settings.token_location)
                .header(ACCEPT, "application/json")
                .header(USER_AGENT, crate::USER_AGENT)
                .form(&[
                    ("client_id", self.settings.client_id.as_str()),
                    ("client_secret", self.settings.client_secret.expose().as_str()),
                    ("code", code),
                    ("redirect_uri", self.settings.callback_location.as_str()),
                ])
                .send()
                .await
                .map_err(|e| ProviderError::from_transport("slack oauth.access request failed", e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(ProviderError::Provider(format!(
                    "slack oauth.access returned {status}"
                )));
            }

            let exchange: SlackExchangeResponse =
                read_json_limited(response, TOKEN_RESPONSE_MAX_LEN).await?;
            if !exchange.ok || !exchange.error.is_empty() {
                return Err(ProviderError::Provider(format!(
                    "slack oauth.access failed: {}",
                    exchange.error
                )));
            }
            if exchange.access_token.is_empty() {
                return Err(ProviderError::Provider(
                    "slack oauth.access returned no access_token".into(),
                ));
            }
            debug!(scope = %exchange.scope, "slack code exchanged");

            Ok(TokenResponse {
                access_token: exchange.access_token,
                token_type: "bearer".into(),
                ..TokenResponse::default()
            })
        })
    }

    #[instrument(skip_all, fields(provider = "slack"))]
    fn inspect_token<'a>(
        &'a self,
        access_token: &'a str,
    ) -> BoxFuture<'a, Result<InspectResponse>> {
        Box::pin(async move {
            let response = self
                .http
                .get(&self.settings.inspect_location)
                .bearer_auth(access_token)
                .header(ACCEPT, "application/json")
                .header(USER_AGENT, crate::USER_AGENT)
                .send()
                .await
                .map_err(|e| {
                    ProviderError::from_transport("slack users.identity request failed", e)
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(ProviderError::Provider(format!(
                    "slack users.identity returned {status}"
                )));
            }

            let identity: SlackIdentityResponse =
                read_json_limited(response, INSPECT_RESPONSE_MAX_LEN).await?;
            if !identity.ok || !identity.error.is_empty() {
                return Err(ProviderError::InvalidToken(format!(
                    "slack users.identity failed: {}",
                    identity.error
                )));
            }
            debug!(team_id = %identity.team.id, "slack identity inspected");

            Ok(InspectResponse {
                user_id: identity.user.id,
                username: slugify(&identity.user.name),
                display_name: identity.user.name,
                email: identity.user.email,
                ..InspectResponse::default()
            })
        })
    }
}

/// Lowercase ASCII slug: alphanumerics kept, every other run becomes one `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
