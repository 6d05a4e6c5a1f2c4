//! Standard provider client (Write.as-shaped endpoints)
//!
//! Login URL carries `client_id`, `redirect_uri`, `response_type=code` and the
//! CSRF `state`. The code exchange POSTs a form with HTTP Basic client
//! credentials; inspection GETs the profile with a Bearer token. Both response
//! bodies are plain JSON in the `TokenResponse` / `InspectResponse` shapes.

use common::Secret;
use reqwest::header::{ACCEPT, USER_AGENT};
use tracing::{debug, instrument};

use crate::{
    BoxFuture, INSPECT_RESPONSE_MAX_LEN, InspectResponse, ProviderClient, ProviderError, Result,
    TOKEN_RESPONSE_MAX_LEN, TokenResponse, read_json_limited, require,
};

/// Write.as hosted login page
pub const WRITEAS_AUTH_LOCATION: &str = "https://write.as/oauth/login";

/// Write.as code exchange endpoint
pub const WRITEAS_TOKEN_LOCATION: &str = "https://write.as/oauth/token";

/// Write.as token inspection endpoint
pub const WRITEAS_INSPECT_LOCATION: &str = "https://write.as/oauth/inspect";

/// Settings for a standard-shaped provider.
#[derive(Debug, Clone)]
pub struct StandardSettings {
    /// Provider name used in `/oauth/{name}` and identity links
    pub name: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub auth_location: String,
    pub token_location: String,
    pub inspect_location: String,
    pub callback_location: String,
    /// Requested scopes, space-joined into `scope`. Omitted when empty.
    pub scopes: Vec<String>,
}

/// Provider client for Write.as and providers speaking the same shapes.
pub struct StandardClient {
    settings: StandardSettings,
    http: reqwest::Client,
}

impl StandardClient {
    /// Create a client, rejecting empty required settings.
    pub fn new(settings: StandardSettings, http: reqwest::Client) -> Result<Self> {
        let client = Self { settings, http };
        client.check_settings()?;
        Ok(client)
    }

    fn check_settings(&self) -> Result<()> {
        let s = &self.settings;
        require(
            &s.name,
            &[
                ("name", &s.name),
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

impl ProviderClient for StandardClient {
    fn provider(&self) -> &str {
        &self.settings.name
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
            ProviderError::Configuration(format!(
                "{}: invalid auth_location: {e}",
                self.settings.name
            ))
        })?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.settings.client_id)
                .append_pair("redirect_uri", &self.settings.callback_location)
                .append_pair("response_type", "code");
            if !self.settings.scopes.is_empty() {
                query.append_pair("scope", &self.settings.scopes.join(" "));
            }
            query.append_pair("state", state);
        }
        Ok(url.to_string())
    }

    #[instrument(skip_all, fields(provider = %self.settings.name))]
    fn exchange_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<TokenResponse>> {
        Box::pin(async move {
            let response = self
                .http
                .post(&self.settings.token_location)
                .basic_auth(
                    &self.settings.client_id,
                    Some(self.settings.client_secret.expose()),
                )
                .header(ACCEPT, "application/json")
                .header(USER_AGENT, crate::USER_AGENT)
                .form(&[
                    ("grant_type", "authorization_code"),
                    ("redirect_uri", self.settings.callback_location.as_str()),
                    ("code", code),
                ])
                .send()
                .await
                .map_err(|e| ProviderError::from_transport("token exchange request failed", e))?;

            let status = response.status();
            if !status.is_success() {
                let detail = read_json_limited::<TokenResponse>(response, TOKEN_RESPONSE_MAX_LEN)
                    .await
                    .map(|t| t.error)
                    .unwrap_or_default();
                return Err(ProviderError::Provider(format!(
                    "token endpoint returned {status}: {detail}"
                )));
            }

            let token: TokenResponse = read_json_limited(response, TOKEN_RESPONSE_MAX_LEN).await?;
            if !token.error.is_empty() {
                return Err(ProviderError::Provider(format!(
                    "token endpoint reported error: {}",
                    token.error
                )));
            }
            if token.access_token.is_empty() {
                return Err(ProviderError::Provider(
                    "token response missing access_token".into(),
                ));
            }
            debug!(token_type = %token.token_type, "authorization code exchanged");
            Ok(token)
        })
    }

    #[instrument(skip_all, fields(provider = %self.settings.name))]
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
                .map_err(|e| ProviderError::from_transport("token inspect request failed", e))?;

            let status = response.status();
            if !status.is_success() {
                let detail =
                    read_json_limited::<InspectResponse>(response, INSPECT_RESPONSE_MAX_LEN)
                        .await
                        .map(|i| i.error)
                        .unwrap_or_default();
                if !detail.is_empty() {
                    return Err(ProviderError::InvalidToken(format!("{status}: {detail}")));
                }
                return Err(ProviderError::Provider(format!(
                    "inspect endpoint returned {status}"
                )));
            }

            let info: InspectResponse =
                read_json_limited(response, INSPECT_RESPONSE_MAX_LEN).await?;
            if !info.error.is_empty() {
                return Err(ProviderError::InvalidToken(info.error));
            }
            debug!(remote_user_id = %info.user_id, "access token inspected");
            Ok(info)
        })
    }
}
