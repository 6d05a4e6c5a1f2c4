//! OAuth login orchestration
//!
//! Three HTTP-triggered transitions drive a login:
//!
//! 1. `GET /oauth/{provider}`: mint a state token, optionally register it with
//!    a broker, redirect to the provider's login page.
//! 2. `GET /oauth/callback`: consume the state, exchange the code, inspect the
//!    token, then either log in the linked user or render the signup page
//!    carrying a signed hand-off.
//! 3. `POST /oauth/signup`: verify the hand-off, create the user and link,
//!    log in.
//!
//! All providers share one callback route. The consumed state names the
//! provider, so the callback never has to trust anything else in the query.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use account_store::{
    IdentityStore, LinkedUser, NewUser, RemoteLink, StateStore, hash_password,
};
use axum::extract::{FromRef, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use provider::{
    ProviderClient, ProviderError, SlackClient, SlackSettings, StandardClient, StandardSettings,
};
use serde::Deserialize;
use tracing::{Instrument, Span, info, info_span, warn};

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::LoginError;
use crate::handoff::{HandoffSigner, SignupForm, SignupHandoff};
use crate::register::StateRegisterer;
use crate::session::{self, SessionStore};
use crate::views;

/// Longest accepted display name, in characters.
pub const MAX_ALIAS_LEN: usize = 100;

/// Shortest accepted local password, in characters.
pub const MIN_PASSWORD_LEN: usize = 6;

/// A configured provider and its optional state registerer.
pub struct ProviderEntry {
    pub client: Arc<dyn ProviderClient>,
    pub registerer: Option<StateRegisterer>,
}

/// Build the client for one configured provider.
pub fn build_provider(
    cfg: &ProviderConfig,
    http: &reqwest::Client,
) -> Result<ProviderEntry, ProviderError> {
    let client_secret = cfg.client_secret.clone().ok_or_else(|| {
        ProviderError::Configuration(format!("{}: client_secret is required", cfg.name))
    })?;

    let client: Arc<dyn ProviderClient> = match cfg.kind {
        ProviderKind::Writeas | ProviderKind::Generic => Arc::new(StandardClient::new(
            StandardSettings {
                name: cfg.name.clone(),
                client_id: cfg.client_id.clone(),
                client_secret,
                auth_location: cfg.auth_location.clone(),
                token_location: cfg.token_location.clone(),
                inspect_location: cfg.inspect_location.clone(),
                callback_location: cfg.callback_location.clone(),
                scopes: cfg.scopes.clone(),
            },
            http.clone(),
        )?),
        ProviderKind::Slack => Arc::new(SlackClient::new(
            SlackSettings {
                client_id: cfg.client_id.clone(),
                client_secret,
                team_id: cfg.team_id.clone(),
                auth_location: cfg.auth_location.clone(),
                token_location: cfg.token_location.clone(),
                inspect_location: cfg.inspect_location.clone(),
                callback_location: cfg.callback_location.clone(),
            },
            http.clone(),
        )?),
    };

    let registerer = cfg.state_register_location.as_ref().map(|location| {
        StateRegisterer::new(
            location.clone(),
            cfg.callback_location.clone(),
            http.clone(),
        )
    });

    Ok(ProviderEntry { client, registerer })
}

/// Query parameters a provider sends back to the callback.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CallbackParams {
    pub code: String,
    pub state: String,
    /// Set by the provider when the user denied consent
    pub error: String,
}

/// The login orchestrator. Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct OAuthHandler {
    providers: Arc<HashMap<String, ProviderEntry>>,
    states: Arc<dyn StateStore>,
    accounts: Arc<dyn IdentityStore>,
    sessions: Arc<dyn SessionStore>,
    signer: HandoffSigner,
}

fn provider_failure(provider: &str) -> impl FnOnce(ProviderError) -> LoginError + '_ {
    move |err| {
        crate::metrics::record_provider_error(provider, err.kind());
        LoginError::Provider(err)
    }
}

impl OAuthHandler {
    pub fn new(
        providers: Vec<ProviderEntry>,
        states: Arc<dyn StateStore>,
        accounts: Arc<dyn IdentityStore>,
        sessions: Arc<dyn SessionStore>,
        signer: HandoffSigner,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|entry| (entry.client.provider().to_owned(), entry))
            .collect();
        Self {
            providers: Arc::new(providers),
            states,
            accounts,
            sessions,
            signer,
        }
    }

    /// Configured provider names, sorted.
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn sessions(&self) -> &dyn SessionStore {
        self.sessions.as_ref()
    }

    /// Start a login: mint state, register it if configured, redirect.
    pub async fn begin_login(&self, provider: &str) -> Result<Response, LoginError> {
        let entry = self
            .providers
            .get(provider)
            .ok_or_else(|| LoginError::UnknownProvider(provider.to_owned()))?;
        let client = &entry.client;

        let state = self
            .states
            .generate(client.provider(), client.client_id())
            .await?;
        if let Some(registerer) = &entry.registerer {
            registerer.register(&state).await?;
        }
        let url = client.build_login_url(&state)?;

        info!(provider, "redirecting to provider login");
        Ok(Redirect::temporary(&url).into_response())
    }

    fn entry_for(&self, provider: &str, client_id: &str) -> Result<&ProviderEntry, LoginError> {
        match self.providers.get(provider) {
            Some(entry) if entry.client.client_id() == client_id => Ok(entry),
            Some(_) => Err(LoginError::ProviderMismatch(format!(
                "{provider}: client_id does not match configuration"
            ))),
            None => Err(LoginError::ProviderMismatch(provider.to_owned())),
        }
    }

    /// Finish the provider round trip.
    pub async fn complete_callback(
        &self,
        headers: &HeaderMap,
        params: CallbackParams,
    ) -> Result<Response, LoginError> {
        let validated = self.states.validate(&params.state).await?;
        let entry = self.entry_for(&validated.provider, &validated.client_id)?;
        let client = entry.client.as_ref();
        let provider = client.provider();
        Span::current().record("provider", provider);

        if !params.error.is_empty() {
            return Err(LoginError::InvalidRequest(format!(
                "{provider} reported {}",
                params.error
            )));
        }
        if params.code.is_empty() {
            return Err(LoginError::InvalidRequest("missing code".into()));
        }

        let token = client
            .exchange_code(&params.code)
            .await
            .map_err(provider_failure(provider))?;
        let remote = client
            .inspect_token(&token.access_token)
            .await
            .map_err(provider_failure(provider))?;

        if !remote.client_id.is_empty() && remote.client_id != client.client_id() {
            return Err(provider_failure(provider)(ProviderError::InvalidToken(
                format!("token issued to client {}", remote.client_id),
            )));
        }
        if remote.user_id.is_empty() {
            return Err(provider_failure(provider)(ProviderError::InvalidToken(
                "inspection returned no user id".into(),
            )));
        }

        if let Some(local_id) = self
            .accounts
            .lookup_local_user_by_remote(&remote.user_id, provider, client.client_id())
            .await?
        {
            let user = self.accounts.get_user_by_id(local_id).await?;
            crate::metrics::record_login(provider, "existing");
            return session::login(self.sessions(), headers, &user).await;
        }

        let handoff = SignupHandoff {
            access_token: token.access_token,
            username: remote.username,
            display_name: remote.display_name,
            email: remote.email,
            remote_user_id: remote.user_id,
            provider: provider.to_owned(),
            client_id: client.client_id().to_owned(),
        };
        let integrity_hash = self.signer.sign(&handoff);
        let form = SignupForm {
            username: handoff.username.clone(),
            alias: handoff.display_name.clone(),
            email: handoff.email.clone(),
            access_token: handoff.access_token,
            remote_username: handoff.username,
            remote_display_name: handoff.display_name,
            remote_email: handoff.email,
            remote_user_id: handoff.remote_user_id,
            provider: handoff.provider,
            client_id: handoff.client_id,
            integrity_hash,
            password: String::new(),
        };

        crate::metrics::record_login(provider, "signup_started");
        info!(provider, remote_user_id = %form.remote_user_id, "new remote user, showing signup");
        Ok(views::signup_page(&form, None).into_response())
    }

    /// Create the local account for a verified hand-off.
    pub async fn complete_signup(
        &self,
        headers: &HeaderMap,
        mut form: SignupForm,
    ) -> Result<Response, LoginError> {
        let handoff = form.handoff();
        if !self.signer.verify(&handoff, &form.integrity_hash) {
            crate::metrics::record_login(crate::metrics::UNVERIFIED_PROVIDER, "tampered");
            return Err(LoginError::TamperedRequest);
        }
        self.entry_for(&handoff.provider, &handoff.client_id)?;
        let provider = handoff.provider.as_str();
        Span::current().record("provider", provider);

        if let Some(local_id) = self
            .accounts
            .lookup_local_user_by_remote(&handoff.remote_user_id, provider, &handoff.client_id)
            .await?
        {
            info!(provider, local_id, "remote identity already linked, logging in");
            let user = self.accounts.get_user_by_id(local_id).await?;
            crate::metrics::record_login(provider, "existing");
            return session::login(self.sessions(), headers, &user).await;
        }

        if let Some(message) = check_choices(&form) {
            form.password.clear();
            return Ok(views::signup_page(&form, Some(message)).into_response());
        }

        let password_hash = match std::mem::take(&mut form.password) {
            password if password.is_empty() => None,
            password => Some(
                tokio::task::spawn_blocking(move || hash_password(&password))
                    .await
                    .map_err(|e| LoginError::Internal(format!("password hashing task: {e}")))??,
            ),
        };

        let link = RemoteLink::new(
            0,
            &handoff.remote_user_id,
            provider,
            &handoff.client_id,
            &handoff.access_token,
        );
        let new_user = NewUser {
            username: form.username.clone(),
            display_name: form.alias.clone(),
            email: Some(form.email.clone()),
            password_hash,
        };
        let user = match self.accounts.create_linked_user(new_user, link).await {
            Ok(LinkedUser::Created(user)) => user,
            Ok(LinkedUser::Existing(user)) => {
                info!(
                    provider,
                    local_id = user.id,
                    "remote identity linked concurrently, logging in"
                );
                crate::metrics::record_login(provider, "existing");
                return session::login(self.sessions(), headers, &user).await;
            }
            Err(err) => match username_message(&err) {
                Some(message) => {
                    return Ok(views::signup_page(&form, Some(message.as_str())).into_response());
                }
                None => return Err(err.into()),
            },
        };

        crate::metrics::record_login(provider, "created");
        info!(provider, user_id = user.id, username = %user.username, "account created");
        session::login(self.sessions(), headers, &user).await
    }
}

/// Validation message for the user's own choices, if any is unacceptable.
fn check_choices(form: &SignupForm) -> Option<&'static str> {
    if form.alias.chars().count() > MAX_ALIAS_LEN {
        return Some("Display name must be at most 100 characters.");
    }
    let password_len = form.password.chars().count();
    if password_len > 0 && password_len < MIN_PASSWORD_LEN {
        return Some("Password must be at least 6 characters.");
    }
    None
}

/// Message to show on the signup page for a rejected username choice.
fn username_message(err: &account_store::Error) -> Option<String> {
    match err {
        account_store::Error::InvalidUsername(detail) => {
            let mut message = format!("{detail}.");
            if let Some(first) = message.get_mut(0..1) {
                first.make_ascii_uppercase();
            }
            Some(message)
        }
        account_store::Error::UsernameTaken(name) => {
            Some(format!("Username {name} is already taken."))
        }
        _ => None,
    }
}

/// Routes for the three login transitions.
pub fn routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    OAuthHandler: FromRef<S>,
{
    Router::new()
        .route("/oauth/callback", get(callback_handler))
        .route("/oauth/signup", post(signup_handler))
        .route("/oauth/{provider}", get(login_handler))
}

fn request_span(name: &'static str) -> Span {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    info_span!("oauth", route = name, %request_id, provider = tracing::field::Empty)
}

async fn observe<F>(route: &'static str, span: Span, work: F) -> Response
where
    F: Future<Output = Result<Response, LoginError>>,
{
    let started = Instant::now();
    let response = async move { work.await.unwrap_or_else(IntoResponse::into_response) }
        .instrument(span)
        .await;
    crate::metrics::record_request(
        route,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn login_handler(State(oauth): State<OAuthHandler>, Path(provider): Path<String>) -> Response {
    let span = request_span("init");
    span.record("provider", provider.as_str());
    observe("init", span, oauth.begin_login(&provider)).await
}

async fn callback_handler(
    State(oauth): State<OAuthHandler>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    if !params.error.is_empty() {
        warn!(error = %params.error, "provider returned an error to the callback");
    }
    observe(
        "callback",
        request_span("callback"),
        oauth.complete_callback(&headers, params),
    )
    .await
}

async fn signup_handler(
    State(oauth): State<OAuthHandler>,
    headers: HeaderMap,
    Form(form): Form<SignupForm>,
) -> Response {
    observe(
        "signup",
        request_span("signup"),
        oauth.complete_signup(&headers, form),
    )
    .await
}
