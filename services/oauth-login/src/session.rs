//! Browser sessions
//!
//! Sessions are kept in memory, keyed by a random id carried in an HttpOnly
//! cookie. Logging in always issues a fresh id so a session id planted before
//! login is never promoted to an authenticated one.

use std::collections::HashMap;
use std::time::Duration;

use account_store::{BoxFuture, User, generate_token};
use axum::http::header::{COOKIE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::LoginError;

pub const SESSION_COOKIE: &str = "oauth_login_session";

/// Default session lifetime.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// The authenticated user bound to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    replaces: Option<String>,
    pub user: Option<SessionUser>,
}

impl Session {
    fn fresh() -> Self {
        Self {
            id: generate_token(),
            replaces: None,
            user: None,
        }
    }

    /// Move the session to a new id; the old id is dropped on save.
    pub fn regenerate(&mut self) {
        let old = std::mem::replace(&mut self.id, generate_token());
        self.replaces.get_or_insert(old);
    }
}

/// Port for loading and saving sessions.
pub trait SessionStore: Send + Sync {
    /// Session named by the request's cookie, or a new empty one.
    fn get<'a>(&'a self, headers: &'a HeaderMap) -> BoxFuture<'a, Session>;

    /// Persist `session` and return the `Set-Cookie` value naming it.
    fn save<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<HeaderValue, LoginError>>;
}

struct StoredSession {
    user: Option<SessionUser>,
    expires_at: Instant,
}

pub struct MemorySessionStore {
    ttl: Duration,
    secure: bool,
    sessions: Mutex<HashMap<String, StoredSession>>,
}

impl MemorySessionStore {
    /// `secure` adds the `Secure` cookie attribute (set when served over https).
    pub fn new(ttl: Duration, secure: bool) -> Self {
        Self {
            ttl,
            secure,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    fn cookie(&self, id: &str) -> Result<HeaderValue, LoginError> {
        let mut cookie = format!(
            "{SESSION_COOKIE}={id}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            self.ttl.as_secs()
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
            .map_err(|e| LoginError::Session(format!("building cookie: {e}")))
    }
}

impl SessionStore for MemorySessionStore {
    fn get<'a>(&'a self, headers: &'a HeaderMap) -> BoxFuture<'a, Session> {
        Box::pin(async move {
            let Some(id) = cookie_value(headers, SESSION_COOKIE) else {
                return Session::fresh();
            };
            let mut sessions = self.sessions.lock().await;
            let now = Instant::now();
            sessions.retain(|_, s| s.expires_at > now);
            match sessions.get(id) {
                Some(stored) => Session {
                    id: id.to_owned(),
                    replaces: None,
                    user: stored.user.clone(),
                },
                None => Session::fresh(),
            }
        })
    }

    fn save<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<HeaderValue, LoginError>> {
        Box::pin(async move {
            let cookie = self.cookie(&session.id)?;
            let mut sessions = self.sessions.lock().await;
            if let Some(old) = &session.replaces {
                sessions.remove(old);
            }
            sessions.insert(
                session.id.clone(),
                StoredSession {
                    user: session.user.clone(),
                    expires_at: Instant::now() + self.ttl,
                },
            );
            debug!(active = sessions.len(), "session saved");
            Ok(cookie)
        })
    }
}

/// Value of cookie `name` in the request's `Cookie` headers.
fn cookie_value<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty())
}

/// Bind `user` to a freshly regenerated session and redirect home.
pub async fn login(
    store: &dyn SessionStore,
    headers: &HeaderMap,
    user: &User,
) -> Result<Response, LoginError> {
    let mut session = store.get(headers).await;
    session.regenerate();
    session.user = Some(SessionUser {
        id: user.id,
        username: user.username.clone(),
    });
    let cookie = store.save(&session).await?;
    info!(user_id = user.id, username = %user.username, "user logged in");

    Ok((
        StatusCode::TEMPORARY_REDIRECT,
        [(LOCATION, HeaderValue::from_static("/")), (SET_COOKIE, cookie)],
    )
        .into_response())
}

/// The user signed in on this request, if any.
pub async fn current_user(store: &dyn SessionStore, headers: &HeaderMap) -> Option<SessionUser> {
    store.get(headers).await.user
}
