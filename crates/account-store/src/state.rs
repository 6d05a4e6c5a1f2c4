//! Single-use CSRF state tokens
//!
//! A token is minted when login starts and consumed when the provider redirects
//! back. `validate` removes the entry under the same lock acquisition that
//! reads it, so two concurrent callbacks presenting one token cannot both win.
//! Entries older than the TTL are dropped lazily on every call.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::BoxFuture;
use crate::error::{Error, Result};

/// Default lifetime of an unconsumed state token.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(600); // 10 minutes

/// Generate an unguessable state token.
///
/// 32 random bytes encoded as URL-safe base64 without padding (43 chars), so
/// the token can be embedded in a query string as-is.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// The (provider, client id) scope a consumed token was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedState {
    pub provider: String,
    pub client_id: String,
}

/// Port for issuing and consuming state tokens.
pub trait StateStore: Send + Sync {
    /// Mint and remember a token for (provider, client_id).
    fn generate<'a>(&'a self, provider: &'a str, client_id: &'a str)
    -> BoxFuture<'a, Result<String>>;

    /// Consume a token. Fails with `StateNotFound` for unknown, reused or
    /// expired tokens.
    fn validate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<ValidatedState>>;
}

struct PendingState {
    provider: String,
    client_id: String,
    created_at: Instant,
}

/// In-memory state store with a bounded TTL.
pub struct MemoryStateStore {
    ttl: Duration,
    states: Mutex<HashMap<String, PendingState>>,
}

impl MemoryStateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Number of outstanding (possibly expired) tokens.
    pub async fn len(&self) -> usize {
        self.states.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_TTL)
    }
}

impl StateStore for MemoryStateStore {
    fn generate<'a>(
        &'a self,
        provider: &'a str,
        client_id: &'a str,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let token = generate_token();
            let mut states = self.states.lock().await;
            states.retain(|_, s| s.created_at.elapsed() < self.ttl);
            states.insert(
                token.clone(),
                PendingState {
                    provider: provider.to_owned(),
                    client_id: client_id.to_owned(),
                    created_at: Instant::now(),
                },
            );
            debug!(provider, outstanding = states.len(), "oauth state generated");
            Ok(token)
        })
    }

    fn validate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<ValidatedState>> {
        Box::pin(async move {
            let mut states = self.states.lock().await;
            let pending = states.remove(token);
            states.retain(|_, s| s.created_at.elapsed() < self.ttl);
            drop(states);

            match pending {
                Some(s) if s.created_at.elapsed() < self.ttl => Ok(ValidatedState {
                    provider: s.provider,
                    client_id: s.client_id,
                }),
                Some(s) => {
                    debug!(provider = %s.provider, "oauth state expired");
                    Err(Error::StateNotFound)
                }
                None => Err(Error::StateNotFound),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn tokens_are_url_safe_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 43);
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "token must be URL-safe base64 (no padding): {a}"
        );
        assert_ne!(a, b, "two tokens must not collide");
    }

    #[tokio::test]
    async fn validate_is_single_use() {
        let store = MemoryStateStore::default();
        let token = store.generate("acme", "client-1").await.unwrap();

        let first = store.validate(&token).await.unwrap();
        assert_eq!(
            first,
            ValidatedState {
                provider: "acme".into(),
                client_id: "client-1".into(),
            }
        );

        let second = store.validate(&token).await;
        assert!(matches!(second, Err(Error::StateNotFound)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_and_empty_tokens_fail() {
        let store = MemoryStateStore::default();
        store.generate("acme", "client-1").await.unwrap();

        assert!(matches!(
            store.validate("forged-token").await,
            Err(Error::StateNotFound)
        ));
        assert!(matches!(store.validate("").await, Err(Error::StateNotFound)));
        assert_eq!(store.len().await, 1, "failed lookups must not consume others");
    }

    #[tokio::test(start_paused = true)]
    async fn expired_tokens_fail_and_are_purged() {
        let store = MemoryStateStore::new(Duration::from_secs(60));
        let stale = store.generate("acme", "client-1").await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(matches!(
            store.validate(&stale).await,
            Err(Error::StateNotFound)
        ));

        let other = store.generate("acme", "client-1").await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        let fresh = store.generate("acme", "client-1").await.unwrap();
        assert_eq!(store.len().await, 1, "expired entries are dropped on generate");
        assert!(store.validate(&other).await.is_err());
        assert!(store.validate(&fresh).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_validation_has_exactly_one_winner() {
        let store = Arc::new(MemoryStateStore::default());
        let token = store.generate("acme", "client-1").await.unwrap();

        let mut handles = vec![];
        for _ in 0..16 {
            let store = store.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move { store.validate(&token).await }));
        }

        let mut winners = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => winners += 1,
                Err(Error::StateNotFound) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(winners, 1, "exactly one concurrent callback may consume the state");
    }
}
