//! Local account storage for OAuth login
//!
//! Provides the two datastore ports the login orchestrator depends on, plus
//! in-process implementations:
//!
//! 1. `StateStore`: single-use CSRF state tokens scoped to (provider, client id)
//! 2. `IdentityStore`: local users and their links to remote identities
//!
//! Username rules and password hashing live here too, since creating a user
//! is the account component's job, not the orchestrator's.

pub mod error;
pub mod identity;
pub mod password;
pub mod state;
pub mod username;

pub use error::{Error, Result};
pub use identity::{AccountStore, IdentityStore, LinkedUser, NewUser, RemoteLink, User, token_digest};
pub use password::hash_password;
pub use state::{DEFAULT_STATE_TTL, MemoryStateStore, StateStore, ValidatedState, generate_token};
pub use username::{MAX_USERNAME_LEN, normalize_username};

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by the store traits (keeps them dyn-compatible).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
