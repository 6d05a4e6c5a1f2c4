//! Error types for account and state storage

/// Errors from account storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown, already-consumed or expired state token. Deliberately carries
    /// no detail so callers cannot tell the cases apart.
    #[error("oauth state not found")]
    StateNotFound,

    #[error("invalid username: {0}")]
    InvalidUsername(String),

    #[error("username {0} is already taken")]
    UsernameTaken(String),

    #[error("remote user {remote_user_id} on {provider} is already linked to another account")]
    AlreadyLinked {
        remote_user_id: String,
        provider: String,
    },

    #[error("user {0} not found")]
    UserNotFound(i64),

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("account data parse error: {0}")]
    Parse(String),
}

/// Result alias for account store operations.
pub type Result<T> = std::result::Result<T, Error>;
