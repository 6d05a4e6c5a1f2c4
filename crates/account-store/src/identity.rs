//! Local users and their links to remote identities
//!
//! `AccountStore` keeps users and links in memory behind a tokio Mutex. When
//! opened with a path, every write is persisted to a JSON file with an atomic
//! temp-file + rename before the in-memory state is replaced, so a failed
//! write leaves both copies unchanged.
//!
//! Links never hold the remote access token itself, only its SHA-256 digest.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::BoxFuture;
use crate::error::{Error, Result};
use crate::username::normalize_username;

/// A local account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    /// Unix timestamp in seconds
    pub created_at: u64,
}

/// Input for `create_user`. The username is normalized by the store.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    /// Empty means "same as username"
    pub display_name: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
}

/// Link from a remote identity to a local user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLink {
    pub local_user_id: i64,
    pub remote_user_id: String,
    pub provider: String,
    pub client_id: String,
    pub access_token_digest: String,
}

impl RemoteLink {
    /// Build a link, digesting the access token so the token itself is dropped.
    pub fn new(
        local_user_id: i64,
        remote_user_id: &str,
        provider: &str,
        client_id: &str,
        access_token: &str,
    ) -> Self {
        Self {
            local_user_id,
            remote_user_id: remote_user_id.to_owned(),
            provider: provider.to_owned(),
            client_id: client_id.to_owned(),
            access_token_digest: token_digest(access_token),
        }
    }

    fn same_remote(&self, remote_user_id: &str, provider: &str, client_id: &str) -> bool {
        self.remote_user_id == remote_user_id
            && self.provider == provider
            && self.client_id == client_id
    }
}

/// Hex SHA-256 of an access token.
pub fn token_digest(access_token: &str) -> String {
    hex::encode(Sha256::digest(access_token.as_bytes()))
}

/// Result of `create_linked_user`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkedUser {
    /// A new user was created and linked.
    Created(User),
    /// The remote identity was already linked; nothing was written.
    Existing(User),
}

/// Port for user and identity-link storage.
pub trait IdentityStore: Send + Sync {
    /// Local user id linked to (remote_user_id, provider, client_id), if any.
    fn lookup_local_user_by_remote<'a>(
        &'a self,
        remote_user_id: &'a str,
        provider: &'a str,
        client_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<i64>>>;

    /// Record a link. Re-linking the same remote identity to the same user
    /// refreshes the digest; linking it to a different user is `AlreadyLinked`.
    fn link_remote_user(&self, link: RemoteLink) -> BoxFuture<'_, Result<()>>;

    /// Create a user, normalizing and validating the username.
    fn create_user(&self, user: NewUser) -> BoxFuture<'_, Result<User>>;

    /// Create a user and link the remote identity in one write. If the
    /// identity is already linked, returns that user and creates nothing.
    /// `link.local_user_id` is replaced by the new user's id.
    fn create_linked_user(
        &self,
        user: NewUser,
        link: RemoteLink,
    ) -> BoxFuture<'_, Result<LinkedUser>>;

    fn get_user_by_id(&self, id: i64) -> BoxFuture<'_, Result<User>>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AccountData {
    #[serde(default)]
    next_id: i64,
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    links: Vec<RemoteLink>,
}

impl AccountData {
    /// Build the next user for an already-normalized username, or fail if taken.
    fn next_user(&self, user: NewUser, username: String) -> Result<User> {
        if self.users.iter().any(|u| u.username == username) {
            return Err(Error::UsernameTaken(username));
        }

        let display_name = match user.display_name.trim() {
            "" => username.clone(),
            name => name.to_owned(),
        };
        Ok(User {
            id: self.next_id + 1,
            username,
            display_name,
            email: user
                .email
                .map(|e| e.trim().to_owned())
                .filter(|e| !e.is_empty()),
            password_hash: user.password_hash,
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        })
    }
}

/// Users and remote links, optionally persisted to a JSON file.
pub struct AccountStore {
    path: Option<PathBuf>,
    state: Mutex<AccountData>,
}

impl AccountStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(AccountData::default()),
        }
    }

    /// Load accounts from the given file path.
    ///
    /// If the file doesn't exist, creates it as an empty store.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading account file: {e}")))?;
            let data: AccountData = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing account file: {e}")))?;
            info!(
                path = %path.display(),
                users = data.users.len(),
                links = data.links.len(),
                "loaded accounts"
            );
            data
        } else {
            info!(path = %path.display(), "account file not found, starting with empty store");
            let data = AccountData::default();
            write_atomic(&path, &data).await?;
            data
        };

        Ok(Self {
            path: Some(path),
            state: Mutex::new(data),
        })
    }

    /// Number of local users.
    pub async fn user_count(&self) -> usize {
        self.state.lock().await.users.len()
    }

    /// All links pointing at a local user.
    pub async fn links_for_user(&self, local_user_id: i64) -> Vec<RemoteLink> {
        let state = self.state.lock().await;
        state
            .links
            .iter()
            .filter(|l| l.local_user_id == local_user_id)
            .cloned()
            .collect()
    }

    async fn persist(&self, data: &AccountData) -> Result<()> {
        match &self.path {
            Some(path) => write_atomic(path, data).await,
            None => Ok(()),
        }
    }
}

impl IdentityStore for AccountStore {
    fn lookup_local_user_by_remote<'a>(
        &'a self,
        remote_user_id: &'a str,
        provider: &'a str,
        client_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<i64>>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state
                .links
                .iter()
                .find(|l| l.same_remote(remote_user_id, provider, client_id))
                .map(|l| l.local_user_id))
        })
    }

    fn link_remote_user(&self, link: RemoteLink) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if !state.users.iter().any(|u| u.id == link.local_user_id) {
                return Err(Error::UserNotFound(link.local_user_id));
            }

            let mut next = state.clone();
            match next
                .links
                .iter_mut()
                .find(|l| l.same_remote(&link.remote_user_id, &link.provider, &link.client_id))
            {
                Some(existing) if existing.local_user_id != link.local_user_id => {
                    return Err(Error::AlreadyLinked {
                        remote_user_id: link.remote_user_id,
                        provider: link.provider,
                    });
                }
                Some(existing) => existing.access_token_digest = link.access_token_digest.clone(),
                None => next.links.push(link.clone()),
            }

            self.persist(&next).await?;
            *state = next;
            debug!(
                local_user_id = link.local_user_id,
                provider = %link.provider,
                "remote identity linked"
            );
            Ok(())
        })
    }

    fn create_user(&self, user: NewUser) -> BoxFuture<'_, Result<User>> {
        Box::pin(async move {
            let username = normalize_username(&user.username)?;

            let mut state = self.state.lock().await;
            let created = state.next_user(user, username)?;

            let mut next = state.clone();
            next.next_id = created.id;
            next.users.push(created.clone());

            self.persist(&next).await?;
            *state = next;
            debug!(user_id = created.id, username = %created.username, "user created");
            Ok(created)
        })
    }

    fn create_linked_user(
        &self,
        user: NewUser,
        mut link: RemoteLink,
    ) -> BoxFuture<'_, Result<LinkedUser>> {
        Box::pin(async move {
            let username = normalize_username(&user.username)?;

            let mut state = self.state.lock().await;
            let linked = state
                .links
                .iter()
                .find(|l| l.same_remote(&link.remote_user_id, &link.provider, &link.client_id))
                .map(|l| l.local_user_id);
            if let Some(id) = linked {
                let existing = state
                    .users
                    .iter()
                    .find(|u| u.id == id)
                    .cloned()
                    .ok_or(Error::UserNotFound(id))?;
                return Ok(LinkedUser::Existing(existing));
            }

            let created = state.next_user(user, username)?;
            link.local_user_id = created.id;

            let mut next = state.clone();
            next.next_id = created.id;
            next.users.push(created.clone());
            next.links.push(link);

            self.persist(&next).await?;
            *state = next;
            debug!(user_id = created.id, username = %created.username, "user created and linked");
            Ok(LinkedUser::Created(created))
        })
    }

    fn get_user_by_id(&self, id: i64) -> BoxFuture<'_, Result<User>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            state
                .users
                .iter()
                .find(|u| u.id == id)
                .cloned()
                .ok_or(Error::UserNotFound(id))
        })
    }
}

/// Write account data to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since the
/// file holds password hashes and token digests.
async fn write_atomic(path: &Path, data: &AccountData) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Parse(format!("serializing accounts: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("account path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".accounts.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp account file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting account file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp account file: {e}")))?;

    debug!(path = %path.display(), "persisted accounts");
    Ok(())
}
