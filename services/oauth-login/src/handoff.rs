//! Tamper-evident signup hand-off
//!
//! Between the callback and signup-complete the remote profile lives only in
//! the browser, as hidden form fields. An HMAC-SHA256 over those fields, keyed
//! by the server's hash seed, lets signup-complete prove the fields are the
//! ones the callback issued.
//!
//! Each field is fed to the MAC as a big-endian u64 length followed by its
//! bytes, so moving characters across a field boundary changes the digest.

use std::fmt;

use common::Secret;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Provider-asserted fields carried through the signup page.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SignupHandoff {
    pub access_token: String,
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub remote_user_id: String,
    pub provider: String,
    pub client_id: String,
}

impl fmt::Debug for SignupHandoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignupHandoff")
            .field("access_token", &"[REDACTED]")
            .field("username", &self.username)
            .field("display_name", &self.display_name)
            .field("email", &self.email)
            .field("remote_user_id", &self.remote_user_id)
            .field("provider", &self.provider)
            .field("client_id", &self.client_id)
            .finish()
    }
}

impl SignupHandoff {
    fn fields(&self) -> [&str; 7] {
        [
            &self.access_token,
            &self.username,
            &self.display_name,
            &self.email,
            &self.remote_user_id,
            &self.provider,
            &self.client_id,
        ]
    }
}

/// Signs and verifies hand-offs with the server hash seed.
#[derive(Clone)]
pub struct HandoffSigner {
    seed: Secret<String>,
}

impl HandoffSigner {
    pub fn new(seed: Secret<String>) -> Self {
        Self { seed }
    }

    fn mac(&self, handoff: &SignupHandoff) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(self.seed.expose().as_bytes())
            .expect("HMAC accepts keys of any length");
        for field in handoff.fields() {
            mac.update(&(field.len() as u64).to_be_bytes());
            mac.update(field.as_bytes());
        }
        mac
    }

    /// Hex-encoded integrity hash for `handoff`.
    pub fn sign(&self, handoff: &SignupHandoff) -> String {
        hex::encode(self.mac(handoff).finalize().into_bytes())
    }

    /// Constant-time check of `integrity_hash` against `handoff`.
    pub fn verify(&self, handoff: &SignupHandoff, integrity_hash: &str) -> bool {
        let Ok(expected) = hex::decode(integrity_hash) else {
            return false;
        };
        self.mac(handoff).verify_slice(&expected).is_ok()
    }
}

/// The signup form as posted by the browser.
///
/// The `remote_*`, `access_token`, `provider` and `client_id` fields are the
/// signed hand-off; `username`, `alias`, `email` and `password` are the
/// user's own choices and are not covered by the hash.
#[derive(Deserialize, Default)]
#[serde(default)]
pub struct SignupForm {
    pub access_token: String,
    pub remote_username: String,
    pub remote_display_name: String,
    pub remote_email: String,
    pub remote_user_id: String,
    pub provider: String,
    pub client_id: String,
    pub integrity_hash: String,

    pub username: String,
    pub alias: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for SignupForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignupForm")
            .field("handoff", &self.handoff())
            .field("username", &self.username)
            .field("alias", &self.alias)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl SignupForm {
    /// The signed portion of the form.
    pub fn handoff(&self) -> SignupHandoff {
        SignupHandoff {
            access_token: self.access_token.clone(),
            username: self.remote_username.clone(),
            display_name: self.remote_display_name.clone(),
            email: self.remote_email.clone(),
            remote_user_id: self.remote_user_id.clone(),
            provider: self.provider.clone(),
            client_id: self.client_id.clone(),
        }
    }
}
