//! Password hashing for accounts that also set a local password at signup

use argon2::Argon2;
use argon2::password_hash::{PasswordHasher, SaltString};
use rand::RngExt;

use crate::error::{Error, Result};

/// Hash `password` with Argon2id (default parameters) and a random salt,
/// returning the PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    rand::rng().fill(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| Error::PasswordHash(format!("encoding salt: {e}")))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| Error::PasswordHash(e.to_string()))?;
    Ok(hash.to_string())
}
