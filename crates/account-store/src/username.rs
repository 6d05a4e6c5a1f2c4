//! Username normalization rules for locally created accounts

use crate::error::{Error, Result};

pub const MAX_USERNAME_LEN: usize = 100;

/// Names that collide with routes or are otherwise kept back.
const RESERVED: &[&str] = &[
    "admin", "api", "health", "login", "logout", "me", "metrics", "new", "oauth", "signup",
];

/// Trim and lowercase `raw`, then check it is 1..=100 chars of `[a-z0-9_-]`
/// starting with a letter or digit, and not reserved.
pub fn normalize_username(raw: &str) -> Result<String> {
    let name = raw.trim().to_ascii_lowercase();

    if name.is_empty() {
        return Err(Error::InvalidUsername("username is required".into()));
    }
    if name.len() > MAX_USERNAME_LEN {
        return Err(Error::InvalidUsername(format!(
            "username must be at most {MAX_USERNAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(Error::InvalidUsername(
            "username may only contain letters, numbers, hyphens and underscores".into(),
        ));
    }
    if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(Error::InvalidUsername(
            "username must start with a letter or number".into(),
        ));
    }
    if RESERVED.contains(&name.as_str()) {
        return Err(Error::InvalidUsername(format!("{name} is reserved")));
    }
    Ok(name)
}
