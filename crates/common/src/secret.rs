//! Secret wrapper for sensitive values (client secrets, the hand-off hash seed)

use std::fmt;
use std::path::Path;
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// Resolve a string secret from, in order: the environment variable `env_key`,
/// the file at `file`, then the `inline` value from the config file.
///
/// File contents are trimmed. A source that yields an empty string is treated
/// as absent so the next source is consulted. A configured file that cannot be
/// read is an error even if an inline value exists.
pub fn resolve_secret(
    env_key: &str,
    file: Option<&Path>,
    inline: Option<&str>,
) -> Result<Option<Secret<String>>> {
    if let Ok(value) = std::env::var(env_key) {
        let value = value.trim().to_owned();
        if !value.is_empty() {
            return Ok(Some(Secret::new(value)));
        }
    }

    if let Some(path) = file {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read secret file {}: {e}", path.display()))
        })?;
        let value = contents.trim().to_owned();
        if !value.is_empty() {
            return Ok(Some(Secret::new(value)));
        }
    }

    Ok(inline
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| Secret::new(v.to_owned())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_redacts_debug() {
        let secret = Secret::new(String::from("client-secret-value"));
        let debug = format!("{:?}", secret);
        assert_eq!(debug, "[REDACTED]");
        assert!(!debug.contains("client-secret-value"));
        assert_eq!(format!("{secret}"), "[REDACTED]");
    }

    #[test]
    fn test_secret_exposes_value() {
        let secret = Secret::new(String::from("client-secret-value"));
        assert_eq!(secret.expose(), "client-secret-value");
    }

    #[test]
    fn resolve_prefers_file_over_inline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed");
        std::fs::write(&path, "from-file\n").unwrap();

        let secret = resolve_secret(
            "COMMON_TEST_UNSET_SECRET_A",
            Some(&path),
            Some("from-inline"),
        )
        .unwrap()
        .unwrap();
        assert_eq!(secret.expose(), "from-file");
    }

    #[test]
    fn resolve_falls_back_to_inline() {
        let secret = resolve_secret("COMMON_TEST_UNSET_SECRET_B", None, Some("  inline  "))
            .unwrap()
            .unwrap();
        assert_eq!(secret.expose(), "inline");
    }

    #[test]
    fn resolve_empty_sources_yield_none() {
        let resolved = resolve_secret("COMMON_TEST_UNSET_SECRET_C", None, Some("   ")).unwrap();
        assert!(resolved.is_none());
    }

    #[test]
    fn resolve_missing_file_is_an_error() {
        let result = resolve_secret(
            "COMMON_TEST_UNSET_SECRET_D",
            Some(Path::new("/nonexistent/secret")),
            Some("inline"),
        );
        assert!(result.is_err());
    }
}
