//! Shared types for the OAuth login service: redacted secrets and the
//! configuration error type used while loading settings.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::{Secret, resolve_secret};
