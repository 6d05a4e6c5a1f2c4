//! Configuration types and loading
//!
//! Config precedence: CLI `--config` > `CONFIG_PATH` env var > `oauth-login.toml`.
//! Secrets resolve env var > `*_file` path > inline TOML value: `HASH_SEED`
//! for the hand-off seed and `OAUTH_<NAME>_CLIENT_SECRET` for each provider.

use common::{Secret, resolve_secret};
use provider::slack::{SLACK_AUTH_LOCATION, SLACK_INSPECT_LOCATION, SLACK_TOKEN_LOCATION};
use provider::standard::{
    WRITEAS_AUTH_LOCATION, WRITEAS_INSPECT_LOCATION, WRITEAS_TOKEN_LOCATION,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::session::DEFAULT_SESSION_TTL;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default, rename = "provider")]
    pub providers: Vec<ProviderConfig>,
}

/// HTTP server and login flow settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Public base URL of this service, e.g. `https://blog.example`
    pub host: String,
    #[serde(default, rename = "hash_seed")]
    hash_seed_inline: Option<String>,
    /// Path to a file containing the hash seed (alternative to HASH_SEED env var)
    #[serde(default)]
    pub hash_seed_file: Option<PathBuf>,
    #[serde(skip)]
    pub hash_seed: Option<Secret<String>>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_state_ttl")]
    pub state_ttl_secs: u64,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// JSON file for users and links; in-memory only when unset
    #[serde(default)]
    pub data_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Writeas,
    Slack,
    Generic,
}

/// One identity provider
#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Route and link name; defaults to the kind for writeas/slack
    #[serde(default)]
    pub name: String,
    pub client_id: String,
    #[serde(default, rename = "client_secret")]
    client_secret_inline: Option<String>,
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    #[serde(default)]
    pub auth_location: String,
    #[serde(default)]
    pub token_location: String,
    #[serde(default)]
    pub inspect_location: String,
    #[serde(default)]
    pub callback_location: String,
    #[serde(default)]
    pub state_register_location: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Slack workspace restriction
    #[serde(default)]
    pub team_id: Option<String>,
}

/// Names that would shadow fixed routes under `/oauth/`.
const RESERVED_PROVIDER_NAMES: &[&str] = &["callback", "signup"];

fn default_request_timeout() -> u64 {
    10
}

fn default_max_connections() -> usize {
    1000
}

fn default_state_ttl() -> u64 {
    account_store::DEFAULT_STATE_TTL.as_secs()
}

fn default_session_ttl() -> u64 {
    DEFAULT_SESSION_TTL.as_secs()
}

fn config_err(msg: impl Into<String>) -> common::Error {
    common::Error::Config(msg.into())
}

impl Config {
    /// Load configuration from a TOML file, resolve secrets, fill provider
    /// defaults and validate.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.server.validate()?;
        config.server.hash_seed = resolve_secret(
            "HASH_SEED",
            config.server.hash_seed_file.as_deref(),
            config.server.hash_seed_inline.take().as_deref(),
        )?;
        if config.server.hash_seed.is_none() {
            return Err(config_err(
                "hash_seed is required (HASH_SEED, hash_seed_file or hash_seed)",
            ));
        }

        let mut seen = HashSet::new();
        for provider in &mut config.providers {
            provider.finish(&config.server.host)?;
            if !seen.insert(provider.name.clone()) {
                return Err(config_err(format!(
                    "duplicate provider name: {}",
                    provider.name
                )));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("oauth-login.toml")
    }
}

impl ServerConfig {
    fn validate(&mut self) -> common::Result<()> {
        if !self.host.starts_with("http://") && !self.host.starts_with("https://") {
            return Err(config_err(format!(
                "host must start with http:// or https://, got: {}",
                self.host
            )));
        }
        self.host = self.host.trim_end_matches('/').to_owned();

        for (name, value) in [
            ("request_timeout_secs", self.request_timeout_secs),
            ("state_ttl_secs", self.state_ttl_secs),
            ("session_ttl_secs", self.session_ttl_secs),
            ("max_connections", self.max_connections as u64),
        ] {
            if value == 0 {
                return Err(config_err(format!("{name} must be greater than 0")));
            }
        }
        Ok(())
    }

    /// Cookies get the `Secure` attribute when the public host is https.
    pub fn secure_cookies(&self) -> bool {
        self.host.starts_with("https://")
    }
}

impl ProviderConfig {
    fn finish(&mut self, host: &str) -> common::Result<()> {
        if self.name.is_empty() {
            self.name = match self.kind {
                ProviderKind::Writeas => "writeas".into(),
                ProviderKind::Slack => "slack".into(),
                ProviderKind::Generic => {
                    return Err(config_err("generic providers need a name"));
                }
            };
        }
        if self.kind == ProviderKind::Slack && self.name != "slack" {
            return Err(config_err(format!(
                "slack providers are always named slack, got: {}",
                self.name
            )));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(config_err(format!(
                "provider name must be lowercase [a-z0-9_-], got: {}",
                self.name
            )));
        }
        if RESERVED_PROVIDER_NAMES.contains(&self.name.as_str()) {
            return Err(config_err(format!(
                "provider name {} collides with a route",
                self.name
            )));
        }

        let defaults = match self.kind {
            ProviderKind::Writeas => Some((
                WRITEAS_AUTH_LOCATION,
                WRITEAS_TOKEN_LOCATION,
                WRITEAS_INSPECT_LOCATION,
            )),
            ProviderKind::Slack => Some((
                SLACK_AUTH_LOCATION,
                SLACK_TOKEN_LOCATION,
                SLACK_INSPECT_LOCATION,
            )),
            ProviderKind::Generic => None,
        };
        if let Some((auth, token, inspect)) = defaults {
            fill(&mut self.auth_location, auth);
            fill(&mut self.token_location, token);
            fill(&mut self.inspect_location, inspect);
        }
        fill(&mut self.callback_location, &format!("{host}/oauth/callback"));

        let env_key = format!(
            "OAUTH_{}_CLIENT_SECRET",
            self.name.to_ascii_uppercase().replace('-', "_")
        );
        self.client_secret = resolve_secret(
            &env_key,
            self.client_secret_file.as_deref(),
            self.client_secret_inline.take().as_deref(),
        )?;

        for (field, value) in [
            ("client_id", self.client_id.as_str()),
            ("auth_location", self.auth_location.as_str()),
            ("token_location", self.token_location.as_str()),
            ("inspect_location", self.inspect_location.as_str()),
        ] {
            if value.trim().is_empty() {
                return Err(config_err(format!(
                    "provider {}: {field} is required",
                    self.name
                )));
            }
        }
        if self.client_secret.is_none() {
            return Err(config_err(format!(
                "provider {}: client_secret is required ({env_key}, client_secret_file or client_secret)",
                self.name
            )));
        }
        if self
            .state_register_location
            .as_deref()
            .is_some_and(|l| l.trim().is_empty())
        {
            self.state_register_location = None;
        }
        Ok(())
    }
}

fn fill(field: &mut String, default: &str) {
    if field.trim().is_empty() {
        *field = default.to_owned();
    }
}
