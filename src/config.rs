//! Configuration management
//!
//! Client credentials come from the same `.env` file the tokens are written
//! to, with process environment variables taking precedence over the file.

use std::path::Path;
use std::time::Duration;

use url::Url;

use crate::error::Error;
use crate::store::{CredentialRecord, CredentialStore};
use crate::Result;

pub const CLIENT_ID_KEY: &str = "GOOGLE_CLIENT_ID";
pub const CLIENT_SECRET_KEY: &str = "GOOGLE_CLIENT_SECRET";
pub const REDIRECT_URI_KEY: &str = "GOOGLE_REDIRECT_URI";
pub const SCOPES_KEY: &str = "GOOGLE_OAUTH_SCOPES";

pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/oauth2callback";

/// Scopes requested when none are configured
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/calendar.readonly",
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
];

/// How long to wait for the browser redirect by default
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// OAuth2 client registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Must point at the loopback listener, path included
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

impl OAuthClientConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Check the invariants every flow stage relies on
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::InvalidConfig(format!("{CLIENT_ID_KEY} is not set")));
        }
        if self.client_secret.trim().is_empty() {
            return Err(Error::InvalidConfig(format!("{CLIENT_SECRET_KEY} is not set")));
        }
        if self.scopes.iter().all(|s| s.trim().is_empty()) {
            return Err(Error::InvalidConfig("at least one scope is required".to_string()));
        }
        self.redirect_url().map(|_| ())
    }

    /// Parsed redirect URI; must be an absolute `http` URL with a host,
    /// since the loopback listener speaks plain HTTP
    pub fn redirect_url(&self) -> Result<Url> {
        let url = Url::parse(&self.redirect_uri).map_err(|e| {
            Error::InvalidConfig(format!("redirect URI '{}' is invalid: {}", self.redirect_uri, e))
        })?;
        if url.cannot_be_a_base() || url.host_str().is_none() {
            return Err(Error::InvalidConfig(format!(
                "redirect URI '{}' must be an absolute URL with a host",
                self.redirect_uri
            )));
        }
        if url.scheme() != "http" {
            return Err(Error::InvalidConfig(format!(
                "redirect URI '{}' must use http for a loopback listener",
                self.redirect_uri
            )));
        }
        Ok(url)
    }

    /// Copy of this config with the redirect URI moved to `port`
    pub fn with_port(mut self, port: u16) -> Result<Self> {
        let mut url = self.redirect_url()?;
        url.set_port(Some(port))
            .map_err(|_| Error::InvalidConfig(format!("cannot set port on '{url}'")))?;
        self.redirect_uri = url.to_string();
        Ok(self)
    }
}

/// Per-run options for the login flow
#[derive(Debug, Clone)]
pub struct FlowOptions {
    /// Give up waiting for the redirect after this long
    pub callback_timeout: Duration,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }
}

/// Load and validate client configuration.
///
/// Reads `env_file` if it exists, then lets the process environment override
/// individual keys.
pub fn load(env_file: &Path) -> Result<OAuthClientConfig> {
    let record = CredentialStore::new(env_file).load()?;
    let config = from_sources(&record, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

fn from_sources<F>(record: &CredentialRecord, env: F) -> OAuthClientConfig
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |key: &str| -> Option<String> {
        env(key)
            .or_else(|| record.get(key).map(str::to_string))
            .map(|v| unquote(&v).to_string())
            .filter(|v| !v.is_empty())
    };

    let mut config = OAuthClientConfig::new(
        lookup(CLIENT_ID_KEY).unwrap_or_default(),
        lookup(CLIENT_SECRET_KEY).unwrap_or_default(),
        lookup(REDIRECT_URI_KEY).unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string()),
    );

    if let Some(scopes) = lookup(SCOPES_KEY) {
        config = config.with_scopes(
            scopes
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty()),
        );
    }

    config
}

/// Strip one pair of matching surrounding quotes
fn unquote(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
