//! Error types for oauth-setup

use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Result type alias for oauth-setup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the authorization flow
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to bind callback listener on {addr}: {source}")]
    ListenerBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Callback listener error: {0}")]
    Listener(#[source] std::io::Error),

    #[error("Authorization denied by provider: {0}")]
    AuthorizationDenied(String),

    #[error("No authorization redirect received within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Authorization cancelled")]
    Cancelled,

    #[error("Token exchange failed ({status}): {body}")]
    TokenExchange { status: StatusCode, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Credential file {}: {source}", path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid credential entry: {0}")]
    InvalidEntry(String),
}

impl Error {
    /// Wrap an I/O failure on the credential file
    pub fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::FileIo {
            path: path.into(),
            source,
        }
    }

    /// Name of the flow stage that produced this error
    pub fn stage(&self) -> &'static str {
        match self {
            Error::InvalidConfig(_) => "configuration",
            Error::ListenerBind { .. } | Error::Listener(_) => "callback listener",
            Error::AuthorizationDenied(_) | Error::Timeout(_) | Error::Cancelled => "authorization",
            Error::TokenExchange { .. } | Error::Network(_) => "token exchange",
            Error::FileIo { .. } | Error::InvalidEntry(_) => "credential store",
        }
    }

    /// The requested port was taken; the caller may retry with another one
    pub fn is_port_conflict(&self) -> bool {
        matches!(self, Error::ListenerBind { source, .. } if source.kind() == std::io::ErrorKind::AddrInUse)
    }

    /// Provider-reported error code, if the failure carries one
    pub fn provider_error(&self) -> Option<String> {
        match self {
            Error::AuthorizationDenied(code) => Some(code.clone()),
            Error::TokenExchange { body, .. } => serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string)),
            _ => None,
        }
    }
}
