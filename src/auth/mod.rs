//! Loopback OAuth2 authorization-code flow
//!
//! This module provides:
//! - The authorization URL and provider endpoints
//! - A single-use loopback callback server
//! - Token exchange and identity lookup
//! - The browser launcher capability
//! - FlowOrchestrator, which runs the whole flow and saves the tokens

mod browser;
mod callback_server;
mod credentials;
mod endpoints;
mod exchange;
mod flow;

pub use browser::{BrowserLauncher, LogOnlyBrowser, SystemBrowser};
pub use callback_server::{parse_callback_request, AuthorizationCode, CallbackOutcome, CallbackServer};
pub use credentials::{
    TokenSet, ACCESS_TOKEN_KEY, AUTH_EMAIL_KEY, REFRESH_TOKEN_KEY, TOKEN_EXPIRY_KEY, TOKEN_KEYS,
};
pub use endpoints::{build_authorization_url, ProviderEndpoints};
pub use exchange::TokenExchanger;
pub use flow::FlowOrchestrator;
