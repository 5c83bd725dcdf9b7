//! oauth-setup - loopback OAuth2 setup for local tools
//!
//! Runs the Google authorization-code flow against a temporary local listener
//! and writes the resulting tokens into a `.env` style credential file.

pub mod auth;
pub mod config;
pub mod error;
pub mod store;
pub mod ui;

pub use error::{Error, Result};
