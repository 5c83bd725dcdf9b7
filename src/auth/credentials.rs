//! Token set produced by the authorization flow
//!
//! Handles the mapping between a [`TokenSet`] and the four keys it occupies in
//! the credential store.

use chrono::{DateTime, TimeZone, Utc};

use crate::store::CredentialRecord;

pub const ACCESS_TOKEN_KEY: &str = "GOOGLE_ACCESS_TOKEN";
pub const REFRESH_TOKEN_KEY: &str = "GOOGLE_REFRESH_TOKEN";
pub const TOKEN_EXPIRY_KEY: &str = "GOOGLE_TOKEN_EXPIRY";
pub const AUTH_EMAIL_KEY: &str = "GOOGLE_AUTH_EMAIL";

/// Keys written after a successful flow, in the order they are appended
pub const TOKEN_KEYS: [&str; 4] = [
    ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
    TOKEN_EXPIRY_KEY,
    AUTH_EMAIL_KEY,
];

/// OAuth2 tokens obtained from one code exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    /// The access token for API requests
    pub access_token: String,

    /// Only issued when offline access was granted
    pub refresh_token: Option<String>,

    /// When the access token expires
    pub expiry: DateTime<Utc>,

    /// Email of the authenticated account, when the identity lookup worked
    pub subject_email: Option<String>,
}

impl TokenSet {
    /// Create a token set from a token response received at `issued_at`.
    ///
    /// Returns `None` when `expires_in_secs` is negative or puts the expiry
    /// outside the representable time range.
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        expires_in_secs: i64,
        issued_at: DateTime<Utc>,
    ) -> Option<Self> {
        if expires_in_secs < 0 {
            return None;
        }
        let lifetime = chrono::Duration::try_seconds(expires_in_secs)?;
        let expiry = issued_at.checked_add_signed(lifetime)?;

        Some(Self {
            access_token,
            refresh_token,
            expiry,
            subject_email: None,
        })
    }

    /// Check if the access token is expired or about to expire
    ///
    /// Returns true if the token expires within the next 5 minutes
    pub fn is_expired(&self) -> bool {
        let buffer = chrono::Duration::minutes(5);
        Utc::now() + buffer >= self.expiry
    }

    /// Store entries for this token set; absent values become empty strings
    pub fn to_entries(&self) -> [(&'static str, String); 4] {
        [
            (ACCESS_TOKEN_KEY, self.access_token.clone()),
            (REFRESH_TOKEN_KEY, self.refresh_token.clone().unwrap_or_default()),
            (TOKEN_EXPIRY_KEY, self.expiry.timestamp_millis().to_string()),
            (AUTH_EMAIL_KEY, self.subject_email.clone().unwrap_or_default()),
        ]
    }

    /// Read a token set back from the store.
    ///
    /// Returns `None` when no access token or no parseable expiry is stored.
    pub fn from_record(record: &CredentialRecord) -> Option<Self> {
        let access_token = non_empty(record.get(ACCESS_TOKEN_KEY))?;
        let millis: i64 = record.get(TOKEN_EXPIRY_KEY)?.trim().parse().ok()?;
        let expiry = Utc.timestamp_millis_opt(millis).single()?;

        Some(Self {
            access_token,
            refresh_token: non_empty(record.get(REFRESH_TOKEN_KEY)),
            expiry,
            subject_email: non_empty(record.get(AUTH_EMAIL_KEY)),
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
