//! Token exchange against the provider's token endpoint

use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::callback_server::AuthorizationCode;
use super::credentials::TokenSet;
use super::endpoints::ProviderEndpoints;
use crate::config::OAuthClientConfig;
use crate::error::Error;
use crate::Result;

/// Lifetime assumed when the token response omits `expires_in`
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Per-request timeout for the token and userinfo calls
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("oauth-setup/", env!("CARGO_PKG_VERSION"));

/// Google OAuth2 token response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Token exchange request
#[derive(Debug, Serialize)]
struct TokenExchangeRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
    grant_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    email: Option<String>,
}

/// Swaps an authorization code for a [`TokenSet`]
#[derive(Debug, Clone)]
pub struct TokenExchanger {
    http_client: Client,
    endpoints: ProviderEndpoints,
}

impl TokenExchanger {
    pub fn new(endpoints: ProviderEndpoints) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .build()?;

        Ok(Self {
            http_client,
            endpoints,
        })
    }

    /// Exchange `code` for tokens, then resolve the account email.
    ///
    /// The code is consumed: it is only ever sent once. A failed identity
    /// lookup leaves `subject_email` empty instead of failing the exchange.
    pub async fn exchange(&self, code: AuthorizationCode, config: &OAuthClientConfig) -> Result<TokenSet> {
        let request = TokenExchangeRequest {
            client_id: &config.client_id,
            client_secret: &config.client_secret,
            code: code.as_str(),
            redirect_uri: &config.redirect_uri,
            grant_type: "authorization_code",
        };

        tracing::info!("Exchanging authorization code at {}", self.endpoints.token_url);
        let issued_at = Utc::now();
        let response = self
            .http_client
            .post(self.endpoints.token_url.clone())
            .form(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::TokenExchange { status, body });
        }

        let token_response: TokenResponse =
            serde_json::from_str(&body).map_err(|e| Error::TokenExchange {
                status,
                body: format!("invalid token response: {e}"),
            })?;

        if token_response.refresh_token.is_none() {
            tracing::warn!("Token response did not include a refresh token");
        }

        let expires_in = token_response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let mut tokens = TokenSet::new(
            token_response.access_token,
            token_response.refresh_token,
            expires_in,
            issued_at,
        )
        .ok_or_else(|| Error::TokenExchange {
            status,
            body: format!("invalid token response: expires_in {expires_in} is out of range"),
        })?;

        tokens.subject_email = match self.fetch_email(&tokens.access_token).await {
            Ok(email) => email,
            Err(e) => {
                tracing::warn!("Identity lookup failed, continuing without email: {}", e);
                None
            }
        };

        Ok(tokens)
    }

    /// Look up the email of the account that owns `access_token`
    pub async fn fetch_email(&self, access_token: &str) -> Result<Option<String>> {
        let response = self
            .http_client
            .get(self.endpoints.userinfo_url.clone())
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TokenExchange { status, body });
        }

        let info: UserInfo = response.json().await?;
        Ok(info.email.filter(|e| !e.is_empty()))
    }
}
