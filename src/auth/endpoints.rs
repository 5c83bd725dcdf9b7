//! Provider endpoints and the authorization URL

use url::Url;

use crate::config::OAuthClientConfig;
use crate::error::Error;
use crate::Result;

/// Google OAuth2 endpoints
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Where the flow sends the user and the code
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub authorization_url: Url,
    pub token_url: Url,
    pub userinfo_url: Url,
}

impl ProviderEndpoints {
    pub fn google() -> Result<Self> {
        Ok(Self {
            authorization_url: parse_endpoint(GOOGLE_AUTH_URL)?,
            token_url: parse_endpoint(GOOGLE_TOKEN_URL)?,
            userinfo_url: parse_endpoint(GOOGLE_USERINFO_URL)?,
        })
    }
}

fn parse_endpoint(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::InvalidConfig(format!("Invalid endpoint {raw}: {e}")))
}

/// Build the URL the user is sent to for consent.
///
/// Always requests offline access and forces the consent screen so that a
/// refresh token is issued even for an account that already granted access.
pub fn build_authorization_url(config: &OAuthClientConfig, endpoint: &Url) -> Result<Url> {
    config.validate()?;

    let mut url = endpoint.clone();
    url.query_pairs_mut()
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", &config.redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", &config.scopes.join(" "))
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent");

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> OAuthClientConfig {
        OAuthClientConfig::new("test_client", "secret", "http://localhost:8080/oauth2callback")
            .with_scopes(["email", "profile"])
    }

    fn auth_endpoint() -> Url {
        ProviderEndpoints::google().unwrap().authorization_url
    }

    #[test]
    fn test_authorization_url() {
        let url = build_authorization_url(&test_config(), &auth_endpoint()).unwrap();
        let url = url.as_str();

        assert!(url.starts_with(GOOGLE_AUTH_URL));
        assert!(url.contains("client_id=test_client"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Foauth2callback"));
        // Space-joined scopes, form-encoded
        assert!(url.contains("scope=email+profile"));
        assert!(url.contains("access_type=offline&prompt=consent"));
    }

    #[test]
    fn test_scope_with_reserved_characters() {
        let config = test_config().with_scopes([
            "https://www.googleapis.com/auth/gmail.readonly",
            "openid",
        ]);
        let url = build_authorization_url(&config, &auth_endpoint()).unwrap();

        assert!(url.as_str().contains(
            "scope=https%3A%2F%2Fwww.googleapis.com%2Fauth%2Fgmail.readonly+openid"
        ));
        let scope = url
            .query_pairs()
            .find(|(k, _)| k == "scope")
            .map(|(_, v)| v.into_owned());
        assert_eq!(
            scope.as_deref(),
            Some("https://www.googleapis.com/auth/gmail.readonly openid")
        );
    }

    #[test]
    fn test_is_deterministic() {
        let a = build_authorization_url(&test_config(), &auth_endpoint()).unwrap();
        let b = build_authorization_url(&test_config(), &auth_endpoint()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_client_id_is_rejected() {
        let mut config = test_config();
        config.client_id.clear();
        let err = build_authorization_url(&config, &auth_endpoint()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_malformed_redirect_is_rejected() {
        let mut config = test_config();
        config.redirect_uri = "localhost:8080 callback".to_string();
        let err = build_authorization_url(&config, &auth_endpoint()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
