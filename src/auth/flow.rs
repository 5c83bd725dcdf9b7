//! FlowOrchestrator - runs one loopback authorization-code flow
//!
//! Stages, in order:
//! - validate configuration and build the authorization URL
//! - bind the callback listener and open the browser
//! - wait for the redirect
//! - exchange the code for tokens
//! - upsert the tokens into the credential file
//!
//! Any failure stops the flow. The credential file is written once, after
//! every other stage has succeeded.

use std::future::Future;

use url::Url;

use super::browser::{BrowserLauncher, SystemBrowser};
use super::callback_server::CallbackServer;
use super::credentials::TokenSet;
use super::endpoints::{build_authorization_url, ProviderEndpoints};
use super::exchange::TokenExchanger;
use crate::config::{FlowOptions, OAuthClientConfig};
use crate::store::CredentialStore;
use crate::Result;

pub struct FlowOrchestrator {
    config: OAuthClientConfig,
    exchanger: TokenExchanger,
    endpoints: ProviderEndpoints,
    store: CredentialStore,
    browser: Box<dyn BrowserLauncher>,
    options: FlowOptions,
}

impl FlowOrchestrator {
    /// Orchestrator for Google endpoints using the system browser
    pub fn new(config: OAuthClientConfig, store: CredentialStore) -> Result<Self> {
        let endpoints = ProviderEndpoints::google()?;
        Ok(Self {
            config,
            exchanger: TokenExchanger::new(endpoints.clone())?,
            endpoints,
            store,
            browser: Box::new(SystemBrowser),
            options: FlowOptions::default(),
        })
    }

    pub fn with_endpoints(mut self, endpoints: ProviderEndpoints) -> Result<Self> {
        self.exchanger = TokenExchanger::new(endpoints.clone())?;
        self.endpoints = endpoints;
        Ok(self)
    }

    pub fn with_browser(mut self, browser: impl BrowserLauncher + 'static) -> Self {
        self.browser = Box::new(browser);
        self
    }

    pub fn with_options(mut self, options: FlowOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Run the flow to completion.
    ///
    /// `notify` receives the authorization URL once the listener is up, so
    /// the caller can print it for manual use. `cancel` aborts the wait for
    /// the redirect when it completes.
    pub async fn run<N, C>(&self, notify: N, cancel: C) -> Result<TokenSet>
    where
        N: FnOnce(&Url),
        C: Future<Output = ()>,
    {
        self.config.validate()?;
        let auth_url = build_authorization_url(&self.config, &self.endpoints.authorization_url)?;
        let redirect_url = self.config.redirect_url()?;

        // Read up front so an unreadable file fails before the user consents
        let record = self.store.load()?;

        let server = CallbackServer::bind(&redirect_url).await?;

        notify(&auth_url);
        if let Err(e) = self.browser.open(&auth_url) {
            tracing::warn!("Failed to open browser: {}", e);
        }

        let code = server.run(self.options.callback_timeout, cancel).await?;
        let tokens = self.exchanger.exchange(code, &self.config).await?;

        let record = record.upsert(tokens.to_entries())?;
        self.store.persist(&record)?;
        tracing::info!("Saved credentials to {}", self.store.path().display());

        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::TOKEN_KEYS;
    use crate::error::Error;
    use httpmock::prelude::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    /// Plays the user's browser: follows the redirect with a canned query
    #[derive(Clone, Default)]
    struct RedirectingBrowser {
        query: String,
        fail_launch: bool,
        opened: Arc<Mutex<Vec<Url>>>,
    }

    impl RedirectingBrowser {
        fn with_query(query: &str) -> Self {
            Self {
                query: query.to_string(),
                ..Default::default()
            }
        }
    }

    impl BrowserLauncher for RedirectingBrowser {
        fn open(&self, url: &Url) -> std::io::Result<()> {
            self.opened.lock().unwrap().push(url.clone());

            let redirect = url
                .query_pairs()
                .find(|(k, _)| k == "redirect_uri")
                .map(|(_, v)| Url::parse(&v).unwrap())
                .unwrap();
            let query = self.query.clone();
            tokio::spawn(async move {
                let host = redirect.host_str().unwrap().to_string();
                let port = redirect.port().unwrap();
                let mut stream = TcpStream::connect((host.as_str(), port)).await.unwrap();
                let request = format!(
                    "GET {}?{} HTTP/1.1\r\nHost: {}:{}\r\nConnection: close\r\n\r\n",
                    redirect.path(),
                    query,
                    host,
                    port
                );
                stream.write_all(request.as_bytes()).await.unwrap();
                let mut buf = Vec::new();
                let _ = stream.read_to_end(&mut buf).await;
            });

            if self.fail_launch {
                Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no browser"))
            } else {
                Ok(())
            }
        }
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn config() -> OAuthClientConfig {
        let redirect = format!("http://127.0.0.1:{}/oauth2callback", free_port());
        OAuthClientConfig::new("client", "secret", redirect)
    }

    fn endpoints(server: &MockServer) -> ProviderEndpoints {
        ProviderEndpoints {
            authorization_url: Url::parse(&server.url("/auth")).unwrap(),
            token_url: Url::parse(&server.url("/token")).unwrap(),
            userinfo_url: Url::parse(&server.url("/userinfo")).unwrap(),
        }
    }

    fn orchestrator(
        config: OAuthClientConfig,
        server: &MockServer,
        store: CredentialStore,
        browser: RedirectingBrowser,
    ) -> FlowOrchestrator {
        FlowOrchestrator::new(config, store)
            .unwrap()
            .with_endpoints(endpoints(server))
            .unwrap()
            .with_browser(browser)
            .with_options(FlowOptions {
                callback_timeout: Duration::from_secs(10),
            })
    }

    fn mock_token_endpoint(server: &MockServer) -> httpmock::Mock<'_> {
        server.mock(|when, then| {
            when.method(POST).path("/token").body_contains("code=abc123");
            then.status(200).json_body(serde_json::json!({
                "access_token": "T",
                "refresh_token": "R",
                "expires_in": 3600
            }));
        })
    }

    #[tokio::test]
    async fn test_flow_persists_tokens() {
        let server = MockServer::start();
        let token_mock = mock_token_endpoint(&server);
        server.mock(|when, then| {
            when.method(GET).path("/userinfo");
            then.status(200).json_body(serde_json::json!({ "email": "me@example.com" }));
        });

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".env");
        std::fs::write(&path, "GOOGLE_CLIENT_ID=client\nOTHER=keep\nGOOGLE_ACCESS_TOKEN=old\n").unwrap();

        let config = config();
        let browser = RedirectingBrowser::with_query("code=abc123");
        let opened = browser.opened.clone();
        let flow = orchestrator(config.clone(), &server, CredentialStore::new(&path), browser);

        let mut notified = None;
        let tokens = flow
            .run(|url| notified = Some(url.clone()), std::future::pending())
            .await
            .unwrap();

        token_mock.assert();
        assert_eq!(tokens.access_token, "T");
        assert_eq!(tokens.subject_email.as_deref(), Some("me@example.com"));
        assert_eq!(opened.lock().unwrap().as_slice(), &[notified.unwrap()]);

        let content = std::fs::read_to_string(&path).unwrap();
        let expected = format!(
            "GOOGLE_CLIENT_ID=client\nOTHER=keep\nGOOGLE_ACCESS_TOKEN=T\n\
             GOOGLE_REFRESH_TOKEN=R\nGOOGLE_TOKEN_EXPIRY={}\nGOOGLE_AUTH_EMAIL=me@example.com\n",
            tokens.expiry.timestamp_millis()
        );
        assert_eq!(content, expected);

        // Listener is gone
        let redirect = config.redirect_url().unwrap();
        tokio::net::TcpListener::bind(("127.0.0.1", redirect.port().unwrap()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_denied_flow_writes_nothing() {
        let server = MockServer::start();
        let token_mock = mock_token_endpoint(&server);

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".env");
        std::fs::write(&path, "A=1\n").unwrap();

        let config = config();
        let flow = orchestrator(
            config.clone(),
            &server,
            CredentialStore::new(&path),
            RedirectingBrowser::with_query("error=access_denied"),
        );

        let err = flow.run(|_| {}, std::future::pending()).await.unwrap_err();
        assert!(matches!(&err, Error::AuthorizationDenied(code) if code == "access_denied"));
        token_mock.assert_hits(0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "A=1\n");

        let port = config.redirect_url().unwrap().port().unwrap();
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }

    #[tokio::test]
    async fn test_browser_failure_is_not_fatal() {
        let server = MockServer::start();
        mock_token_endpoint(&server);
        server.mock(|when, then| {
            when.method(GET).path("/userinfo");
            then.status(401);
        });

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".env");
        let browser = RedirectingBrowser {
            fail_launch: true,
            ..RedirectingBrowser::with_query("code=abc123")
        };
        let flow = orchestrator(config(), &server, CredentialStore::new(&path), browser);

        let tokens = flow.run(|_| {}, std::future::pending()).await.unwrap();
        assert!(tokens.subject_email.is_none());

        let record = flow.store().load().unwrap();
        let keys: Vec<&str> = record.keys().collect();
        assert_eq!(keys, TOKEN_KEYS);
        assert_eq!(record.get("GOOGLE_AUTH_EMAIL"), Some(""));
    }

    #[tokio::test]
    async fn test_invalid_config_stops_before_any_io() {
        let server = MockServer::start();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".env");

        let mut config = config();
        config.client_secret.clear();
        let browser = RedirectingBrowser::with_query("code=abc123");
        let opened = browser.opened.clone();
        let flow = orchestrator(config, &server, CredentialStore::new(&path), browser);

        let err = flow.run(|_| {}, std::future::pending()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(opened.lock().unwrap().is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_https_redirect_fails_before_store_is_read() {
        let server = MockServer::start();
        let tmp = TempDir::new().unwrap();

        let config = OAuthClientConfig::new("client", "secret", "https://localhost:8443/cb");
        let browser = RedirectingBrowser::with_query("code=abc123");
        let opened = browser.opened.clone();
        // A directory as the store would fail with FileIo if it were read
        let flow = orchestrator(config, &server, CredentialStore::new(tmp.path()), browser);

        let err = flow.run(|_| {}, std::future::pending()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(err.stage(), "configuration");
        assert!(opened.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_code_leaves_store_untouched() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(400).json_body(serde_json::json!({ "error": "invalid_grant" }));
        });

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".env");
        std::fs::write(&path, "GOOGLE_ACCESS_TOKEN=old\n").unwrap();

        let flow = orchestrator(
            config(),
            &server,
            CredentialStore::new(&path),
            RedirectingBrowser::with_query("code=abc123"),
        );

        let err = flow.run(|_| {}, std::future::pending()).await.unwrap_err();
        assert_eq!(err.stage(), "token exchange");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "GOOGLE_ACCESS_TOKEN=old\n");
    }

    #[tokio::test]
    async fn test_port_in_use_is_reported_before_browser_opens() {
        let server = MockServer::start();
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let tmp = TempDir::new().unwrap();
        let config = OAuthClientConfig::new(
            "client",
            "secret",
            format!("http://127.0.0.1:{port}/oauth2callback"),
        );
        let browser = RedirectingBrowser::with_query("code=abc123");
        let opened = browser.opened.clone();
        let flow = orchestrator(config, &server, CredentialStore::new(tmp.path().join(".env")), browser);

        let err = flow.run(|_| {}, std::future::pending()).await.unwrap_err();
        assert!(err.is_port_conflict());
        assert!(opened.lock().unwrap().is_empty());
    }
}
