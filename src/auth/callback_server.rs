//! OAuth2 callback server
//!
//! A temporary local HTTP server that captures the authorization code from the
//! browser redirect. The listener is bound before the browser is opened and is
//! closed before [`CallbackServer::run`] returns, whatever the outcome.

use std::fmt;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::{Host, Url};

use crate::error::Error;
use crate::Result;

/// How long a single connection may take to send its request head
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest request head we are willing to buffer
const MAX_REQUEST_BYTES: usize = 8 * 1024;

/// Success HTML page shown after authorization
const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Authorization Successful</title>
    <style>
        body {
            background-color: #0b0e14;
            color: #e2e8f0;
            font-family: -apple-system, system-ui, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            text-align: center;
        }
        h1 { font-size: 24px; color: #4ade80; }
        p { font-size: 15px; color: #94a3b8; line-height: 1.6; }
    </style>
</head>
<body>
    <div>
        <h1>Authorization Successful</h1>
        <p>You can close this tab and return to the terminal.</p>
    </div>
</body>
</html>"#;

/// Failure page; `{error}` is replaced with the escaped provider error code
const ERROR_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Authorization Failed</title>
    <style>
        body {
            background-color: #0b0e14;
            color: #e2e8f0;
            font-family: -apple-system, system-ui, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            text-align: center;
        }
        h1 { font-size: 24px; color: #ef4444; }
        code { color: #fbbf24; }
        p { font-size: 15px; color: #94a3b8; line-height: 1.6; }
    </style>
</head>
<body>
    <div>
        <h1>Authorization Failed</h1>
        <p>The provider reported <code>{error}</code>.<br>You can close this tab and check your terminal.</p>
    </div>
</body>
</html>"#;

const NOT_FOUND_HTML: &str =
    "<html><body><p>Waiting for the authorization redirect.</p></body></html>";

/// Single-use authorization code delivered by the redirect
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationCode(String);

impl AuthorizationCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthorizationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthorizationCode(<redacted>)")
    }
}

/// What a single inbound request means for the flow
#[derive(Debug, PartialEq, Eq)]
pub enum CallbackOutcome {
    Code(AuthorizationCode),
    Denied(String),
    /// Not a redirect for this flow; keep listening
    Ignored,
}

/// Classify a raw HTTP request.
///
/// Only `GET` requests on `expected_path` count. For each parameter the first
/// non-empty occurrence wins. A request carrying both `error` and `code` is
/// treated as a denial.
pub fn parse_callback_request(request: &str, expected_path: &str) -> CallbackOutcome {
    let Some(first_line) = request.lines().next() else {
        return CallbackOutcome::Ignored;
    };

    // Parse: GET /oauth2callback?code=xxx HTTP/1.1
    let mut parts = first_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return CallbackOutcome::Ignored;
    };
    if method != "GET" {
        return CallbackOutcome::Ignored;
    }

    let Ok(url) = Url::parse(&format!("http://localhost{target}")) else {
        return CallbackOutcome::Ignored;
    };
    if url.path() != expected_path {
        return CallbackOutcome::Ignored;
    }

    let mut code = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        if value.is_empty() {
            continue;
        }
        match key.as_ref() {
            "code" if code.is_none() => code = Some(value.into_owned()),
            "error" if error.is_none() => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match (error, code) {
        (Some(error), _) => CallbackOutcome::Denied(error),
        (None, Some(code)) => CallbackOutcome::Code(AuthorizationCode(code)),
        (None, None) => CallbackOutcome::Ignored,
    }
}

/// Loopback listener waiting for exactly one authorization redirect
#[derive(Debug)]
pub struct CallbackServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    path: String,
}

impl CallbackServer {
    /// Bind the host and port named by `redirect_uri`.
    ///
    /// `localhost` binds the IPv4 loopback address. Port 0 picks a free port,
    /// which is only useful when the caller can read it back with
    /// [`CallbackServer::local_addr`].
    pub async fn bind(redirect_uri: &Url) -> Result<Self> {
        if redirect_uri.scheme() != "http" {
            return Err(Error::InvalidConfig(format!(
                "redirect URI '{redirect_uri}' must use http for a loopback listener"
            )));
        }
        let port = redirect_uri.port_or_known_default().unwrap_or(80);

        let bound = match redirect_uri.host() {
            Some(Host::Domain(domain)) if domain.eq_ignore_ascii_case("localhost") => {
                let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
                (TcpListener::bind(addr).await, addr.to_string())
            }
            Some(Host::Domain(domain)) => {
                let addr = format!("{domain}:{port}");
                (TcpListener::bind(addr.as_str()).await, addr)
            }
            Some(Host::Ipv4(ip)) => {
                let addr = SocketAddr::new(IpAddr::V4(ip), port);
                (TcpListener::bind(addr).await, addr.to_string())
            }
            Some(Host::Ipv6(ip)) => {
                let addr = SocketAddr::new(IpAddr::V6(ip), port);
                (TcpListener::bind(addr).await, addr.to_string())
            }
            None => {
                return Err(Error::InvalidConfig(format!(
                    "redirect URI '{redirect_uri}' has no host"
                )))
            }
        };

        let listener = match bound {
            (Ok(listener), _) => listener,
            (Err(source), addr) => return Err(Error::ListenerBind { addr, source }),
        };
        let local_addr = listener.local_addr().map_err(Error::Listener)?;

        tracing::info!("Callback server listening on http://{}{}", local_addr, redirect_uri.path());

        Ok(Self {
            listener,
            local_addr,
            path: redirect_uri.path().to_string(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the redirect, at most `timeout`, or until `cancel` completes.
    ///
    /// Requests that carry neither `code` nor `error` are answered and
    /// ignored. The listener is dropped before this returns.
    pub async fn run<F>(self, timeout: Duration, cancel: F) -> Result<AuthorizationCode>
    where
        F: Future<Output = ()>,
    {
        let result = tokio::select! {
            result = self.accept_until_resolved() => result,
            _ = tokio::time::sleep(timeout) => Err(Error::Timeout(timeout)),
            _ = cancel => Err(Error::Cancelled),
        };

        let Self { listener, local_addr, .. } = self;
        drop(listener);
        tracing::debug!("Callback server on {} closed", local_addr);

        result
    }

    async fn accept_until_resolved(&self) -> Result<AuthorizationCode> {
        loop {
            let (mut socket, peer) = self.listener.accept().await.map_err(Error::Listener)?;

            let request = match read_request(&mut socket).await {
                Ok(request) => request,
                Err(e) => {
                    tracing::debug!("Dropping connection from {}: {}", peer, e);
                    continue;
                }
            };

            match parse_callback_request(&request, &self.path) {
                CallbackOutcome::Code(code) => {
                    tracing::info!("Authorization code received");
                    respond(&mut socket, "200 OK", SUCCESS_HTML).await;
                    return Ok(code);
                }
                CallbackOutcome::Denied(error) => {
                    tracing::warn!("Provider redirected with error: {}", error);
                    let page = ERROR_HTML.replace("{error}", &escape_html(&error));
                    respond(&mut socket, "400 Bad Request", &page).await;
                    return Err(Error::AuthorizationDenied(error));
                }
                CallbackOutcome::Ignored => {
                    tracing::debug!("Ignoring request from {}", peer);
                    respond(&mut socket, "404 Not Found", NOT_FOUND_HTML).await;
                }
            }
        }
    }
}

/// Read until the end of the request head
async fn read_request(socket: &mut TcpStream) -> std::io::Result<String> {
    let read = async {
        let mut buffer = Vec::with_capacity(1024);
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..n]);
            if buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.len() >= MAX_REQUEST_BYTES {
                break;
            }
        }
        Ok::<_, std::io::Error>(buffer)
    };

    let buffer = tokio::time::timeout(REQUEST_READ_TIMEOUT, read)
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "request head not received"))??;

    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Best-effort response; the browser going away must not fail the flow
async fn respond(socket: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );

    if let Err(e) = socket.write_all(response.as_bytes()).await {
        tracing::debug!("Failed to write callback response: {}", e);
    }
    let _ = socket.shutdown().await;
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
