//! Opening the authorization URL for the user

use url::Url;

/// Something that can show the authorization page to the user
pub trait BrowserLauncher: Send + Sync {
    /// Open `url`. Failure is reported but never fatal to the flow.
    fn open(&self, url: &Url) -> std::io::Result<()>;
}

/// Opens the URL with the platform's default browser
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &Url) -> std::io::Result<()> {
        open::that(url.as_str())
    }
}

/// Headless fallback: only logs, the user follows the printed URL
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyBrowser;

impl BrowserLauncher for LogOnlyBrowser {
    fn open(&self, url: &Url) -> std::io::Result<()> {
        tracing::info!("Browser launch skipped; authorization URL: {}", url);
        Ok(())
    }
}
