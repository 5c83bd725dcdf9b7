//! oauth-setup CLI entry point

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use oauth_setup::auth::{FlowOrchestrator, LogOnlyBrowser, TokenSet, TOKEN_KEYS};
use oauth_setup::config::{self, FlowOptions, OAuthClientConfig};
use oauth_setup::store::CredentialStore;
use oauth_setup::{ui, Error};

#[derive(Parser)]
#[command(name = "oauth-setup")]
#[command(about = "🔐 One-time Google OAuth2 consent, saved to your .env file")]
#[command(version)]
struct Cli {
    /// Credential file holding client settings and receiving tokens
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the browser consent flow and save the resulting tokens
    Login {
        /// Listen on this port instead of the one in the redirect URI
        #[arg(short, long)]
        port: Option<u16>,

        /// Seconds to wait for the browser redirect
        #[arg(short, long, default_value_t = config::DEFAULT_CALLBACK_TIMEOUT.as_secs())]
        timeout: u64,

        /// Print the authorization URL without opening a browser
        #[arg(long)]
        no_browser: bool,
    },

    /// Show which tokens are stored and whether they are still valid
    Status,

    /// Remove stored tokens, keeping every other entry
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays readable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Login {
            port,
            timeout,
            no_browser,
        } => {
            run_login(&cli.env_file, port, Duration::from_secs(timeout), no_browser).await?;
        }

        Commands::Status => {
            run_status(&cli.env_file)?;
        }

        Commands::Logout => {
            let store = CredentialStore::new(&cli.env_file);
            let record = store.load()?;
            if !TOKEN_KEYS.iter().any(|k| record.contains_key(k)) {
                ui::print_step("No stored tokens, nothing to remove");
                return Ok(());
            }
            store.persist(&record.remove(&TOKEN_KEYS[..]))?;
            ui::print_success(&format!("Removed tokens from {}", store.path().display()));
        }
    }

    Ok(())
}

async fn run_login(env_file: &Path, port: Option<u16>, timeout: Duration, no_browser: bool) -> Result<()> {
    ui::print_header("Google OAuth2 setup");

    // Configuration problems are reported before anything is bound or opened
    let config = match load_login_config(env_file, port) {
        Ok(config) => config,
        Err(e) => exit_config_error(&e, env_file),
    };

    ui::print_step(&format!("Client ID: {}", ui::mask(&config.client_id)));
    ui::print_step(&format!("Redirect URI: {}", config.redirect_uri));
    ui::print_step(&format!("Scopes: {}", config.scopes.join(" ")));

    let store = CredentialStore::new(env_file);
    let mut flow = FlowOrchestrator::new(config, store)?.with_options(FlowOptions {
        callback_timeout: timeout,
    });
    if no_browser {
        flow = flow.with_browser(LogOnlyBrowser);
    }

    let notify = |url: &url::Url| {
        println!();
        ui::print_step("Open this URL to grant access if the browser does not appear:");
        println!("\n    {}\n", url);
        ui::print_waiting(&format!("Waiting for the redirect (up to {}s, Ctrl+C to abort)", timeout.as_secs()));
    };
    let cancel = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    match flow.run(notify, cancel).await {
        Ok(tokens) => {
            println!();
            ui::print_success("Authorization complete");
            print_tokens(&tokens, flow.store().path());
            Ok(())
        }
        Err(e) => {
            report_failure(&e);
            std::process::exit(1);
        }
    }
}

/// Client config with the `--port` override applied; every failure here is
/// a configuration error
fn load_login_config(env_file: &Path, port: Option<u16>) -> oauth_setup::Result<OAuthClientConfig> {
    let config = config::load(env_file)?;
    match port {
        Some(port) => config.with_port(port),
        None => Ok(config),
    }
}

fn exit_config_error(error: &Error, env_file: &Path) -> ! {
    ui::print_error(&error.to_string());
    eprintln!(
        "\n  Set {}, {} and optionally {} in {} or the environment.",
        config::CLIENT_ID_KEY,
        config::CLIENT_SECRET_KEY,
        config::REDIRECT_URI_KEY,
        env_file.display()
    );
    std::process::exit(2);
}

fn report_failure(error: &Error) {
    println!();
    ui::print_error(&format!("Failed during {}: {}", error.stage(), error));

    if error.is_port_conflict() {
        eprintln!("\n  Another process holds the callback port. Free it or pass --port with a");
        eprintln!("  port that is also registered as a redirect URI for this client.");
    }
    if let Some(code) = error.provider_error() {
        match code.as_str() {
            "invalid_grant" => eprintln!("\n  The code was already used or expired. Run login again."),
            "redirect_uri_mismatch" => {
                eprintln!("\n  The redirect URI must match one registered for the OAuth client.")
            }
            "access_denied" => eprintln!("\n  Consent was declined in the browser."),
            _ => {}
        }
    }
}

fn print_tokens(tokens: &TokenSet, path: &Path) {
    ui::print_field("Saved to", &path.display().to_string());
    ui::print_field("Access token", &ui::mask(&tokens.access_token));
    match &tokens.refresh_token {
        Some(refresh) => ui::print_field("Refresh token", &ui::mask(refresh)),
        None => ui::print_warning("No refresh token returned; revoke access and log in again for offline use"),
    }
    ui::print_field("Expires", &tokens.expiry.to_rfc3339());
    ui::print_field(
        "Account",
        tokens.subject_email.as_deref().unwrap_or("(unknown)"),
    );
}

fn run_status(env_file: &Path) -> Result<()> {
    ui::print_header("Stored credentials");

    let store = CredentialStore::new(env_file);
    let record = store.load()?;

    for key in TOKEN_KEYS {
        let present = record.get(key).map_or(false, |v| !v.is_empty());
        let mark = if present { "present" } else { "missing" };
        ui::print_field(key, mark);
    }

    match TokenSet::from_record(&record) {
        Some(tokens) => {
            println!();
            ui::print_field("Account", tokens.subject_email.as_deref().unwrap_or("(unknown)"));
            ui::print_field("Expires", &tokens.expiry.to_rfc3339());
            if tokens.is_expired() {
                ui::print_warning("Access token has expired; refresh it or run login again");
            } else {
                ui::print_success("Access token is valid");
            }
            if tokens.refresh_token.is_none() {
                ui::print_warning("No refresh token stored");
            }
        }
        None => {
            println!();
            ui::print_warning(&format!("No tokens in {}; run `oauth-setup login`", store.path().display()));
        }
    }

    Ok(())
}
