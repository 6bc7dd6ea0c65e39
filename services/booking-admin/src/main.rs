//! Booking admin command-line client
//!
//! Thin shell over `api-session`:
//! 1. Loads configuration and the saved session
//! 2. Runs one command through the session client
//! 3. Prints the JSON response on stdout
//!
//! Logs go to stderr as JSON so stdout stays machine-readable.

mod cli;
mod config;
mod error;
mod metrics;

use std::path::Path;

use anyhow::{Context, Result};
use api_session::{LoginOutcome, LoginRequest, LogoutReason, SessionClient, UploadPart};
use serde_json::{Value, json};
use tracing::{info, warn};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::Config;

/// Exit code when the account's subscription has lapsed.
const EXIT_SUBSCRIPTION_EXPIRED: i32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let prometheus = if cli.metrics {
        Some(metrics::install_recorder()?)
    } else {
        None
    };

    let config_path = Config::resolve_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        base_url = %config.api.base_url,
        session_path = %config.storage.session_path.display(),
        "configuration loaded"
    );

    let client = SessionClient::builder(config.session_config())
        .persistence(config.persistence())
        .build()
        .context("failed to build API client")?;
    client.on_unauthorized(|reason: &LogoutReason| {
        warn!(reason = reason.label(), "session ended, log in again");
    });
    client
        .restore()
        .await
        .context("failed to load saved session")?;

    let result = run(&client, cli.command).await;

    if let Some(handle) = prometheus {
        eprint!("{}", handle.render());
    }

    let code = result?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Run one command and return the process exit code.
async fn run(client: &SessionClient, command: Command) -> Result<i32> {
    let output = match command {
        Command::Login { email } => {
            let password = std::env::var("BOOKING_ADMIN_PASSWORD")
                .map_err(|_| error::Error::MissingPassword)?;
            match client.login(&LoginRequest::new(email, password)).await? {
                LoginOutcome::Authenticated { user, .. } => user,
                LoginOutcome::SubscriptionExpired { end_date, message } => {
                    eprintln!("{message}");
                    match end_date {
                        Some(date) => eprintln!("Subscription ended on {date}. Renew to continue."),
                        None => eprintln!("Renew your subscription to continue."),
                    }
                    return Ok(EXIT_SUBSCRIPTION_EXPIRED);
                }
            }
        }
        Command::Logout => {
            let notify = client.logout().await;
            // Best effort; a failed notification is already logged
            let _ = notify.await;
            return Ok(0);
        }
        Command::Whoami => {
            let authenticated = client.is_authenticated().await;
            let user_id = client.user_id().await;
            let user = client.persisted_user().await?;
            json!({ "authenticated": authenticated, "userId": user_id, "user": user })
        }
        Command::Get { path } => client.get(&path).await?,
        Command::Post { path, body } => client.post(&path, &body).await?,
        Command::Put { path, body } => client.put(&path, &body).await?,
        Command::Patch { path, body } => client.patch(&path, &body).await?,
        Command::Delete { path } => client.delete(&path).await?,
        Command::Upload { path, field, file } => {
            let part = read_upload(&field, &file).await?;
            client.upload(&path, vec![part]).await?
        }
    };

    print_json(&output)?;
    Ok(0)
}

async fn read_upload(field: &str, file: &Path) -> Result<UploadPart> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_owned());
    Ok(UploadPart::file(field, file_name, data))
}

fn print_json(value: &Value) -> Result<()> {
    if value.is_null() {
        return Ok(());
    }
    let rendered = serde_json::to_string_pretty(value).context("failed to render response")?;
    println!("{rendered}");
    Ok(())
}
