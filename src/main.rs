use anyhow::{Context, Result};
use dialoguer::{Input, Password};
use reqwest::Url;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;

use osf_connection::auth::{LoginFlow, LoginOutcome, Token};
use osf_connection::config::{self, Command, Config};
use osf_connection::notify::TracingNotifier;
use osf_connection::reachability::AssumeOnline;
use osf_connection::transfer::{OutcomeSlot, TransferHandle, TransferOptions};
use osf_connection::ConnectionManager;

/// Prints the authorization URL for the user to open in a browser
struct ConsoleLoginFlow;

impl LoginFlow for ConsoleLoginFlow {
    fn show(&self, authorization_url: &Url) {
        println!();
        println!("Open this URL in your browser and authorize the application:");
        println!();
        println!("  {}", authorization_url);
        println!();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Check if interactive setup is needed (no .env and no client id)
    if config::needs_interactive_setup() {
        let interactive_config = config::run_interactive_setup()?;

        // Set environment variables so Config::load() can use them
        std::env::set_var("OSF_CLIENT_ID", &interactive_config.client_id);
        std::env::set_var("OSF_REDIRECT_URI", &interactive_config.redirect_uri);
    }

    // Load configuration first (for log level)
    let (config, command) = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::debug!(api = %config.api_url, token_file = %config.token_file.display(), "Configuration loaded");

    let manager = Arc::new(ConnectionManager::new(
        &config,
        Arc::new(ConsoleLoginFlow),
        Arc::new(TracingNotifier),
        Arc::new(AssumeOnline),
    )?);

    match command {
        Command::Login => login(&manager).await,
        Command::Logout => logout(&manager).await,
        Command::Whoami => whoami(&manager).await,
        Command::Download { url, dest } => download(&manager, url, dest).await,
        Command::Upload { url, source } => upload(&manager, url, source).await,
    }
}

async fn login(manager: &ConnectionManager) -> Result<()> {
    if manager.login().await == LoginOutcome::Restored {
        println!("Already logged in");
        return print_user(manager).await;
    }

    let access_token: String = Password::new()
        .with_prompt("Paste the access token issued after authorizing")
        .allow_empty_password(true)
        .interact()
        .context("Failed to read access token")?;
    if access_token.trim().is_empty() {
        anyhow::bail!("Login abandoned");
    }

    let expires_in: i64 = Input::new()
        .with_prompt("Token lifetime in seconds")
        .default(3600)
        .interact_text()
        .context("Failed to read token lifetime")?;

    manager.complete_login(Token::new(access_token.trim(), expires_in));
    manager.handle_login().await?;
    println!("Logged in");
    print_user(manager).await
}

async fn logout(manager: &ConnectionManager) -> Result<()> {
    if !manager.check_for_stored_token().await {
        println!("Not logged in");
        return Ok(());
    }
    manager.logout().await?;
    println!("Logged out");
    Ok(())
}

async fn whoami(manager: &ConnectionManager) -> Result<()> {
    if !manager.check_for_stored_token().await {
        anyhow::bail!("Not logged in; run `osf-connection login` first");
    }
    print_user(manager).await
}

async fn print_user(manager: &ConnectionManager) -> Result<()> {
    let user = match manager.logged_in_user().await {
        Some(user) => user,
        None => manager.get_logged_in_user().await?,
    };
    let attributes = &user["data"]["attributes"];
    println!("  Id:    {}", user["data"]["id"].as_str().unwrap_or("?"));
    println!(
        "  Name:  {}",
        attributes["full_name"].as_str().unwrap_or("(unknown)")
    );
    Ok(())
}

async fn download(manager: &ConnectionManager, url: String, dest: PathBuf) -> Result<()> {
    restore_session(manager).await;

    let (on_error, rx) = OutcomeSlot::new();
    let on_finished = on_error.clone();

    let options = TransferOptions::new()
        .on_download_progress(|received, total| log_progress("Downloaded", received, total))
        .on_error(move |err| on_error.deliver(Err(err)));

    let handle = manager.transfers().download_file(url, &dest, options, (), move |reply, ()| {
        tracing::debug!(status = %reply.status, "Download reply");
        on_finished.deliver(Ok(()));
    })?;

    wait_or_abort(handle, rx).await?;
    println!("Saved {}", dest.display());
    Ok(())
}

async fn upload(manager: &ConnectionManager, url: String, source: PathBuf) -> Result<()> {
    restore_session(manager).await;

    let (on_error, rx) = OutcomeSlot::new();
    let on_finished = on_error.clone();

    let options = TransferOptions::new()
        .on_upload_progress(|sent, total| log_progress("Uploaded", sent, total))
        .on_error(move |err| on_error.deliver(Err(err)));

    let handle = manager.transfers().upload_file(url, source.clone(), options, (), move |reply, ()| {
        tracing::debug!(status = %reply.status, "Upload reply");
        on_finished.deliver(Ok(()));
    })?;

    wait_or_abort(handle, rx).await?;
    println!("Uploaded {}", source.display());
    Ok(())
}

async fn restore_session(manager: &ConnectionManager) {
    if !manager.check_for_stored_token().await {
        tracing::warn!("No valid stored token; continuing without authentication");
    }
}

fn log_progress(label: &str, done: u64, total: Option<u64>) {
    match total {
        Some(total) => tracing::debug!("{} {} of {} bytes", label, done, total),
        None => tracing::debug!("{} {} bytes", label, done),
    }
}

/// Wait for the transfer, aborting it on Ctrl+C
async fn wait_or_abort(
    handle: TransferHandle,
    mut rx: oneshot::Receiver<osf_connection::Result<()>>,
) -> Result<()> {
    tokio::select! {
        outcome = &mut rx => outcome.context("Transfer ended without reporting an outcome")??,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C signal, aborting transfer...");
            handle.abort();
            OutcomeSlot::wait(rx).await?
        }
    }
    Ok(())
}
