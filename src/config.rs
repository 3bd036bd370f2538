use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{Confirm, Input};
use reqwest::Url;
use std::io::Write;
use std::path::PathBuf;

use crate::auth::{parse_url, OAuthSettings};
use crate::http_client::HttpSettings;

/// OSF connection client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the OSF REST API
    #[arg(long, env = "OSF_API_URL", default_value = "https://api.osf.io/v2/")]
    pub api_url: String,

    /// OAuth2 authorization endpoint
    #[arg(
        long,
        env = "OSF_AUTHORIZE_URL",
        default_value = "https://accounts.osf.io/oauth2/authorize"
    )]
    pub authorize_url: String,

    /// OAuth2 token revocation endpoint
    #[arg(
        long,
        env = "OSF_REVOKE_URL",
        default_value = "https://accounts.osf.io/oauth2/revoke"
    )]
    pub revoke_url: String,

    /// OAuth2 client id of this application
    #[arg(short = 'c', long, env = "OSF_CLIENT_ID", default_value = "")]
    pub client_id: String,

    /// Redirect URI registered for the client
    #[arg(
        long,
        env = "OSF_REDIRECT_URI",
        default_value = "https://www.getpostman.com/oauth2/callback"
    )]
    pub redirect_uri: String,

    /// Requested OAuth2 scope
    #[arg(long, env = "OSF_SCOPE", default_value = "osf.full_write")]
    pub scope: String,

    /// Where the token is persisted between runs
    #[arg(short = 't', long, env = "OSF_TOKEN_FILE", default_value = "token.json")]
    pub token_file: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "30")]
    pub connect_timeout: u64,

    /// HTTP request timeout in seconds (0 = no limit)
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "0")]
    pub http_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Restore the stored session or start the login flow
    Login,
    /// Revoke the token and forget it
    Logout,
    /// Show the logged-in user
    Whoami,
    /// Download a file
    Download { url: String, dest: PathBuf },
    /// Upload a file
    Upload { url: String, source: PathBuf },
}

#[derive(Clone, Debug)]
pub struct Config {
    // Endpoints
    pub api_url: Url,
    pub authorize_url: Url,
    pub revoke_url: Url,

    // OAuth2 client
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,

    // Persistence
    pub token_file: PathBuf,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<(Self, Command)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let command = args.command.clone();
        Ok((Self::from_args(args)?, command))
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        Ok(Config {
            api_url: parse_url("OSF_API_URL", &args.api_url)?,
            authorize_url: parse_url("OSF_AUTHORIZE_URL", &args.authorize_url)?,
            revoke_url: parse_url("OSF_REVOKE_URL", &args.revoke_url)?,

            client_id: args.client_id,
            redirect_uri: args.redirect_uri,
            scope: args.scope,

            token_file: expand_tilde(&args.token_file),

            http_max_connections: std::env::var("HTTP_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),
            http_connect_timeout: args.connect_timeout,
            http_request_timeout: args.http_timeout,

            log_level: args.log_level,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("OSF_API_URL", &self.api_url),
            ("OSF_AUTHORIZE_URL", &self.authorize_url),
            ("OSF_REVOKE_URL", &self.revoke_url),
        ] {
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("{} must be an http(s) URL: {}", name, url);
            }
        }

        if self.client_id.trim().is_empty() {
            anyhow::bail!("OSF_CLIENT_ID is required (use -c or set OSF_CLIENT_ID env var)");
        }

        Ok(())
    }

    pub fn oauth_settings(&self) -> OAuthSettings {
        OAuthSettings {
            authorize_url: self.authorize_url.clone(),
            client_id: self.client_id.clone(),
            redirect_uri: self.redirect_uri.clone(),
            scope: self.scope.clone(),
        }
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            max_connections: self.http_max_connections,
            connect_timeout: self.http_connect_timeout,
            request_timeout: self.http_request_timeout,
            ..HttpSettings::default()
        }
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}


// === Interactive Setup ===

/// Check if interactive setup is needed (no .env file and no client id)
pub fn needs_interactive_setup() -> bool {
    let env_file_exists = std::path::Path::new(".env").exists();
    let has_client_id = std::env::var("OSF_CLIENT_ID").is_ok_and(|v| !v.trim().is_empty());

    !env_file_exists && !has_client_id
}

/// Collect the OAuth2 client registration and optionally save it to `.env`
pub fn run_interactive_setup() -> Result<InteractiveConfig> {
    println!();
    println!("No OSF client configuration found. Let's set it up.");
    println!();

    let client_id: String = Input::new()
        .with_prompt("OAuth2 client id (OSF_CLIENT_ID)")
        .interact_text()
        .context("Failed to read OSF_CLIENT_ID")?;

    if client_id.trim().is_empty() {
        anyhow::bail!("OSF_CLIENT_ID cannot be empty");
    }

    let redirect_uri: String = Input::new()
        .with_prompt("Redirect URI registered for the client (OSF_REDIRECT_URI)")
        .default("https://www.getpostman.com/oauth2/callback".to_string())
        .interact_text()
        .context("Failed to read OSF_REDIRECT_URI")?;

    let config = InteractiveConfig {
        client_id,
        redirect_uri,
    };

    println!();
    let save_to_env = Confirm::new()
        .with_prompt("Save configuration to .env file?")
        .default(true)
        .interact()
        .context("Failed to read save confirmation")?;

    if save_to_env {
        save_env_file(&config)?;
        println!("Configuration saved to .env file");
    }

    Ok(config)
}

/// Configuration collected from interactive setup
#[derive(Debug, Clone)]
pub struct InteractiveConfig {
    pub client_id: String,
    pub redirect_uri: String,
}

fn save_env_file(config: &InteractiveConfig) -> Result<()> {
    let env_content = format!(
        r#"# OSF connection configuration
# Generated by interactive setup

OSF_CLIENT_ID={}
OSF_REDIRECT_URI={}

# Logging (trace, debug, info, warn, error)
LOG_LEVEL=info
"#,
        config.client_id, config.redirect_uri,
    );

    let mut file = std::fs::File::create(".env").context("Failed to create .env file")?;
    file.write_all(env_content.as_bytes())
        .context("Failed to write .env file")?;

    Ok(())
}
