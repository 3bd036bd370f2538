use anyhow::{Context, Result};
use reqwest::{redirect, Client};
use std::time::Duration;

/// Settings for the shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Maximum idle connections kept per host
    pub max_connections: usize,

    /// Connect timeout (seconds)
    pub connect_timeout: u64,

    /// Whole-request timeout (seconds); 0 disables it for long transfers
    pub request_timeout: u64,

    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            max_connections: 20,
            connect_timeout: 30,
            request_timeout: 0,
            user_agent: format!("osf-connection/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Create the HTTP client used by the transfer engine
///
/// Redirects are not followed by reqwest: the engine chases them itself so
/// the hop limit and callbacks stay under its control.
pub fn build_client(settings: &HttpSettings) -> Result<Client> {
    let mut builder = Client::builder()
        .pool_max_idle_per_host(settings.max_connections)
        .connect_timeout(Duration::from_secs(settings.connect_timeout))
        .redirect(redirect::Policy::none())
        .user_agent(settings.user_agent.clone());

    if settings.request_timeout > 0 {
        builder = builder.timeout(Duration::from_secs(settings.request_timeout));
    }

    builder.build().context("Failed to create HTTP client")
}
