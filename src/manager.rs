// Session orchestration
// Restores stored tokens, drives the login flow and keeps the logged-in user
// in sync with session events

use anyhow::Result;
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use crate::api::ApiRoutes;
use crate::auth::{
    AuthSession, LoginFlow, LoginLauncher, LoginOutcome, SessionEvent, Token, TokenStore,
};
use crate::config::Config;
use crate::http_client::build_client;
use crate::notify::Notifier;
use crate::reachability::Reachability;
use crate::transfer::{TransferCoordinator, TransferEngine};

pub struct ConnectionManager {
    session: Arc<AuthSession>,
    store: TokenStore,
    engine: TransferEngine,
    transfers: TransferCoordinator,
    login: LoginLauncher,
    routes: ApiRoutes,
    revoke_url: Url,
    notifier: Arc<dyn Notifier>,

    /// JSON profile of the current user, refreshed on every login
    logged_in_user: RwLock<Option<Value>>,
}

impl ConnectionManager {
    pub fn new(
        config: &Config,
        flow: Arc<dyn LoginFlow>,
        notifier: Arc<dyn Notifier>,
        reachability: Arc<dyn Reachability>,
    ) -> Result<Self> {
        let client = build_client(&config.http_settings())?;
        let session = Arc::new(AuthSession::new());
        let login = LoginLauncher::new(config.oauth_settings(), flow);
        let engine = TransferEngine::new(
            client,
            session.clone(),
            notifier.clone(),
            reachability,
            login.clone(),
        );

        Ok(Self {
            session,
            store: TokenStore::new(config.token_file.clone()),
            transfers: TransferCoordinator::new(engine.clone()),
            engine,
            login,
            routes: ApiRoutes::new(config.api_url.clone()),
            revoke_url: config.revoke_url.clone(),
            notifier,
            logged_in_user: RwLock::new(None),
        })
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    pub fn engine(&self) -> &TransferEngine {
        &self.engine
    }

    pub fn transfers(&self) -> &TransferCoordinator {
        &self.transfers
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn routes(&self) -> &ApiRoutes {
        &self.routes
    }

    /// Restore the stored session, or open the login flow
    pub async fn login(&self) -> LoginOutcome {
        if self.check_for_stored_token().await {
            return LoginOutcome::Restored;
        }
        self.login.show_login_window();
        LoginOutcome::Prompted
    }

    pub fn show_login_window(&self) {
        self.login.show_login_window();
    }

    /// Activate the stored token if it is unexpired and accepted by the server
    pub async fn check_for_stored_token(&self) -> bool {
        let Some(token) = self.store.load() else {
            return false;
        };

        if !token.is_valid() {
            tracing::info!("Token expired; need log-in");
            self.forget_stored_token();
            return false;
        }

        let url = match self.routes.logged_in_user() {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(error = %e, "Cannot build the user endpoint");
                return false;
            }
        };

        match self.engine.verify_token(url, &token).await {
            Ok(reply) => {
                match reply.json::<Value>() {
                    Ok(user) => *self.logged_in_user.write().await = Some(user),
                    Err(e) => tracing::warn!(error = %e, "Unreadable user profile"),
                }
                self.session.login(token);
                true
            }
            Err(e) if e.is_authentication_failure() => {
                tracing::info!("Stored token was rejected; need log-in");
                self.session.clear();
                self.forget_stored_token();
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not verify stored token");
                false
            }
        }
    }

    /// Accept the token produced by the login flow
    pub fn complete_login(&self, token: Token) {
        self.session.login(token.clone());
        if let Err(e) = self.store.save(&token) {
            tracing::error!("Failed to persist token: {:#}", e);
            self.notifier
                .error("Could not save token", &format!("{:#}", e));
        }
    }

    /// Revoke the current token and end the session
    pub async fn logout(&self) -> crate::error::Result<()> {
        let Some(access_token) = self.session.access_token() else {
            tracing::debug!("Logout requested without a session");
            return Ok(());
        };

        self.engine
            .submit_form(self.revoke_url.clone(), [("token", access_token)])
            .await?;

        self.session.logout();
        self.forget_stored_token();
        Ok(())
    }

    /// Fetch the profile of the user owning the session token
    pub async fn get_logged_in_user(&self) -> crate::error::Result<Value> {
        let reply = self.engine.fetch(self.routes.logged_in_user()?).await?;
        reply.json()
    }

    pub async fn logged_in_user(&self) -> Option<Value> {
        self.logged_in_user.read().await.clone()
    }

    pub async fn handle_login(&self) -> crate::error::Result<()> {
        let user = self.get_logged_in_user().await?;
        tracing::info!(user = %user["data"]["id"], "Logged in");
        *self.logged_in_user.write().await = Some(user);
        Ok(())
    }

    pub async fn handle_logout(&self) {
        self.session.clear();
        *self.logged_in_user.write().await = None;
    }

    /// React to session events until the manager is dropped
    pub fn spawn_event_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        let mut events = self.session.subscribe();

        tokio::spawn(async move {
            loop {
                let event = events.recv().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                match event {
                    Ok(SessionEvent::LoggedIn) => {
                        if let Err(e) = manager.handle_login().await {
                            tracing::warn!(error = %e, "Failed to load logged-in user");
                        }
                    }
                    Ok(SessionEvent::LoggedOut) => manager.handle_logout().await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Session event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn forget_stored_token(&self) {
        if let Err(e) = self.store.delete() {
            tracing::warn!("Could not remove stored token: {:#}", e);
        }
    }
}
