// Interactive login hand-off

use anyhow::{Context, Result};
use reqwest::Url;
use std::sync::Arc;

/// OAuth2 client settings used to build the authorization URL
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub authorize_url: Url,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
}

impl OAuthSettings {
    /// Build the authorization-code URL and the random state it carries
    pub fn authorization_url(&self) -> (Url, String) {
        let state = uuid::Uuid::new_v4().simple().to_string();
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", &self.scope)
            .append_pair("state", &state);
        (url, state)
    }
}

/// The interactive login UI
///
/// Receives the authorization URL and, once the user finishes, reports the
/// resulting token through `ConnectionManager::complete_login`. A user who
/// abandons the flow simply never reports back.
pub trait LoginFlow: Send + Sync {
    fn show(&self, authorization_url: &Url);
}

/// Opens the login flow with a freshly generated authorization URL
#[derive(Clone)]
pub struct LoginLauncher {
    settings: OAuthSettings,
    flow: Arc<dyn LoginFlow>,
}

impl LoginLauncher {
    pub fn new(settings: OAuthSettings, flow: Arc<dyn LoginFlow>) -> Self {
        Self { settings, flow }
    }

    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    pub fn show_login_window(&self) {
        let (url, _state) = self.settings.authorization_url();
        tracing::info!("Showing login window");
        tracing::debug!(url = %url, "Authorization URL");
        self.flow.show(&url);
    }
}

/// Parse a URL setting, naming the setting in the error
pub fn parse_url(name: &str, value: &str) -> Result<Url> {
    Url::parse(value).with_context(|| format!("{} is not a valid URL: {}", name, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn settings() -> OAuthSettings {
        OAuthSettings {
            authorize_url: Url::parse("https://accounts.osf.io/oauth2/authorize").unwrap(),
            client_id: "client-1".to_string(),
            redirect_uri: "https://example.org/callback".to_string(),
            scope: "osf.full_write".to_string(),
        }
    }

    #[derive(Default)]
    struct RecordingFlow {
        shown: Mutex<Vec<Url>>,
    }

    impl LoginFlow for RecordingFlow {
        fn show(&self, authorization_url: &Url) {
            self.shown.lock().unwrap().push(authorization_url.clone());
        }
    }

    #[test]
    fn test_authorization_url_query() {
        let (url, state) = settings().authorization_url();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert_eq!(url.path(), "/oauth2/authorize");
        assert!(pairs.contains(&("response_type".to_string(), "code".to_string())));
        assert!(pairs.contains(&("client_id".to_string(), "client-1".to_string())));
        assert!(pairs.contains(&("scope".to_string(), "osf.full_write".to_string())));
        assert!(pairs.contains(&("state".to_string(), state.clone())));
        assert_eq!(state.len(), 32);
    }

    #[test]
    fn test_state_differs_per_call() {
        let (_, first) = settings().authorization_url();
        let (_, second) = settings().authorization_url();
        assert_ne!(first, second);
    }

    #[test]
    fn test_launcher_hands_url_to_flow() {
        let flow = Arc::new(RecordingFlow::default());
        let launcher = LoginLauncher::new(settings(), flow.clone());

        launcher.show_login_window();

        let shown = flow.shown.lock().unwrap();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].host_str(), Some("accounts.osf.io"));
    }

    #[test]
    fn test_parse_url_names_setting() {
        let err = parse_url("OSF_API_URL", "not a url").unwrap_err();
        assert!(err.to_string().contains("OSF_API_URL"));
    }
}
