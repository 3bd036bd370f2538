use reqwest::header::{HeaderValue, AUTHORIZATION};
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;

use super::types::{SessionEvent, Token};

/// Authorization state shared by every outgoing request
///
/// Holds at most one token. Requests read the token once, when their
/// headers are built; later changes do not affect requests already sent.
pub struct AuthSession {
    /// Current token (None = logged out)
    token: RwLock<Option<Token>>,

    /// Login/logout notifications
    events: broadcast::Sender<SessionEvent>,
}

impl AuthSession {
    /// Create an anonymous session
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            token: RwLock::new(None),
            events,
        }
    }

    /// Subscribe to login/logout events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the current token
    pub fn token(&self) -> Option<Token> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.token().map(|t| t.access_token)
    }

    /// A token is present and has not expired
    pub fn is_authorized(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Token::is_valid)
    }

    /// Install a token and announce the login
    pub fn login(&self, token: Token) {
        tracing::info!(expires_at = ?token.expires_at_utc(), "Session authenticated");
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
        self.dispatch(SessionEvent::LoggedIn);
    }

    /// Drop the in-memory token without announcing anything
    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Drop the token and announce the logout
    pub fn logout(&self) {
        let had_token = self
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        tracing::info!(had_token, "Session logged out");
        self.dispatch(SessionEvent::LoggedOut);
    }

    /// Add `Authorization: Bearer <token>` to the request
    /// Returns false when there is no valid token to add
    pub fn attach_auth_header(&self, request: &mut reqwest::Request) -> bool {
        let guard = self.token.read().unwrap_or_else(PoisonError::into_inner);
        let Some(token) = guard.as_ref().filter(|t| t.is_valid()) else {
            return false;
        };

        match bearer_header(&token.access_token) {
            Some(value) => {
                request.headers_mut().insert(AUTHORIZATION, value);
                true
            }
            None => {
                tracing::error!("Access token contains characters not allowed in a header");
                false
            }
        }
    }

    fn dispatch(&self, event: SessionEvent) {
        // No receivers is fine; nobody is listening yet
        let _ = self.events.send(event);
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a bearer credential as a sensitive header value
pub(crate) fn bearer_header(access_token: &str) -> Option<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", access_token)).ok()?;
    value.set_sensitive(true);
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::{Method, Url};

    fn request() -> reqwest::Request {
        reqwest::Request::new(Method::GET, Url::parse("https://api.osf.io/v2/").unwrap())
    }

    #[test]
    fn test_attach_without_token() {
        let session = AuthSession::new();
        let mut req = request();

        assert!(!session.attach_auth_header(&mut req));
        assert!(req.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_attach_with_token() {
        let session = AuthSession::new();
        session.login(Token::new("abc", 600));
        let mut req = request();

        assert!(session.attach_auth_header(&mut req));
        assert_eq!(req.headers()[AUTHORIZATION], "Bearer abc");
        assert!(req.headers()[AUTHORIZATION].is_sensitive());
    }

    #[test]
    fn test_expired_token_not_attached() {
        let session = AuthSession::new();
        session.login(Token::new("abc", -5));

        assert!(!session.is_authorized());
        assert!(!session.attach_auth_header(&mut request()));
    }

    #[test]
    fn test_header_captured_at_build_time() {
        let session = AuthSession::new();
        session.login(Token::new("first", 600));
        let mut req = request();
        session.attach_auth_header(&mut req);

        session.login(Token::new("second", 600));
        assert_eq!(req.headers()[AUTHORIZATION], "Bearer first");
    }

    #[tokio::test]
    async fn test_login_logout_events() {
        let session = AuthSession::new();
        let mut events = session.subscribe();

        session.login(Token::new("abc", 600));
        assert!(session.is_authorized());
        session.logout();
        assert!(!session.is_authorized());

        assert_eq!(events.recv().await.unwrap(), SessionEvent::LoggedIn);
        assert_eq!(events.recv().await.unwrap(), SessionEvent::LoggedOut);
    }

    #[test]
    fn test_clear_is_silent() {
        let session = AuthSession::new();
        session.login(Token::new("abc", 600));
        let mut events = session.subscribe();

        session.clear();
        assert!(session.token().is_none());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_repeated_logout_keeps_state_consistent() {
        let session = AuthSession::new();
        session.logout();
        session.logout();
        assert!(session.token().is_none());
    }
}
