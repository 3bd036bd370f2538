// Authentication types

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// OAuth2 token as issued by the provider and persisted in the token file
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,

    /// Unix timestamp in seconds (providers may write fractional seconds)
    pub expires_at: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Remaining provider fields, kept so a saved token round-trips unchanged
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Token {
    /// Create a bearer token valid for `expires_in` seconds from now
    pub fn new(access_token: impl Into<String>, expires_in: i64) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: Utc::now().timestamp().saturating_add(expires_in) as f64,
            token_type: Some("Bearer".to_string()),
            refresh_token: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Token has not yet expired
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        let now = now.timestamp_millis() as f64 / 1000.0;
        self.expires_at > now
    }

    /// Expiration as a UTC datetime, if the timestamp is representable
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt((self.expires_at * 1000.0) as i64)
            .single()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown: String = self.access_token.chars().take(6).collect();
        f.debug_struct("Token")
            .field("access_token", &format_args!("{}...", shown))
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .finish_non_exhaustive()
    }
}

/// Session state transitions observable by the rest of the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    LoggedOut,
}

/// Result of `ConnectionManager::login`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// A stored token was accepted by the server
    Restored,
    /// The interactive login flow was shown
    Prompted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    #[test]
    fn test_token_parses_minimal_json() {
        let token: Token =
            serde_json::from_str(r#"{"access_token":"abc","expires_at":1700000000}"#).unwrap();
        assert_eq!(token.access_token, "abc");
        assert_eq!(token.expires_at, 1_700_000_000.0);
        assert!(token.extra.is_empty());
    }

    #[test]
    fn test_token_keeps_provider_fields() {
        let raw = r#"{"access_token":"abc","expires_at":1.5,"scope":["osf.full_write"],"expires_in":3600}"#;
        let token: Token = serde_json::from_str(raw).unwrap();
        assert_eq!(token.extra["expires_in"], 3600);

        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["scope"][0], "osf.full_write");
        assert!(json.get("refresh_token").is_none());
    }

    #[test]
    fn test_token_validity() {
        let token = Token::new("abc", 600);
        assert!(token.is_valid());

        let expired = Token::new("abc", -60);
        assert!(!expired.is_valid());
    }

    #[test]
    fn test_extreme_lifetimes_saturate() {
        assert!(Token::new("abc", i64::MAX).is_valid());
        assert!(!Token::new("abc", i64::MIN).is_valid());
    }

    #[test]
    fn test_debug_redacts_access_token() {
        let token = Token::new("supersecretvalue", 60);
        let shown = format!("{:?}", token);
        assert!(shown.contains("supers..."));
        assert!(!shown.contains("supersecretvalue"));
    }

    #[test]
    fn test_expires_at_utc() {
        let token = Token::new("abc", 0);
        let at = token.expires_at_utc().unwrap();
        assert!((at - Utc::now()).num_seconds().abs() <= 1);
    }

    proptest! {
        #[test]
        fn prop_validity_follows_expiry(offset in -100_000i64..100_000i64) {
            let now = Utc::now();
            let token = Token {
                access_token: "t".to_string(),
                expires_at: (now + Duration::seconds(offset)).timestamp() as f64,
                token_type: None,
                refresh_token: None,
                extra: serde_json::Map::new(),
            };
            // Whole-second timestamps: strictly in the future only when offset > 0
            let reference = DateTime::<Utc>::from_timestamp(now.timestamp(), 0).unwrap();
            prop_assert_eq!(token.is_valid_at(reference), offset > 0);
        }
    }
}
