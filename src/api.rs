// API endpoints used by the connection layer itself

use reqwest::Url;

use crate::error::{ConnectionError, Result};

/// Base of the REST API, always ending in a slash
#[derive(Debug, Clone)]
pub struct ApiRoutes {
    base: Url,
}

impl ApiRoutes {
    pub fn new(mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { base }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Profile of the user owning the current token
    pub fn logged_in_user(&self) -> Result<Url> {
        self.endpoint("users/me/")
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base.join(path).map_err(|e| {
            ConnectionError::Validation(format!("Invalid endpoint '{}': {}", path, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logged_in_user_keeps_version_prefix() {
        let routes = ApiRoutes::new(Url::parse("https://api.osf.io/v2").unwrap());
        assert_eq!(routes.base().as_str(), "https://api.osf.io/v2/");
        assert_eq!(
            routes.logged_in_user().unwrap().as_str(),
            "https://api.osf.io/v2/users/me/"
        );
    }

    #[test]
    fn test_base_with_trailing_slash_unchanged() {
        let routes = ApiRoutes::new(Url::parse("http://127.0.0.1:1234/").unwrap());
        assert_eq!(
            routes.logged_in_user().unwrap().as_str(),
            "http://127.0.0.1:1234/users/me/"
        );
    }
}
