// Token persistence on disk

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::types::Token;

/// Reads, writes and deletes the persisted token file
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored token
    /// Missing, unreadable or malformed files yield `None`
    pub fn load(&self) -> Option<Token> {
        tracing::info!("Looking for token at {}", self.path.display());

        if !self.path.is_file() {
            tracing::debug!("No token file present");
            return None;
        }

        match read_token(&self.path) {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Ignoring stored token: {:#}", e);
                None
            }
        }
    }

    /// Persist the token, creating parent directories as needed
    pub fn save(&self, token: &Token) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let json = serde_json::to_vec_pretty(token).context("Failed to serialize token")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write token file: {}", self.path.display()))?;

        tracing::debug!(path = %self.path.display(), "Token saved");
        Ok(())
    }

    /// Remove the stored token; a file that is already gone is not an error
    pub fn delete(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Removed stored token");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to delete token file: {}", self.path.display())),
        }
    }
}

fn read_token(path: &Path) -> Result<Token> {
    let raw = std::fs::read(path)
        .with_context(|| format!("Failed to read token file: {}", path.display()))?;
    serde_json::from_slice(&raw).context("Failed to parse token file")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        assert!(store.load().is_none());
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = TokenStore::new(&path);
        assert!(store.load().is_none());
    }

    #[test]
    fn test_load_missing_field() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, r#"{"access_token":"abc"}"#).unwrap();

        assert!(TokenStore::new(&path).load().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("nested").join("token.json"));
        let token = Token::new("abc", 3600);

        tokio_test::assert_ok!(store.save(&token));
        assert_eq!(store.load(), Some(token));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        store.save(&Token::new("abc", 10)).unwrap();

        store.delete().unwrap();
        assert!(!store.path().exists());
        store.delete().unwrap();
    }
}
