use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::error::{ConnectionError, Result};

/// Final response of a logical request
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,

    /// URL of the last hop
    pub url: Url,

    pub headers: HeaderMap,

    /// Buffered body; empty when a ready-read hook consumed the stream
    pub body: Bytes,
}

impl Reply {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ConnectionError::Internal(
                anyhow::Error::new(e).context(format!("Failed to decode response from {}", self.url)),
            )
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
