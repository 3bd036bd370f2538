// Error handling module
// Defines the error taxonomy shared by every transfer and the session layer

use thiserror::Error;

/// Errors that can terminate a logical request or a local transfer step
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Bad arguments, raised before any network activity
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network is down; the request was never attempted
    #[error("No network access")]
    NetworkUnreachable,

    /// The caller aborted the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// The server rejected or demanded credentials
    #[error("Authentication required: {status} - {message}")]
    AuthenticationRequired { status: u16, message: String },

    /// Non-success HTTP status
    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    /// The request failed below the HTTP layer (DNS, connect, timeout, body)
    #[error("Transport error ({kind}): {message}")]
    Transport { kind: &'static str, message: String },

    /// Redirect hop limit exceeded
    #[error("Too many redirects (limit {limit})")]
    TooManyRedirects { limit: u32 },

    /// A redirect was received for a request whose body cannot be sent again
    #[error("Cannot follow redirect of {method} request to {location}")]
    RedirectNotReplayable { method: String, location: String },

    /// Local file handling failed
    #[error("{message}")]
    LocalIo {
        title: &'static str,
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ConnectionError {
    /// Build an error from a failed reqwest call
    pub fn from_transport(err: reqwest::Error) -> Self {
        // Status-carrying errors come from error_for_status style calls
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), err.to_string());
        }

        let kind = if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "connection_failed"
        } else if err.is_request() {
            "request_error"
        } else if err.is_body() {
            "body_error"
        } else if err.is_decode() {
            "decode_error"
        } else {
            "unknown"
        };

        Self::Transport {
            kind,
            message: err.to_string(),
        }
    }

    /// Build an error from a non-success HTTP status
    pub fn from_status(status: u16, message: String) -> Self {
        if status == 401 {
            Self::AuthenticationRequired { status, message }
        } else {
            Self::Http { status, message }
        }
    }

    /// HTTP status associated with this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::AuthenticationRequired { status, .. } | Self::Http { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::AuthenticationRequired { .. })
    }

    /// Title used when the error is shown to the user
    pub fn notification_title(&self) -> String {
        match self {
            Self::NetworkUnreachable => "No network access".to_string(),
            Self::TooManyRedirects { .. } | Self::RedirectNotReplayable { .. } => {
                "Whoops, something is going wrong".to_string()
            }
            Self::LocalIo { title, .. } => title.to_string(),
            Self::Validation(_) => "Invalid request".to_string(),
            other => match other.status() {
                Some(status) => status.to_string(),
                None => "Network error".to_string(),
            },
        }
    }

    /// Description used when the error is shown to the user
    pub fn notification_description(&self) -> String {
        match self {
            Self::NetworkUnreachable => "Your network connection is down or you currently have \
                                         no Internet access."
                .to_string(),
            Self::TooManyRedirects { .. } => "Too many redirects".to_string(),
            Self::AuthenticationRequired { message, .. } | Self::Http { message, .. } => {
                message.clone()
            }
            other => other.to_string(),
        }
    }
}

/// Result type alias for connection operations
pub type Result<T> = std::result::Result<T, ConnectionError>;
