// Error types for event delivery

use thiserror::Error;

/// Result type alias for REST operations
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors surfaced to callers of REST operations (list, create, mark-read, unread-count).
///
/// These are never retried by the client itself.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request could not be sent or the connection failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-2xx status
    #[error("{message}")]
    Api { status: u16, message: String },

    /// Body did not match the expected schema
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Create an API error from a status code and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        ApiError::Api {
            status,
            message: message.into(),
        }
    }

    /// HTTP status carried by the error, if the backend answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Api { status, .. } => Some(*status),
            ApiError::Http(e) => e.status().map(|s| s.as_u16()),
            ApiError::Decode(_) => None,
        }
    }
}

/// Push transport failures.
///
/// Never surfaced to callers; the session maps them onto mode transitions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Server refused the push endpoint at open time
    #[error("push endpoint rejected with status {status}")]
    Rejected { status: u16 },

    /// Response was not an event stream, push is not available here
    #[error("push unsupported: {0}")]
    Unsupported(String),

    /// Connection could not be established
    #[error("connect failed: {0}")]
    Connect(String),

    /// Stream failed after it was opened
    #[error("stream error: {0}")]
    Stream(String),

    /// Server ended the stream
    #[error("stream closed by server")]
    Closed,
}

impl TransportError {
    /// True when the push mechanism itself is unavailable, as opposed to a
    /// transient connection problem.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, TransportError::Unsupported(_))
    }
}

/// Invalid configuration values
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{0} must not be empty")]
    Empty(&'static str),
}
