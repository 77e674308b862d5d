//! Origin client errors.

use thiserror::Error;

/// Errors raised while talking to the origin wiki.
#[derive(Debug, Error)]
pub enum OriginError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Error object returned by the API itself.
    #[error("API error {code}: {info}")]
    Api { code: String, info: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Origin unavailable: {0}")]
    Unavailable(String),
}

impl OriginError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            OriginError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            OriginError::Status { status, .. } => *status == 429 || *status >= 500,
            OriginError::Api { code, .. } => {
                matches!(code.as_str(), "maxlag" | "ratelimited" | "readonly")
            }
            OriginError::Unavailable(_) => true,
            OriginError::Decode(_) | OriginError::NotFound(_) => false,
        }
    }
}

impl From<serde_json::Error> for OriginError {
    fn from(e: serde_json::Error) -> Self {
        OriginError::Decode(e.to_string())
    }
}
