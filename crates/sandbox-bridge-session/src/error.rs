//! Session manager errors.

use tokio_tungstenite::tungstenite;

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Missing credentials or settings, or configuration never succeeded.
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Session already started")]
    AlreadyStarted,
    #[error("Transport error: {0}")]
    Transport(Box<tungstenite::Error>),
    #[error("Unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl From<tungstenite::Error> for SessionError {
    fn from(e: tungstenite::Error) -> Self {
        Self::Transport(Box::new(e))
    }
}
