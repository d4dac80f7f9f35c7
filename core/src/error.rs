//! Error types for Harvest Chat Core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid message: {0}")]
    Validation(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server rejected request ({status}): {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Connection closed")]
    Closed,

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl Error {
    /// True for failures caused by input that will never succeed on retry.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// True when the server refused the caller (wrong sender, not a participant).
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Error::Api { status: 403, .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e.to_string())
    }
}
