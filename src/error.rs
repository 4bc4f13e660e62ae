// src/error.rs
use thiserror::Error;

/// Failure taxonomy for the client. Authentication failures force a
/// sign-out and are never retried with the same token; API failures are
/// surfaced to the user and abort the current flow; transport failures are
/// handled by the connection manager's reconnect policy.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("{0}")]
    Api(String),
    #[error("Connection error: {0}")]
    Transport(String),
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Api(format!("Request failed: {}", err))
    }
}

impl AppError {
    pub fn is_auth(&self) -> bool {
        matches!(self, AppError::Auth(_))
    }
}
