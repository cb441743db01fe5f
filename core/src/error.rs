/// Error types for the sync engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error ({status}): {message}")]
    Http { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Realtime channel is not connected")]
    ChannelClosed,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("No active session")]
    NotAuthenticated,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Validation(String),

    #[error("Timeout error: {0}")]
    Timeout(String),
}

impl SyncError {
    /// Authentication failures escalate to session teardown.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SyncError::Unauthorized(_) | SyncError::NotAuthenticated)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
