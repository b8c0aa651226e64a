use thiserror::Error;

/// Transport-level failures seen by callers of the connection manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Failed to open transport to {url}: {reason}")]
    Open { url: String, reason: String },

    #[error("Transport closed: {0}")]
    Closed(String),

    #[error("Connection attempt cancelled by disconnect")]
    Cancelled,

    #[error("Connection manager has shut down")]
    Shutdown,
}
