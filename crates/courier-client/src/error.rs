use courier_net::ConnectionError;
use courier_shared::ProtocolError;
use courier_store::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by [`crate::ChatClient`] commands.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("User is blocked: {0}")]
    Blocked(String),

    #[error("No active call: {0}")]
    NoActiveCall(Uuid),

    #[error("A call is already active in this chat")]
    CallInProgress,
}
