use thiserror::Error;

/// A frame that could not be turned into a [`crate::protocol::Frame`].
///
/// Protocol errors are never fatal: the receiving side logs them and drops
/// the frame.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid frame JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("Unknown frame type: {0}")]
    UnknownType(String),

    #[error("Invalid payload for frame type {frame_type}: {source}")]
    InvalidPayload {
        frame_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
}
