use courier_shared::types::{ChatId, MessageId};
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Chat not found: {0}")]
    ChatNotFound(ChatId),

    #[error("Chat already exists: {0}")]
    ChatExists(ChatId),

    #[error("Message {message} not found in chat {chat}")]
    MessageNotFound { chat: ChatId, message: MessageId },

    /// Closed chats accept no new messages until reopened.
    #[error("Chat is closed: {0}")]
    ChatClosed(ChatId),

    #[error("Chat is not hidden: {0}")]
    NotHidden(ChatId),

    #[error("Invalid password")]
    InvalidPassword,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
