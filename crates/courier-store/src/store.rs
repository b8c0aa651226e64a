use chrono::{DateTime, Utc};
use courier_shared::types::{ChatId, MessageId, MessageStatus, UserId};

use crate::error::Result;
use crate::models::{Chat, Message, NewChat, ViewOutcome};

/// Chat and message persistence as seen by the messaging core.
///
/// Implementations must be safe to share between the connection task and
/// callers; every method is a short, synchronous critical section.
pub trait ChatStore: Send + Sync {
    fn create_chat(&self, new: NewChat) -> Result<Chat>;

    fn chat(&self, id: ChatId) -> Result<Chat>;

    /// Chats that are not hidden, in creation order.
    fn list_chats(&self) -> Vec<Chat>;

    /// Append to the end of the chat's history.
    ///
    /// Returns `false` without changes when a message with the same id is
    /// already stored. Inbound messages bump the unread counter unless the
    /// chat is active.
    fn append_message(&self, message: Message) -> Result<bool>;

    /// Move a message's status forward. Returns `false` when `status` is not
    /// further along than the stored one.
    fn update_message_status(
        &self,
        chat: ChatId,
        message: MessageId,
        status: MessageStatus,
    ) -> Result<bool>;

    /// Newest first, skipping `offset` messages and returning at most `limit`.
    fn list_messages(&self, chat: ChatId, limit: usize, offset: usize) -> Result<Vec<Message>>;

    /// Remove every message of the chat. Returns how many were removed.
    fn delete_history(&self, chat: ChatId) -> Result<usize>;

    /// Select the chat the user is looking at, resetting its unread counter.
    fn set_active_chat(&self, chat: Option<ChatId>) -> Result<()>;

    fn active_chat(&self) -> Option<ChatId>;

    fn set_typing_users(&self, chat: ChatId, users: Vec<UserId>) -> Result<()>;

    /// Returns `false` if the user already reacted with this emoji.
    fn add_reaction(
        &self,
        chat: ChatId,
        message: MessageId,
        emoji: &str,
        user: &UserId,
    ) -> Result<bool>;

    fn remove_reaction(
        &self,
        chat: ChatId,
        message: MessageId,
        emoji: &str,
        user: &UserId,
    ) -> Result<bool>;

    /// Count one view of a message, removing it once a view-limited message
    /// has been opened its allowed number of times.
    fn record_view(&self, chat: ChatId, message: MessageId) -> Result<ViewOutcome>;

    /// Sum of unread counters across all chats.
    fn total_unread(&self) -> u32;

    /// Drop every message whose disappearing deadline is at or before `now`.
    /// Returns how many were removed.
    fn purge_expired(&self, now: DateTime<Utc>) -> usize;
}
