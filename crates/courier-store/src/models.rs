//! Domain model structs held by the store.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the UI layer.

use chrono::{DateTime, TimeDelta, Utc};
use courier_shared::protocol::ChatMessagePayload;
use courier_shared::types::{
    ChatId, ChatKind, MessageContent, MessageId, MessageKind, MessageStatus, Reactions, UserId,
    Visibility,
};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Which side of the conversation wrote the message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Written by the local user.
    Outbound,
    /// Received from another participant.
    Inbound,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
    pub visibility: Visibility,
    pub encrypted: bool,
    pub direction: Direction,
    /// Times the recipient opened a view-limited message.
    pub views: u32,
    pub reactions: Reactions,
    /// Set from the chat's disappearing policy when the message is appended.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Message {
    /// A fresh outbound message in `sent` state.
    pub fn outbound(
        chat_id: ChatId,
        sender_id: UserId,
        content: MessageContent,
        visibility: Visibility,
        encrypted: bool,
    ) -> Self {
        Self {
            id: MessageId::new(),
            chat_id,
            sender_id,
            content,
            created_at: Utc::now(),
            status: MessageStatus::Sent,
            visibility,
            encrypted,
            direction: Direction::Outbound,
            views: 0,
            reactions: Reactions::new(),
            expires_at: None,
        }
    }

    /// Store form of a message relayed from another participant.
    pub fn inbound(payload: &ChatMessagePayload) -> Self {
        Self {
            id: payload.id,
            chat_id: payload.chat_id,
            sender_id: payload.sender_id.clone(),
            content: payload.content.clone(),
            created_at: payload.created_at,
            status: MessageStatus::Delivered,
            visibility: payload.visibility,
            encrypted: payload.encrypted,
            direction: Direction::Inbound,
            views: 0,
            reactions: Reactions::new(),
            expires_at: None,
        }
    }

    /// Wire form of this message.
    pub fn to_payload(&self) -> ChatMessagePayload {
        ChatMessagePayload {
            id: self.id,
            chat_id: self.chat_id,
            sender_id: self.sender_id.clone(),
            content: self.content.clone(),
            created_at: self.created_at,
            visibility: self.visibility,
            encrypted: self.encrypted,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.content.kind()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// How long new messages in a chat live. Existing messages keep the expiry
/// they were appended with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DisappearingPolicy {
    #[default]
    Off,
    After { seconds: u64 },
}

impl DisappearingPolicy {
    pub fn expiry_for(self, created_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Off => None,
            Self::After { seconds } => {
                let ttl = TimeDelta::try_seconds(i64::try_from(seconds).ok()?)?;
                created_at.checked_add_signed(ttl)
            }
        }
    }
}

/// A conversation (DM or group) and its message history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    pub kind: ChatKind,
    pub name: String,
    pub participants: Vec<UserId>,
    /// Chronological (insertion) order.
    pub messages: Vec<Message>,
    pub unread_count: u32,
    pub archived: bool,
    pub hidden: bool,
    /// Hex BLAKE3 digest of the password protecting a hidden chat.
    #[serde(skip)]
    pub(crate) hidden_digest: Option<String>,
    pub closed: bool,
    pub disappearing: DisappearingPolicy,
    pub typing_users: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub(crate) fn message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }
}

/// Parameters for [`crate::ChatStore::create_chat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChat {
    /// Use a known id (e.g. one announced by a remote participant).
    pub id: Option<ChatId>,
    pub kind: ChatKind,
    pub name: String,
    pub participants: Vec<UserId>,
}

impl NewChat {
    pub fn dm(peer: UserId, me: UserId) -> Self {
        Self {
            id: None,
            kind: ChatKind::Dm,
            name: peer.to_string(),
            participants: vec![me, peer],
        }
    }

    pub fn group(name: impl Into<String>, participants: Vec<UserId>) -> Self {
        Self {
            id: None,
            kind: ChatKind::Group,
            name: name.into(),
            participants,
        }
    }

    pub fn with_id(mut self, id: ChatId) -> Self {
        self.id = Some(id);
        self
    }
}

/// Result of recording one view of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewOutcome {
    /// The message is still available.
    Counted { views: u32 },
    /// The view limit was reached and the message was removed.
    Consumed,
}
