//! Wire protocol: every frame is a JSON envelope `{ "type": ..., "payload": ... }`.
//!
//! The envelope is decoded in two steps. [`RawFrame`] only checks that the
//! text is an object with a string `type`; [`Frame::from_raw`] then decodes the
//! payload for the recognized types. This keeps "unknown type" and "bad
//! payload" distinguishable in logs.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::types::{CallMedia, ChatId, MessageContent, MessageId, UserId, Visibility};

/// Wire names of all recognized frame types.
pub mod frame_type {
    pub const CONNECTED: &str = "connected";
    pub const DISCONNECTED: &str = "disconnected";
    pub const ERROR: &str = "error";
    pub const MESSAGE: &str = "message";
    pub const ACK_DELIVERED: &str = "ack_delivered";
    pub const ACK_SEEN: &str = "ack_seen";
    pub const PRESENCE_UPDATE: &str = "presence_update";
    pub const TYPING: &str = "typing";
    pub const MAX_RECONNECT_ATTEMPTS_REACHED: &str = "maxReconnectAttemptsReached";
    pub const REACTION: &str = "reaction";
    pub const CALL_SIGNAL: &str = "call_signal";
    pub const HEARTBEAT: &str = "heartbeat";
}

/// The untyped envelope as it travels over the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl RawFrame {
    pub fn new(frame_type: impl Into<String>, payload: Value) -> Self {
        Self {
            frame_type: frame_type.into(),
            payload,
        }
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::InvalidJson)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Serialization)
    }
}

/// All typed frames exchanged with the real-time endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A chat message, outgoing or relayed from another participant
    Message(ChatMessagePayload),

    /// Recipient acknowledged receipt
    AckDelivered(AckPayload),

    /// Recipient opened the message
    AckSeen(AckPayload),

    /// A user's publicly visible presence
    PresenceUpdate(PresencePayload),

    /// Typing indicator
    Typing(TypingPayload),

    /// Reaction added or removed
    Reaction(ReactionPayload),

    /// Voice/video call signaling
    CallSignal(CallSignalPayload),

    /// Error notice from the endpoint
    Error(ErrorPayload),

    /// Keep-alive sent by the client while the link is open
    Heartbeat,

    /// Lifecycle name announced by the remote side. These are recognized but
    /// carry no authority: lifecycle events are produced locally.
    Lifecycle(LifecycleNotice),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleNotice {
    Connected,
    Disconnected,
    MaxReconnectAttemptsReached,
}

impl LifecycleNotice {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => frame_type::CONNECTED,
            Self::Disconnected => frame_type::DISCONNECTED,
            Self::MaxReconnectAttemptsReached => frame_type::MAX_RECONNECT_ATTEMPTS_REACHED,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub encrypted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    /// The user acknowledging (the recipient).
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub user_id: UserId,
    pub online: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    /// Set when the update is meant for one observer only (an invisible
    /// user's true state sent to an allow-listed contact). `None` is the
    /// public broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_to: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionPayload {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
    /// `false` when the reaction is withdrawn.
    #[serde(default = "default_true")]
    pub added: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CallSignalPayload {
    pub call_id: Uuid,
    pub chat_id: ChatId,
    pub sender: UserId,
    pub target: UserId,
    pub media: CallMedia,
    pub signal: SignalType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SignalType {
    /// SDP offer
    Offer(String),
    /// SDP answer
    Answer(String),
    /// ICE candidate
    IceCandidate(String),
    /// Call ended
    Hangup,
}

impl SignalType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::IceCandidate(_) => "ice_candidate",
            Self::Hangup => "hangup",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

impl Frame {
    /// Wire name of this frame's type.
    pub fn frame_type(&self) -> &'static str {
        match self {
            Self::Message(_) => frame_type::MESSAGE,
            Self::AckDelivered(_) => frame_type::ACK_DELIVERED,
            Self::AckSeen(_) => frame_type::ACK_SEEN,
            Self::PresenceUpdate(_) => frame_type::PRESENCE_UPDATE,
            Self::Typing(_) => frame_type::TYPING,
            Self::Reaction(_) => frame_type::REACTION,
            Self::CallSignal(_) => frame_type::CALL_SIGNAL,
            Self::Error(_) => frame_type::ERROR,
            Self::Heartbeat => frame_type::HEARTBEAT,
            Self::Lifecycle(notice) => notice.as_str(),
        }
    }

    /// Parse a text frame received from the transport.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Self::from_raw(RawFrame::parse(text)?)
    }

    pub fn from_raw(raw: RawFrame) -> Result<Self, ProtocolError> {
        let RawFrame {
            frame_type,
            payload,
        } = raw;

        let frame = match frame_type.as_str() {
            frame_type::MESSAGE => Self::Message(decode(&frame_type, payload)?),
            frame_type::ACK_DELIVERED => Self::AckDelivered(decode(&frame_type, payload)?),
            frame_type::ACK_SEEN => Self::AckSeen(decode(&frame_type, payload)?),
            frame_type::PRESENCE_UPDATE => Self::PresenceUpdate(decode(&frame_type, payload)?),
            frame_type::TYPING => Self::Typing(decode(&frame_type, payload)?),
            frame_type::REACTION => Self::Reaction(decode(&frame_type, payload)?),
            frame_type::CALL_SIGNAL => Self::CallSignal(decode(&frame_type, payload)?),
            frame_type::ERROR => Self::Error(decode(&frame_type, payload)?),
            frame_type::HEARTBEAT => Self::Heartbeat,
            frame_type::CONNECTED => Self::Lifecycle(LifecycleNotice::Connected),
            frame_type::DISCONNECTED => Self::Lifecycle(LifecycleNotice::Disconnected),
            frame_type::MAX_RECONNECT_ATTEMPTS_REACHED => {
                Self::Lifecycle(LifecycleNotice::MaxReconnectAttemptsReached)
            }
            _ => return Err(ProtocolError::UnknownType(frame_type)),
        };

        Ok(frame)
    }

    pub fn to_raw(&self) -> Result<RawFrame, ProtocolError> {
        let payload = match self {
            Self::Message(p) => encode(p)?,
            Self::AckDelivered(p) | Self::AckSeen(p) => encode(p)?,
            Self::PresenceUpdate(p) => encode(p)?,
            Self::Typing(p) => encode(p)?,
            Self::Reaction(p) => encode(p)?,
            Self::CallSignal(p) => encode(p)?,
            Self::Error(p) => encode(p)?,
            Self::Heartbeat | Self::Lifecycle(_) => Value::Null,
        };
        Ok(RawFrame::new(self.frame_type(), payload))
    }

    /// Serialize to the JSON text sent over the transport.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        self.to_raw()?.to_json()
    }
}

fn decode<T: DeserializeOwned>(frame_type: &str, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|source| ProtocolError::InvalidPayload {
        frame_type: frame_type.to_string(),
        source,
    })
}

fn encode<T: Serialize>(payload: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(payload).map_err(ProtocolError::Serialization)
}
