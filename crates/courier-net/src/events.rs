use std::fmt;
use std::time::Duration;

use courier_shared::protocol::{
    AckPayload, CallSignalPayload, ChatMessagePayload, ErrorPayload, Frame, PresencePayload,
    ReactionPayload, TypingPayload,
};
use courier_shared::types::{CallMedia, ChatId, MessageId, MessageStatus, UserId};
use uuid::Uuid;

/// Names under which handlers subscribe. The string forms match the wire
/// frame types where an event originates from a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Error,
    Reconnecting,
    MaxReconnectAttemptsReached,
    Warning,
    SendFailed,
    Message,
    AckDelivered,
    AckSeen,
    PresenceUpdate,
    Typing,
    Reaction,
    CallSignal,
    StatusChanged,
    PresenceChanged,
    DeliveryTimeout,
    MessageReceived,
    CallAction,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::Reconnecting => "reconnecting",
            Self::MaxReconnectAttemptsReached => "maxReconnectAttemptsReached",
            Self::Warning => "warning",
            Self::SendFailed => "send_failed",
            Self::Message => "message",
            Self::AckDelivered => "ack_delivered",
            Self::AckSeen => "ack_seen",
            Self::PresenceUpdate => "presence_update",
            Self::Typing => "typing",
            Self::Reaction => "reaction",
            Self::CallSignal => "call_signal",
            Self::StatusChanged => "status_changed",
            Self::PresenceChanged => "presence_changed",
            Self::DeliveryTimeout => "delivery_timeout",
            Self::MessageReceived => "message_received",
            Self::CallAction => "call_action",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTimeout {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub waited: Duration,
}

/// A frame the link accepted from [`crate::ConnectionManager::send`] but
/// could not write. `text` is the encoded frame, ready to be queued again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailure {
    pub frame_type: String,
    pub text: String,
}

/// What the media layer must do after an inbound call signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallAction {
    CreateAnswer,
    SetRemoteDescription(String),
    AddIceCandidate(String),
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallUpdate {
    pub call_id: Uuid,
    pub chat_id: ChatId,
    pub peer: UserId,
    pub media: CallMedia,
    pub action: CallAction,
}

/// Everything that flows through the [`crate::Dispatcher`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // Connection lifecycle, produced by the connection manager.
    Connected,
    Disconnected { reason: Option<String> },
    Error(ErrorPayload),
    Reconnecting { attempt: u32, delay: Duration },
    MaxReconnectAttemptsReached { attempts: u32 },
    Warning { message: String },
    SendFailed(SendFailure),

    // Inbound frames.
    Message(ChatMessagePayload),
    AckDelivered(AckPayload),
    AckSeen(AckPayload),
    PresenceUpdate(PresencePayload),
    Typing(TypingPayload),
    Reaction(ReactionPayload),
    CallSignal(CallSignalPayload),

    // Local state changes, produced by the client components.
    StatusChanged(StatusChange),
    PresenceChanged(PresencePayload),
    DeliveryTimeout(DeliveryTimeout),
    MessageReceived(ChatMessagePayload),
    CallAction(CallUpdate),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::Error(_) => EventKind::Error,
            Self::Reconnecting { .. } => EventKind::Reconnecting,
            Self::MaxReconnectAttemptsReached { .. } => EventKind::MaxReconnectAttemptsReached,
            Self::Warning { .. } => EventKind::Warning,
            Self::SendFailed(_) => EventKind::SendFailed,
            Self::Message(_) => EventKind::Message,
            Self::AckDelivered(_) => EventKind::AckDelivered,
            Self::AckSeen(_) => EventKind::AckSeen,
            Self::PresenceUpdate(_) => EventKind::PresenceUpdate,
            Self::Typing(_) => EventKind::Typing,
            Self::Reaction(_) => EventKind::Reaction,
            Self::CallSignal(_) => EventKind::CallSignal,
            Self::StatusChanged(_) => EventKind::StatusChanged,
            Self::PresenceChanged(_) => EventKind::PresenceChanged,
            Self::DeliveryTimeout(_) => EventKind::DeliveryTimeout,
            Self::MessageReceived(_) => EventKind::MessageReceived,
            Self::CallAction(_) => EventKind::CallAction,
        }
    }

    /// Map an inbound frame to the event it raises. Lifecycle names sent by
    /// the remote side and heartbeats raise nothing.
    pub fn from_frame(frame: Frame) -> Option<Self> {
        let event = match frame {
            Frame::Message(p) => Self::Message(p),
            Frame::AckDelivered(p) => Self::AckDelivered(p),
            Frame::AckSeen(p) => Self::AckSeen(p),
            Frame::PresenceUpdate(p) => Self::PresenceUpdate(p),
            Frame::Typing(p) => Self::Typing(p),
            Frame::Reaction(p) => Self::Reaction(p),
            Frame::CallSignal(p) => Self::CallSignal(p),
            Frame::Error(p) => Self::Error(p),
            Frame::Heartbeat | Frame::Lifecycle(_) => return None,
        };
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_shared::protocol::LifecycleNotice;

    #[test]
    fn test_frame_events_use_wire_names() {
        let event = Event::from_frame(Frame::Error(ErrorPayload {
            code: None,
            message: "rate limited".into(),
        }))
        .unwrap();
        assert_eq!(event.kind(), EventKind::Error);
        assert_eq!(EventKind::AckDelivered.as_str(), "ack_delivered");
        assert_eq!(
            EventKind::MaxReconnectAttemptsReached.to_string(),
            "maxReconnectAttemptsReached"
        );
    }

    #[test]
    fn test_remote_lifecycle_raises_nothing() {
        assert!(Event::from_frame(Frame::Lifecycle(LifecycleNotice::Connected)).is_none());
        assert!(Event::from_frame(Frame::Heartbeat).is_none());
    }
}
