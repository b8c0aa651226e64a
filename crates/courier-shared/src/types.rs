use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// User identity is opaque: it comes from the authentication collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ChatId(pub Uuid);

impl ChatId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Dm,
    Group,
}

/// Delivery status as perceived by the sender.
///
/// Variants are ordered by lifecycle stage, so `a < b` means `b` is further
/// along than `a`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Seen,
}

impl MessageStatus {
    /// Returns `Some(next)` when `next` is strictly further along than `self`.
    pub fn advance(self, next: MessageStatus) -> Option<MessageStatus> {
        (next > self).then_some(next)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Seen => "seen",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Forever,
    ViewOnce,
    ViewTwice,
}

impl Visibility {
    /// How many times a recipient may open the message, `None` for unlimited.
    pub fn max_views(self) -> Option<u32> {
        match self {
            Self::Forever => None,
            Self::ViewOnce => Some(1),
            Self::ViewTwice => Some(2),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Voice,
    Sticker,
    Poll,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollOption {
    pub text: String,
    pub votes: u32,
}

/// Message body. The `kind` tag on the wire doubles as the message type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    Image {
        url: String,
        #[serde(default)]
        caption: Option<String>,
    },
    Voice {
        url: String,
        duration_secs: u32,
    },
    Sticker {
        sticker_id: String,
        url: String,
    },
    Poll {
        question: String,
        options: Vec<PollOption>,
    },
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text { .. } => MessageKind::Text,
            Self::Image { .. } => MessageKind::Image,
            Self::Voice { .. } => MessageKind::Voice,
            Self::Sticker { .. } => MessageKind::Sticker,
            Self::Poll { .. } => MessageKind::Poll,
        }
    }

    /// Searchable text of the message, if it has any.
    pub fn searchable_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Image { caption, .. } => caption.as_deref(),
            Self::Poll { question, .. } => Some(question),
            Self::Voice { .. } | Self::Sticker { .. } => None,
        }
    }
}

/// Emoji → users who reacted with it.
pub type Reactions = BTreeMap<String, Vec<UserId>>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CallMedia {
    Voice,
    Video,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_only_advances() {
        assert_eq!(
            MessageStatus::Sent.advance(MessageStatus::Delivered),
            Some(MessageStatus::Delivered)
        );
        assert_eq!(
            MessageStatus::Sent.advance(MessageStatus::Seen),
            Some(MessageStatus::Seen)
        );
        assert_eq!(MessageStatus::Seen.advance(MessageStatus::Delivered), None);
        assert_eq!(MessageStatus::Delivered.advance(MessageStatus::Delivered), None);
    }

    #[test]
    fn test_content_kind_tag_on_wire() {
        let content = MessageContent::text("hi");
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["text"], "hi");
        assert_eq!(content.kind(), MessageKind::Text);
    }

    #[test]
    fn test_visibility_view_limits() {
        assert_eq!(Visibility::Forever.max_views(), None);
        assert_eq!(Visibility::ViewOnce.max_views(), Some(1));
        assert_eq!(Visibility::ViewTwice.max_views(), Some(2));
        assert_eq!(
            serde_json::to_string(&Visibility::ViewTwice).unwrap(),
            "\"view_twice\""
        );
    }

    #[test]
    fn test_user_id_short() {
        assert_eq!(UserId::new("user_current_1234").short(), "user_cur");
        assert_eq!(UserId::new("bob").short(), "bob");
    }
}
