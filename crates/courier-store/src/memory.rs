use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use courier_shared::types::{ChatId, MessageId, MessageStatus, UserId};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::models::{Chat, Direction, DisappearingPolicy, Message, NewChat, ViewOutcome};
use crate::store::ChatStore;

#[derive(Debug, Default)]
pub(crate) struct Inner {
    pub(crate) chats: Vec<Chat>,
    pub(crate) active: Option<ChatId>,
}

impl Inner {
    pub(crate) fn chat(&self, id: ChatId) -> Result<&Chat> {
        self.chats
            .iter()
            .find(|c| c.id == id)
            .ok_or(StoreError::ChatNotFound(id))
    }

    pub(crate) fn chat_mut(&mut self, id: ChatId) -> Result<&mut Chat> {
        self.chats
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StoreError::ChatNotFound(id))
    }

    pub(crate) fn message_mut(&mut self, chat: ChatId, message: MessageId) -> Result<&mut Message> {
        self.chat_mut(chat)?
            .message_mut(message)
            .ok_or(StoreError::MessageNotFound { chat, message })
    }
}

/// In-memory [`ChatStore`]. One lock guards all chats, so every operation is
/// atomic with respect to the others.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChatStore for MemoryStore {
    fn create_chat(&self, new: NewChat) -> Result<Chat> {
        let mut inner = self.lock();
        let id = new.id.unwrap_or_default();
        if inner.chat(id).is_ok() {
            return Err(StoreError::ChatExists(id));
        }

        let chat = Chat {
            id,
            kind: new.kind,
            name: new.name,
            participants: new.participants,
            messages: Vec::new(),
            unread_count: 0,
            archived: false,
            hidden: false,
            hidden_digest: None,
            closed: false,
            disappearing: DisappearingPolicy::Off,
            typing_users: Vec::new(),
            created_at: Utc::now(),
        };
        inner.chats.push(chat.clone());
        debug!(chat = %id, kind = ?chat.kind, "Chat created");
        Ok(chat)
    }

    fn chat(&self, id: ChatId) -> Result<Chat> {
        self.lock().chat(id).cloned()
    }

    fn list_chats(&self) -> Vec<Chat> {
        self.lock()
            .chats
            .iter()
            .filter(|c| !c.hidden)
            .cloned()
            .collect()
    }

    fn append_message(&self, mut message: Message) -> Result<bool> {
        let mut inner = self.lock();
        let active = inner.active;
        let chat = inner.chat_mut(message.chat_id)?;

        if chat.closed {
            return Err(StoreError::ChatClosed(chat.id));
        }
        if chat.message(message.id).is_some() {
            debug!(message = %message.id, "Duplicate message ignored");
            return Ok(false);
        }

        if message.expires_at.is_none() {
            message.expires_at = chat.disappearing.expiry_for(message.created_at);
        }
        if message.direction == Direction::Inbound && active != Some(chat.id) {
            chat.unread_count += 1;
        }

        debug!(chat = %chat.id, message = %message.id, direction = ?message.direction, "Message appended");
        chat.messages.push(message);
        Ok(true)
    }

    fn update_message_status(
        &self,
        chat: ChatId,
        message: MessageId,
        status: MessageStatus,
    ) -> Result<bool> {
        let mut inner = self.lock();
        let stored = inner.message_mut(chat, message)?;
        match stored.status.advance(status) {
            Some(next) => {
                stored.status = next;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn list_messages(&self, chat: ChatId, limit: usize, offset: usize) -> Result<Vec<Message>> {
        let inner = self.lock();
        Ok(inner
            .chat(chat)?
            .messages
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn delete_history(&self, chat: ChatId) -> Result<usize> {
        let mut inner = self.lock();
        let chat = inner.chat_mut(chat)?;
        let removed = chat.messages.len();
        chat.messages.clear();
        chat.unread_count = 0;
        debug!(chat = %chat.id, removed, "History deleted");
        Ok(removed)
    }

    fn set_active_chat(&self, chat: Option<ChatId>) -> Result<()> {
        let mut inner = self.lock();
        if let Some(id) = chat {
            inner.chat_mut(id)?.unread_count = 0;
        }
        inner.active = chat;
        Ok(())
    }

    fn active_chat(&self) -> Option<ChatId> {
        self.lock().active
    }

    fn set_typing_users(&self, chat: ChatId, users: Vec<UserId>) -> Result<()> {
        self.lock().chat_mut(chat)?.typing_users = users;
        Ok(())
    }

    fn add_reaction(
        &self,
        chat: ChatId,
        message: MessageId,
        emoji: &str,
        user: &UserId,
    ) -> Result<bool> {
        let mut inner = self.lock();
        let users = inner
            .message_mut(chat, message)?
            .reactions
            .entry(emoji.to_string())
            .or_default();
        if users.contains(user) {
            return Ok(false);
        }
        users.push(user.clone());
        Ok(true)
    }

    fn remove_reaction(
        &self,
        chat: ChatId,
        message: MessageId,
        emoji: &str,
        user: &UserId,
    ) -> Result<bool> {
        let mut inner = self.lock();
        let reactions = &mut inner.message_mut(chat, message)?.reactions;
        let Some(users) = reactions.get_mut(emoji) else {
            return Ok(false);
        };
        let before = users.len();
        users.retain(|u| u != user);
        let removed = users.len() != before;
        if users.is_empty() {
            reactions.remove(emoji);
        }
        Ok(removed)
    }

    fn record_view(&self, chat: ChatId, message: MessageId) -> Result<ViewOutcome> {
        let mut inner = self.lock();
        let stored = inner.message_mut(chat, message)?;
        stored.views += 1;
        let views = stored.views;

        match stored.visibility.max_views() {
            Some(max) if views >= max => {
                inner.chat_mut(chat)?.messages.retain(|m| m.id != message);
                debug!(chat = %chat, message = %message, views, "View limit reached, message removed");
                Ok(ViewOutcome::Consumed)
            }
            _ => Ok(ViewOutcome::Counted { views }),
        }
    }

    fn total_unread(&self) -> u32 {
        self.lock().chats.iter().map(|c| c.unread_count).sum()
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.lock();
        let mut removed = 0;
        for chat in &mut inner.chats {
            let before = chat.messages.len();
            chat.messages.retain(|m| !m.is_expired(now));
            removed += before - chat.messages.len();
        }
        if removed > 0 {
            debug!(removed, "Expired messages purged");
        }
        removed
    }
}
