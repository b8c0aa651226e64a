//! Privacy commands on chats: archive, hide behind a password, close, and
//! disappearing-message policy.

use courier_shared::constants::KDF_CONTEXT_HIDDEN_CHAT;
use courier_shared::types::ChatId;
use tracing::info;

use crate::error::{Result, StoreError};
use crate::memory::MemoryStore;
use crate::models::DisappearingPolicy;

fn password_digest(password: &str) -> blake3::Hash {
    blake3::Hash::from(blake3::derive_key(
        KDF_CONTEXT_HIDDEN_CHAT,
        password.as_bytes(),
    ))
}

impl MemoryStore {
    pub fn archive_chat(&self, id: ChatId) -> Result<()> {
        self.lock().chat_mut(id)?.archived = true;
        info!(chat = %id, "Chat archived");
        Ok(())
    }

    pub fn unarchive_chat(&self, id: ChatId) -> Result<()> {
        self.lock().chat_mut(id)?.archived = false;
        info!(chat = %id, "Chat unarchived");
        Ok(())
    }

    /// Hide a chat from [`crate::ChatStore::list_chats`]. Only the password
    /// digest is kept. Hiding an already hidden chat replaces its password.
    pub fn hide_chat(&self, id: ChatId, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(StoreError::InvalidPassword);
        }
        let mut inner = self.lock();
        let chat = inner.chat_mut(id)?;
        chat.hidden = true;
        chat.hidden_digest = Some(password_digest(password).to_hex().to_string());
        info!(chat = %id, "Chat hidden");
        Ok(())
    }

    /// Reveal a hidden chat. The password must match the one it was hidden with.
    pub fn unhide_chat(&self, id: ChatId, password: &str) -> Result<()> {
        let mut inner = self.lock();
        let chat = inner.chat_mut(id)?;
        if !chat.hidden {
            return Err(StoreError::NotHidden(id));
        }

        let stored = chat
            .hidden_digest
            .as_deref()
            .and_then(|hex| blake3::Hash::from_hex(hex).ok())
            .ok_or(StoreError::InvalidPassword)?;
        // blake3::Hash equality is constant-time.
        if stored != password_digest(password) {
            return Err(StoreError::InvalidPassword);
        }

        chat.hidden = false;
        chat.hidden_digest = None;
        info!(chat = %id, "Chat unhidden");
        Ok(())
    }

    /// Hidden chats, for a UI that has unlocked them by other means.
    pub fn hidden_chat_ids(&self) -> Vec<ChatId> {
        self.lock()
            .chats
            .iter()
            .filter(|c| c.hidden)
            .map(|c| c.id)
            .collect()
    }

    pub fn close_chat(&self, id: ChatId) -> Result<()> {
        self.lock().chat_mut(id)?.closed = true;
        info!(chat = %id, "Chat closed");
        Ok(())
    }

    pub fn reopen_chat(&self, id: ChatId) -> Result<()> {
        self.lock().chat_mut(id)?.closed = false;
        info!(chat = %id, "Chat reopened");
        Ok(())
    }

    /// Applies to messages appended from now on.
    pub fn set_disappearing_policy(&self, id: ChatId, policy: DisappearingPolicy) -> Result<()> {
        self.lock().chat_mut(id)?.disappearing = policy;
        info!(chat = %id, policy = ?policy, "Disappearing policy updated");
        Ok(())
    }
}
