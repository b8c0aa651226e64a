//! Delivery state machine.
//!
//! Outbound messages are stored as `sent`, transmitted (or queued in the
//! outbox while offline), and moved forward by `ack_delivered` / `ack_seen`
//! frames from the recipient. The store holds the authoritative status and
//! never moves it backwards; stale, duplicate and unknown acks are ignored.
//! A message the link failed to write goes back into the outbox.
//!
//! Inbound messages are stored, announced with `message_received`, and
//! acknowledged: `ack_delivered` right away, `ack_seen` once the chat is
//! open and the local user is not invisible.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use courier_net::{
    ConnectionManager, DeliveryTimeout, Dispatcher, Event, EventKind, SendFailure, StatusChange,
    Subscription,
};
use courier_shared::protocol::{AckPayload, ChatMessagePayload, Frame, ReactionPayload};
use courier_shared::types::{ChatId, MessageContent, MessageId, MessageStatus, UserId, Visibility};
use courier_store::{ChatStore, Direction, Message, NewChat, StoreError, ViewOutcome};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::presence::PresenceTracker;

#[derive(Debug, Default)]
struct State {
    /// Messages waiting for a link, oldest first.
    outbox: VecDeque<ChatMessagePayload>,
    flushing: bool,
    /// Transmitted messages waiting for their first ack, only kept while an
    /// ack timeout is configured. Entries leave on ack or when the timeout
    /// fires.
    awaiting_ack: HashMap<MessageId, ChatId>,
    /// Inbound messages per chat still owed an `ack_seen`.
    unseen: HashMap<ChatId, Vec<MessageId>>,
    blocked: HashSet<UserId>,
}

struct Inner {
    me: UserId,
    store: Arc<dyn ChatStore>,
    connection: ConnectionManager,
    presence: Arc<PresenceTracker>,
    ack_timeout: Option<Duration>,
    encrypt: bool,
    state: Mutex<State>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: Event) {
        self.connection.dispatcher().emit(&event);
    }
}

/// Cheaply cloneable handle; clones share state.
#[derive(Clone)]
pub struct DeliveryEngine {
    inner: Arc<Inner>,
}

impl DeliveryEngine {
    pub fn new(
        config: &ClientConfig,
        me: UserId,
        store: Arc<dyn ChatStore>,
        connection: ConnectionManager,
        presence: Arc<PresenceTracker>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                me,
                store,
                connection,
                presence,
                ack_timeout: config.ack_timeout,
                encrypt: config.encrypt_messages,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Register the engine's handlers. The caller owns the returned
    /// subscriptions and must unsubscribe them to detach the engine.
    pub fn attach(&self, dispatcher: &Dispatcher) -> Vec<Subscription> {
        let on_connected = self.clone();
        let on_delivered = self.clone();
        let on_seen = self.clone();
        let on_message = self.clone();
        let on_reaction = self.clone();
        let on_send_failed = self.clone();

        vec![
            dispatcher.subscribe(EventKind::Connected, move |_| {
                on_connected.flush_outbox();
                Ok(())
            }),
            dispatcher.subscribe(EventKind::AckDelivered, move |event| {
                if let Event::AckDelivered(ack) = event {
                    on_delivered.on_ack(ack, MessageStatus::Delivered);
                }
                Ok(())
            }),
            dispatcher.subscribe(EventKind::AckSeen, move |event| {
                if let Event::AckSeen(ack) = event {
                    on_seen.on_ack(ack, MessageStatus::Seen);
                }
                Ok(())
            }),
            dispatcher.subscribe(EventKind::Message, move |event| {
                if let Event::Message(payload) = event {
                    on_message.on_message(payload);
                }
                Ok(())
            }),
            dispatcher.subscribe(EventKind::Reaction, move |event| {
                if let Event::Reaction(payload) = event {
                    on_reaction.on_reaction(payload);
                }
                Ok(())
            }),
            dispatcher.subscribe(EventKind::SendFailed, move |event| {
                if let Event::SendFailed(failure) = event {
                    on_send_failed.on_send_failed(failure);
                }
                Ok(())
            }),
        ]
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Store a new outbound message as `sent` and transmit it, or queue it
    /// behind older unsent messages when the link is down.
    pub fn send(
        &self,
        chat_id: ChatId,
        content: MessageContent,
        visibility: Visibility,
    ) -> Result<Message, ClientError> {
        let inner = &self.inner;
        let message = Message::outbound(chat_id, inner.me.clone(), content, visibility, inner.encrypt);
        inner.store.append_message(message.clone())?;
        let payload = message.to_payload();

        let transmit_now = {
            let mut state = inner.lock();
            let must_queue =
                state.flushing || !state.outbox.is_empty() || !inner.connection.is_connected();
            if must_queue {
                state.outbox.push_back(payload.clone());
            }
            !must_queue
        };

        if !transmit_now {
            debug!(chat = %chat_id, message = %message.id, "Message queued in outbox");
        } else if !self.transmit(&payload) {
            self.inner.lock().outbox.push_back(payload);
        }
        Ok(message)
    }

    fn transmit(&self, payload: &ChatMessagePayload) -> bool {
        let sent = self.inner.connection.send(&Frame::Message(payload.clone()));
        if sent {
            self.arm_ack_timeout(payload.chat_id, payload.id);
        }
        sent
    }

    /// Transmit queued messages in creation order. Stops at the first frame
    /// the link refuses; the rest stay queued. Also sends read receipts still
    /// owed for the active chat.
    pub fn flush_outbox(&self) -> usize {
        {
            let mut state = self.inner.lock();
            if state.flushing {
                return 0;
            }
            state.flushing = true;
        }

        let mut flushed = 0;
        loop {
            let next = {
                let mut state = self.inner.lock();
                match state.outbox.pop_front() {
                    Some(payload) => payload,
                    None => {
                        state.flushing = false;
                        break;
                    }
                }
            };
            if self.transmit(&next) {
                flushed += 1;
            } else {
                let mut state = self.inner.lock();
                state.outbox.push_front(next);
                state.flushing = false;
                break;
            }
        }

        if flushed > 0 {
            info!(flushed, "Outbox flushed");
        }
        if let Some(chat) = self.inner.store.active_chat() {
            self.mark_chat_seen(chat);
        }
        flushed
    }

    fn arm_ack_timeout(&self, chat_id: ChatId, message_id: MessageId) {
        let Some(timeout) = self.inner.ack_timeout else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime, ack timeout not armed");
            return;
        };
        self.inner.lock().awaiting_ack.insert(message_id, chat_id);

        let weak = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let unacked = inner.lock().awaiting_ack.remove(&message_id).is_some();
            if unacked {
                warn!(message = %message_id, waited_ms = timeout.as_millis() as u64, "No delivery ack");
                inner.emit(Event::DeliveryTimeout(DeliveryTimeout {
                    chat_id,
                    message_id,
                    waited: timeout,
                }));
            }
        });
    }

    /// Advance one of our messages on an ack from the recipient.
    pub fn on_ack(&self, ack: &AckPayload, status: MessageStatus) -> bool {
        let inner = &self.inner;
        let ours = inner.store.chat(ack.chat_id).is_ok_and(|chat| {
            chat.message(ack.message_id)
                .is_some_and(|m| m.direction == Direction::Outbound)
        });
        if !ours {
            debug!(message = %ack.message_id, "Ack for unknown message ignored");
            return false;
        }

        match inner
            .store
            .update_message_status(ack.chat_id, ack.message_id, status)
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(message = %ack.message_id, ack = status.as_str(), "Non-advancing ack ignored");
                return false;
            }
            Err(e) => {
                debug!(message = %ack.message_id, error = %e, "Ack for vanished message ignored");
                return false;
            }
        }
        inner.lock().awaiting_ack.remove(&ack.message_id);

        debug!(message = %ack.message_id, status = status.as_str(), "Message status advanced");
        inner.emit(Event::StatusChanged(StatusChange {
            chat_id: ack.chat_id,
            message_id: ack.message_id,
            status,
        }));
        true
    }

    /// Put a message the link could not write back into the outbox, in
    /// creation order, so the next `connected` flush sends it.
    pub fn on_send_failed(&self, failure: &SendFailure) -> bool {
        let payload = match Frame::parse(&failure.text) {
            Ok(Frame::Message(payload)) => payload,
            Ok(_) => {
                debug!(frame_type = %failure.frame_type, "Unwritten frame not retried");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Unwritten frame could not be decoded");
                return false;
            }
        };

        let inner = &self.inner;
        let still_sent = inner.store.chat(payload.chat_id).is_ok_and(|chat| {
            chat.message(payload.id)
                .is_some_and(|m| m.status == MessageStatus::Sent)
        });
        if !still_sent {
            return false;
        }

        let mut state = inner.lock();
        state.awaiting_ack.remove(&payload.id);
        if state.outbox.iter().any(|p| p.id == payload.id) {
            return false;
        }
        let at = state
            .outbox
            .iter()
            .position(|p| p.created_at > payload.created_at)
            .unwrap_or(state.outbox.len());
        info!(message = %payload.id, "Unwritten message queued again");
        state.outbox.insert(at, payload);
        true
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Store a message relayed from another participant and acknowledge it.
    pub fn on_message(&self, payload: &ChatMessagePayload) {
        let inner = &self.inner;
        if payload.sender_id == inner.me {
            debug!(message = %payload.id, "Ignoring echo of own message");
            return;
        }
        if self.is_blocked(&payload.sender_id) {
            debug!(sender = %payload.sender_id.short(), "Dropping message from blocked user");
            return;
        }

        if let Err(StoreError::ChatNotFound(_)) = inner.store.chat(payload.chat_id) {
            let new = NewChat::dm(payload.sender_id.clone(), inner.me.clone()).with_id(payload.chat_id);
            match inner.store.create_chat(new) {
                Ok(_) | Err(StoreError::ChatExists(_)) => {}
                Err(e) => {
                    warn!(error = %e, "Could not create chat for inbound message");
                    return;
                }
            }
        }

        let appended = match inner.store.append_message(Message::inbound(payload)) {
            Ok(appended) => appended,
            Err(e) => {
                warn!(chat = %payload.chat_id, error = %e, "Dropping inbound message");
                return;
            }
        };

        // Re-acknowledge duplicates too: the sender may have missed the first ack.
        inner
            .connection
            .send(&Frame::AckDelivered(self.ack_for(payload.chat_id, payload.id)));
        if !appended {
            debug!(message = %payload.id, "Duplicate inbound message");
            return;
        }

        inner.emit(Event::MessageReceived(payload.clone()));

        if inner.store.active_chat() == Some(payload.chat_id) {
            if inner.presence.receipts_allowed(&inner.me) {
                inner
                    .connection
                    .send(&Frame::AckSeen(self.ack_for(payload.chat_id, payload.id)));
            }
        } else {
            inner
                .lock()
                .unseen
                .entry(payload.chat_id)
                .or_default()
                .push(payload.id);
        }
    }

    /// Send the read receipts owed for `chat`. While invisible the receipts
    /// are dropped, not deferred. Returns how many were sent.
    pub fn mark_chat_seen(&self, chat: ChatId) -> usize {
        let inner = &self.inner;
        if !inner.presence.receipts_allowed(&inner.me) {
            if let Some(dropped) = inner.lock().unseen.remove(&chat) {
                debug!(chat = %chat, dropped = dropped.len(), "Read receipts suppressed");
            }
            return 0;
        }
        if !inner.connection.is_connected() {
            return 0;
        }

        let owed = inner.lock().unseen.remove(&chat).unwrap_or_default();
        for id in &owed {
            inner.connection.send(&Frame::AckSeen(self.ack_for(chat, *id)));
        }
        owed.len()
    }

    fn ack_for(&self, chat_id: ChatId, message_id: MessageId) -> AckPayload {
        AckPayload {
            message_id,
            chat_id,
            user_id: self.inner.me.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Reactions, views, history
    // -----------------------------------------------------------------------

    /// Add or withdraw the local user's reaction and tell the other side.
    pub fn react(
        &self,
        chat: ChatId,
        message: MessageId,
        emoji: &str,
        added: bool,
    ) -> Result<bool, ClientError> {
        let inner = &self.inner;
        let changed = if added {
            inner.store.add_reaction(chat, message, emoji, &inner.me)?
        } else {
            inner.store.remove_reaction(chat, message, emoji, &inner.me)?
        };
        if changed {
            inner.connection.send(&Frame::Reaction(ReactionPayload {
                chat_id: chat,
                message_id: message,
                user_id: inner.me.clone(),
                emoji: emoji.to_string(),
                added,
            }));
        }
        Ok(changed)
    }

    pub fn on_reaction(&self, payload: &ReactionPayload) {
        let inner = &self.inner;
        if payload.user_id == inner.me || self.is_blocked(&payload.user_id) {
            return;
        }
        let result = if payload.added {
            inner
                .store
                .add_reaction(payload.chat_id, payload.message_id, &payload.emoji, &payload.user_id)
        } else {
            inner
                .store
                .remove_reaction(payload.chat_id, payload.message_id, &payload.emoji, &payload.user_id)
        };
        if let Err(e) = result {
            debug!(error = %e, "Reaction for unknown message ignored");
        }
    }

    /// Count one local view of a message; view-limited messages disappear
    /// once their allowance is used up.
    pub fn record_view(&self, chat: ChatId, message: MessageId) -> Result<ViewOutcome, ClientError> {
        Ok(self.inner.store.record_view(chat, message)?)
    }

    /// Delete a chat's history along with anything still queued or tracked
    /// for it.
    pub fn delete_history(&self, chat: ChatId) -> Result<usize, ClientError> {
        let removed = self.inner.store.delete_history(chat)?;
        let mut state = self.inner.lock();
        state.outbox.retain(|p| p.chat_id != chat);
        state.awaiting_ack.retain(|_, c| *c != chat);
        state.unseen.remove(&chat);
        info!(chat = %chat, removed, "Chat history deleted");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Block list
    // -----------------------------------------------------------------------

    pub fn block(&self, user: UserId) {
        info!(user = %user.short(), "User blocked");
        self.inner.lock().blocked.insert(user);
    }

    pub fn unblock(&self, user: &UserId) -> bool {
        self.inner.lock().blocked.remove(user)
    }

    pub fn is_blocked(&self, user: &UserId) -> bool {
        self.inner.lock().blocked.contains(user)
    }

    pub fn outbox_len(&self) -> usize {
        self.inner.lock().outbox.len()
    }

    /// Whether a transmitted message is still inside its ack timeout window.
    pub fn awaiting_ack(&self, message: MessageId) -> bool {
        self.inner.lock().awaiting_ack.contains_key(&message)
    }
}
