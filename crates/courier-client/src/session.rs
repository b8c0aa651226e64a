//! One messaging session: the dispatcher, connection manager, store handle,
//! delivery engine and presence tracker of a single signed-in user, wired
//! together explicitly.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use courier_net::{
    CallUpdate, ConnectionManager, ConnectionStatus, Connector, Dispatcher, Event, EventKind,
    Subscription,
};
use courier_shared::protocol::{CallSignalPayload, Frame, SignalType, TypingPayload};
use courier_shared::types::{CallMedia, ChatId, ChatKind, MessageContent, MessageId, UserId, Visibility};
use courier_store::{Chat, ChatStore, Message, NewChat, ViewOutcome};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::calls::{CallSession, CallState};
use crate::config::ClientConfig;
use crate::delivery::DeliveryEngine;
use crate::error::ClientError;
use crate::presence::PresenceTracker;

type CallBook = Arc<Mutex<HashMap<Uuid, CallSession>>>;

fn lock_calls(calls: &CallBook) -> MutexGuard<'_, HashMap<Uuid, CallSession>> {
    calls.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client-side messaging session.
///
/// Dropping the client detaches all of its event handlers and stops the
/// purge task; the connection task stops once every handle to it is gone.
pub struct ChatClient {
    me: UserId,
    dispatcher: Dispatcher,
    connection: ConnectionManager,
    store: Arc<dyn ChatStore>,
    delivery: DeliveryEngine,
    presence: Arc<PresenceTracker>,
    calls: CallBook,
    subscriptions: Vec<Subscription>,
    purge_task: Option<JoinHandle<()>>,
}

impl ChatClient {
    /// Build a session for `me`. Must be called inside a tokio runtime; no
    /// connection is opened until [`Self::connect`].
    pub fn new(
        config: &ClientConfig,
        me: UserId,
        token: &str,
        connector: Arc<dyn Connector>,
        store: Arc<dyn ChatStore>,
    ) -> Result<Self, ClientError> {
        let dispatcher = Dispatcher::new();
        let connection =
            ConnectionManager::spawn(config.connection_config(token)?, connector, dispatcher.clone());
        let presence = Arc::new(PresenceTracker::new(dispatcher.clone()));
        let delivery = DeliveryEngine::new(
            config,
            me.clone(),
            store.clone(),
            connection.clone(),
            presence.clone(),
        );
        let calls: CallBook = Arc::default();

        let mut subscriptions = Vec::new();

        {
            let (me, presence, connection) = (me.clone(), presence.clone(), connection.clone());
            subscriptions.push(dispatcher.subscribe(EventKind::Connected, move |_| {
                presence.mark_online(&me);
                for view in presence.published_views(&me) {
                    connection.send(&Frame::PresenceUpdate(view));
                }
                Ok(())
            }));
        }
        {
            let (me, presence) = (me.clone(), presence.clone());
            subscriptions.push(dispatcher.subscribe(EventKind::Disconnected, move |_| {
                presence.mark_offline(&me);
                Ok(())
            }));
        }
        {
            let (me, presence) = (me.clone(), presence.clone());
            subscriptions.push(dispatcher.subscribe(EventKind::PresenceUpdate, move |event| {
                if let Event::PresenceUpdate(update) = event {
                    let for_us = update.visible_to.as_ref().map_or(true, |to| *to == me);
                    if update.user_id != me && for_us {
                        presence.apply_remote(update);
                    }
                }
                Ok(())
            }));
        }
        {
            let (me, store, delivery) = (me.clone(), store.clone(), delivery.clone());
            subscriptions.push(dispatcher.subscribe(EventKind::Typing, move |event| {
                if let Event::Typing(typing) = event {
                    if typing.user_id != me && !delivery.is_blocked(&typing.user_id) {
                        apply_typing(store.as_ref(), typing)?;
                    }
                }
                Ok(())
            }));
        }
        {
            let (me, calls, delivery, events) =
                (me.clone(), calls.clone(), delivery.clone(), dispatcher.clone());
            subscriptions.push(dispatcher.subscribe(EventKind::CallSignal, move |event| {
                if let Event::CallSignal(signal) = event {
                    if signal.target == me && !delivery.is_blocked(&signal.sender) {
                        if let Some(update) = apply_call_signal(&calls, signal) {
                            debug!(call = %update.call_id, action = ?update.action, "Call signal applied");
                            events.emit(&Event::CallAction(update));
                        }
                    }
                }
                Ok(())
            }));
        }
        subscriptions.extend(delivery.attach(&dispatcher));

        let purge_task = config
            .purge_interval
            .map(|period| tokio::spawn(purge_expired_every(store.clone(), period)));

        info!(user = %me.short(), "Chat session ready");

        Ok(Self {
            me,
            dispatcher,
            connection,
            store,
            delivery,
            presence,
            calls,
            subscriptions,
            purge_task,
        })
    }

    // -----------------------------------------------------------------------
    // Connection
    // -----------------------------------------------------------------------

    pub async fn connect(&self) -> Result<(), ClientError> {
        Ok(self.connection.connect().await?)
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    /// Listen to session events. Call [`Subscription::unsubscribe`] to stop.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(kind, handler)
    }

    // -----------------------------------------------------------------------
    // Chats and messages
    // -----------------------------------------------------------------------

    pub fn user_id(&self) -> &UserId {
        &self.me
    }

    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    pub fn delivery(&self) -> &DeliveryEngine {
        &self.delivery
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn create_chat(&self, new: NewChat) -> Result<Chat, ClientError> {
        Ok(self.store.create_chat(new)?)
    }

    pub fn start_dm(&self, peer: UserId) -> Result<Chat, ClientError> {
        self.create_chat(NewChat::dm(peer, self.me.clone()))
    }

    pub fn send_message(
        &self,
        chat: ChatId,
        content: MessageContent,
        visibility: Visibility,
    ) -> Result<Message, ClientError> {
        let target = self.store.chat(chat)?;
        if target.kind == ChatKind::Dm {
            if let Some(peer) = target
                .participants
                .iter()
                .find(|p| **p != self.me && self.delivery.is_blocked(p))
            {
                return Err(ClientError::Blocked(peer.to_string()));
            }
        }
        self.delivery.send(chat, content, visibility)
    }

    pub fn send_text(&self, chat: ChatId, text: &str) -> Result<Message, ClientError> {
        self.send_message(chat, MessageContent::text(text), Visibility::Forever)
    }

    /// Make `chat` the active chat: clears its unread counter and sends the
    /// read receipts owed for it.
    pub fn open_chat(&self, chat: ChatId) -> Result<(), ClientError> {
        self.store.set_active_chat(Some(chat))?;
        self.delivery.mark_chat_seen(chat);
        Ok(())
    }

    pub fn leave_chat(&self) -> Result<(), ClientError> {
        Ok(self.store.set_active_chat(None)?)
    }

    /// Returns `false` when the indicator was suppressed or not sent.
    pub fn send_typing(&self, chat: ChatId, is_typing: bool) -> bool {
        if !self.presence.typing_allowed(&self.me) {
            debug!(chat = %chat, "Typing indicator suppressed while invisible");
            return false;
        }
        self.connection.send(&Frame::Typing(TypingPayload {
            chat_id: chat,
            user_id: self.me.clone(),
            is_typing,
        }))
    }

    pub fn react(&self, chat: ChatId, message: MessageId, emoji: &str) -> Result<bool, ClientError> {
        self.delivery.react(chat, message, emoji, true)
    }

    pub fn unreact(&self, chat: ChatId, message: MessageId, emoji: &str) -> Result<bool, ClientError> {
        self.delivery.react(chat, message, emoji, false)
    }

    pub fn view_message(&self, chat: ChatId, message: MessageId) -> Result<ViewOutcome, ClientError> {
        self.delivery.record_view(chat, message)
    }

    pub fn delete_history(&self, chat: ChatId) -> Result<usize, ClientError> {
        self.delivery.delete_history(chat)
    }

    pub fn block(&self, user: UserId) {
        self.delivery.block(user);
    }

    pub fn unblock(&self, user: &UserId) -> bool {
        self.delivery.unblock(user)
    }

    // -----------------------------------------------------------------------
    // Presence
    // -----------------------------------------------------------------------

    /// Toggle invisible mode for the local user. The new public view, and
    /// the true view for each allow-listed observer, is published right away
    /// when connected; messaging is unaffected.
    pub fn set_invisible_mode(&self, enabled: bool) {
        self.presence.set_invisible_mode(&self.me, enabled);
        info!(enabled, "Invisible mode changed");
        if self.connection.is_connected() {
            for view in self.presence.published_views(&self.me) {
                self.connection.send(&Frame::PresenceUpdate(view));
            }
        }
    }

    /// Let `observer` see the local user's true presence while invisible.
    pub fn allow_presence(&self, observer: &UserId) {
        self.presence.allow(&self.me, observer);
        self.publish_to(observer);
    }

    pub fn revoke_presence(&self, observer: &UserId) {
        self.presence.revoke(&self.me, observer);
        self.publish_to(observer);
    }

    /// Tell `observer` what they now see of us. Only an invisible user's
    /// view differs per observer.
    fn publish_to(&self, observer: &UserId) {
        if self.connection.is_connected() && self.presence.is_invisible(&self.me) {
            let view = self.presence.targeted_view(observer, &self.me);
            self.connection.send(&Frame::PresenceUpdate(view));
        }
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    /// Place a call and send the SDP offer. Returns the call id.
    pub fn start_call(
        &self,
        chat: ChatId,
        peer: UserId,
        media: CallMedia,
        offer_sdp: String,
    ) -> Result<Uuid, ClientError> {
        let (call_id, frame) = {
            let mut calls = lock_calls(&self.calls);
            if calls.values().any(|c| c.chat_id == chat && c.is_active()) {
                return Err(ClientError::CallInProgress);
            }
            let mut session = CallSession::outgoing(chat, self.me.clone(), peer, media);
            let frame = session.create_offer(offer_sdp);
            let call_id = session.call_id;
            calls.insert(call_id, session);
            (call_id, frame)
        };
        self.connection.send(&frame);
        info!(call = %call_id, media = ?media, "Call started");
        Ok(call_id)
    }

    pub fn answer_call(&self, call_id: Uuid, answer_sdp: String) -> Result<(), ClientError> {
        let frame = self.with_call(call_id, |call| call.create_answer(answer_sdp))?;
        self.connection.send(&frame);
        Ok(())
    }

    pub fn send_ice_candidate(&self, call_id: Uuid, candidate: String) -> Result<(), ClientError> {
        let frame = self.with_call(call_id, |call| call.create_ice_candidate(candidate))?;
        self.connection.send(&frame);
        Ok(())
    }

    pub fn end_call(&self, call_id: Uuid) -> Result<(), ClientError> {
        let frame = self.with_call(call_id, CallSession::hangup)?;
        lock_calls(&self.calls).remove(&call_id);
        self.connection.send(&frame);
        info!(call = %call_id, "Call ended");
        Ok(())
    }

    pub fn call_state(&self, call_id: Uuid) -> Option<CallState> {
        lock_calls(&self.calls).get(&call_id).map(|c| c.state)
    }

    fn with_call<T>(
        &self,
        call_id: Uuid,
        f: impl FnOnce(&mut CallSession) -> T,
    ) -> Result<T, ClientError> {
        let mut calls = lock_calls(&self.calls);
        let call = calls
            .get_mut(&call_id)
            .ok_or(ClientError::NoActiveCall(call_id))?;
        Ok(f(call))
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        for sub in self.subscriptions.drain(..) {
            sub.unsubscribe();
        }
        if let Some(task) = self.purge_task.take() {
            task.abort();
        }
    }
}

fn apply_typing(store: &dyn ChatStore, typing: &TypingPayload) -> anyhow::Result<()> {
    let chat = store.chat(typing.chat_id)?;
    let mut users = chat.typing_users;
    users.retain(|u| *u != typing.user_id);
    if typing.is_typing {
        users.push(typing.user_id.clone());
    }
    store.set_typing_users(typing.chat_id, users)?;
    Ok(())
}

async fn purge_expired_every(store: Arc<dyn ChatStore>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let purged = store.purge_expired(Utc::now());
        if purged > 0 {
            debug!(purged, "Disappearing messages expired");
        }
    }
}

/// Route an inbound signal to its call, creating the call on an offer.
/// Closed calls are forgotten.
fn apply_call_signal(calls: &CallBook, signal: &CallSignalPayload) -> Option<CallUpdate> {
    let mut calls = lock_calls(calls);
    let call = match calls.entry(signal.call_id) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => {
            if !matches!(signal.signal, SignalType::Offer(_)) {
                debug!(call = %signal.call_id, "Signal for unknown call ignored");
                return None;
            }
            entry.insert(CallSession::incoming(signal))
        }
    };
    let action = call.handle_signal(signal);
    let update = action.map(|action| CallUpdate {
        call_id: call.call_id,
        chat_id: call.chat_id,
        peer: call.remote_user.clone(),
        media: call.media,
        action,
    });
    if !call.is_active() {
        calls.remove(&signal.call_id);
    }
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::TimeDelta;
    use courier_net::{CallAction, MemoryConnector, MemoryPeer};
    use courier_shared::protocol::PresencePayload;
    use courier_store::MemoryStore;
    use tokio::time::sleep;

    fn me() -> UserId {
        UserId::new("alice")
    }

    fn bob() -> UserId {
        UserId::new("bob")
    }

    fn quiet_config() -> ClientConfig {
        ClientConfig {
            ack_timeout: None,
            heartbeat_interval: None,
            purge_interval: None,
            ..ClientConfig::default()
        }
    }

    fn client() -> (ChatClient, MemoryConnector, Arc<MemoryStore>) {
        client_with(quiet_config())
    }

    fn client_with(config: ClientConfig) -> (ChatClient, MemoryConnector, Arc<MemoryStore>) {
        let connector = MemoryConnector::new();
        let store = Arc::new(MemoryStore::new());
        let client = ChatClient::new(
            &config,
            me(),
            "session-token",
            Arc::new(connector.clone()),
            store.clone(),
        )
        .unwrap();
        (client, connector, store)
    }

    async fn connect(client: &ChatClient, connector: &MemoryConnector) -> MemoryPeer {
        client.connect().await.unwrap();
        connector.accept().await
    }

    async fn next_presence(peer: &mut MemoryPeer) -> PresencePayload {
        loop {
            match peer.next_frame().await {
                Some(Frame::PresenceUpdate(p)) => return p,
                Some(_) => continue,
                None => panic!("link closed"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_publishes_presence_then_flushes() {
        let (client, connector, _store) = client();
        let chat = client.start_dm(bob()).unwrap();
        client.send_text(chat.id, "queued").unwrap();

        let mut peer = connect(&client, &connector).await;
        let presence = next_presence(&mut peer).await;
        assert_eq!(presence.user_id, me());
        assert!(presence.online);
        match peer.next_frame().await {
            Some(Frame::Message(m)) => assert_eq!(m.content, MessageContent::text("queued")),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invisible_mode_publishes_offline_and_mutes_typing() {
        let (client, connector, _store) = client();
        let chat = client.start_dm(bob()).unwrap();
        let mut peer = connect(&client, &connector).await;
        assert!(next_presence(&mut peer).await.online);

        client.set_invisible_mode(true);
        let public = next_presence(&mut peer).await;
        assert!(!public.online);
        assert!(public.last_seen.is_none());

        assert!(!client.send_typing(chat.id, true));
        // Messaging still works while invisible.
        client.send_text(chat.id, "psst").unwrap();
        assert!(matches!(peer.next_frame().await, Some(Frame::Message(_))));

        client.allow_presence(&bob());
        assert!(client.presence().view_for(&bob(), &me()).online);
        let targeted = next_presence(&mut peer).await;
        assert_eq!(targeted.visible_to, Some(bob()));
        assert!(targeted.online);

        client.set_invisible_mode(false);
        assert!(next_presence(&mut peer).await.online);
        assert!(client.send_typing(chat.id, true));
        assert!(matches!(peer.next_frame().await, Some(Frame::Typing(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_typing_updates_chat() {
        let (client, connector, store) = client();
        let chat = client.start_dm(bob()).unwrap();
        let peer = connect(&client, &connector).await;

        peer.push(&Frame::Typing(TypingPayload {
            chat_id: chat.id,
            user_id: bob(),
            is_typing: true,
        }));
        sleep(Duration::from_millis(10)).await;
        assert_eq!(store.chat(chat.id).unwrap().typing_users, vec![bob()]);

        peer.push(&Frame::Typing(TypingPayload {
            chat_id: chat.id,
            user_id: bob(),
            is_typing: false,
        }));
        sleep(Duration::from_millis(10)).await;
        assert!(store.chat(chat.id).unwrap().typing_users.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_presence_is_tracked() {
        let (client, connector, _store) = client();
        let peer = connect(&client, &connector).await;
        peer.push(&Frame::PresenceUpdate(PresencePayload {
            user_id: bob(),
            online: true,
            last_seen: None,
            visible_to: None,
        }));
        sleep(Duration::from_millis(10)).await;
        assert!(client.presence().public_view(&bob()).online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_allowed_observers_get_true_view_while_invisible() {
        let (client, connector, _store) = client();
        let carol = UserId::new("carol");
        client.set_invisible_mode(true);
        client.allow_presence(&bob());

        let mut peer = connect(&client, &connector).await;
        let public = next_presence(&mut peer).await;
        assert!(!public.online);
        assert_eq!(public.visible_to, None);
        let for_bob = next_presence(&mut peer).await;
        assert_eq!(for_bob.visible_to, Some(bob()));
        assert!(for_bob.online);

        client.allow_presence(&carol);
        let for_carol = next_presence(&mut peer).await;
        assert_eq!(for_carol.visible_to, Some(carol));
        assert!(for_carol.online);

        client.revoke_presence(&bob());
        let revoked = next_presence(&mut peer).await;
        assert_eq!(revoked.visible_to, Some(bob()));
        assert!(!revoked.online);
        assert!(revoked.last_seen.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_meant_for_another_observer_is_ignored() {
        let (client, connector, _store) = client();
        let peer = connect(&client, &connector).await;
        let update = |visible_to| PresencePayload {
            user_id: bob(),
            online: true,
            last_seen: None,
            visible_to,
        };

        peer.push(&Frame::PresenceUpdate(update(Some(UserId::new("carol")))));
        sleep(Duration::from_millis(10)).await;
        assert!(!client.presence().public_view(&bob()).online);

        peer.push(&Frame::PresenceUpdate(update(Some(me()))));
        sleep(Duration::from_millis(10)).await;
        assert!(client.presence().public_view(&bob()).online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incoming_call_answer_and_hangup() {
        let (client, connector, _store) = client();
        let chat = client.start_dm(bob()).unwrap();
        let mut peer = connect(&client, &connector).await;
        next_presence(&mut peer).await;

        let call_id = Uuid::new_v4();
        peer.push(&Frame::CallSignal(CallSignalPayload {
            call_id,
            chat_id: chat.id,
            sender: bob(),
            target: me(),
            media: CallMedia::Video,
            signal: SignalType::Offer("offer".into()),
        }));
        sleep(Duration::from_millis(10)).await;
        assert_eq!(client.call_state(call_id), Some(CallState::OfferReceived));

        client.answer_call(call_id, "answer".into()).unwrap();
        match peer.next_frame().await {
            Some(Frame::CallSignal(s)) => {
                assert_eq!(s.call_id, call_id);
                assert_eq!(s.signal, SignalType::Answer("answer".into()));
                assert_eq!(s.target, bob());
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        client.end_call(call_id).unwrap();
        assert!(matches!(
            peer.next_frame().await,
            Some(Frame::CallSignal(CallSignalPayload { signal: SignalType::Hangup, .. }))
        ));
        assert_eq!(client.call_state(call_id), None);
        assert!(matches!(
            client.end_call(call_id),
            Err(ClientError::NoActiveCall(id)) if id == call_id
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_incoming_signals_raise_call_actions() {
        let (client, connector, _store) = client();
        let chat = client.start_dm(bob()).unwrap();
        let peer = connect(&client, &connector).await;

        let actions = Arc::new(Mutex::new(Vec::new()));
        let seen = actions.clone();
        let _sub = client.subscribe(EventKind::CallAction, move |event| {
            if let Event::CallAction(update) = event {
                seen.lock().unwrap().push(update.clone());
            }
            Ok(())
        });

        let call_id = Uuid::new_v4();
        let frame = |signal| {
            Frame::CallSignal(CallSignalPayload {
                call_id,
                chat_id: chat.id,
                sender: bob(),
                target: me(),
                media: CallMedia::Video,
                signal,
            })
        };
        peer.push(&frame(SignalType::Offer("offer".into())));
        // An answer to an offer we never made changes nothing.
        peer.push(&frame(SignalType::Answer("bogus".into())));
        peer.push(&frame(SignalType::IceCandidate("cand-1".into())));
        peer.push(&frame(SignalType::Hangup));
        sleep(Duration::from_millis(10)).await;

        let actions = actions.lock().unwrap();
        let kinds: Vec<CallAction> = actions.iter().map(|u| u.action.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                CallAction::CreateAnswer,
                CallAction::AddIceCandidate("cand-1".into()),
                CallAction::Close,
            ]
        );
        assert_eq!(actions[0].call_id, call_id);
        assert_eq!(actions[0].chat_id, chat.id);
        assert_eq!(actions[0].peer, bob());
        assert_eq!(actions[0].media, CallMedia::Video);
        assert_eq!(client.call_state(call_id), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_outgoing_call_per_chat() {
        let (client, connector, _store) = client();
        let chat = client.start_dm(bob()).unwrap();
        let _peer = connect(&client, &connector).await;

        let call = client
            .start_call(chat.id, bob(), CallMedia::Voice, "offer".into())
            .unwrap();
        assert_eq!(client.call_state(call), Some(CallState::OfferSent));
        assert!(matches!(
            client.start_call(chat.id, bob(), CallMedia::Voice, "offer".into()),
            Err(ClientError::CallInProgress)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_chat_clears_unread_and_sends_receipts() {
        let (client, connector, store) = client();
        let chat = client.start_dm(bob()).unwrap();
        let mut peer = connect(&client, &connector).await;
        next_presence(&mut peer).await;

        peer.push(&Frame::Message(courier_shared::protocol::ChatMessagePayload {
            id: MessageId::new(),
            chat_id: chat.id,
            sender_id: bob(),
            content: MessageContent::text("hey"),
            created_at: chrono::Utc::now(),
            visibility: Visibility::Forever,
            encrypted: true,
        }));
        assert!(matches!(peer.next_frame().await, Some(Frame::AckDelivered(_))));
        assert_eq!(store.total_unread(), 1);

        client.open_chat(chat.id).unwrap();
        assert_eq!(store.total_unread(), 0);
        assert!(matches!(peer.next_frame().await, Some(Frame::AckSeen(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sending_to_blocked_peer_is_refused() {
        let (client, _connector, store) = client();
        let chat = client.start_dm(bob()).unwrap();
        client.block(bob());

        assert!(matches!(
            client.send_text(chat.id, "hello?"),
            Err(ClientError::Blocked(_))
        ));
        assert!(store.chat(chat.id).unwrap().messages.is_empty());

        client.unblock(&bob());
        assert!(client.send_text(chat.id, "hello").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_messages_are_purged_periodically() {
        let (client, _connector, store) = client_with(ClientConfig {
            purge_interval: Some(Duration::from_secs(1)),
            ..quiet_config()
        });
        let chat = client.start_dm(bob()).unwrap();
        let mut stale = Message::outbound(
            chat.id,
            me(),
            MessageContent::text("gone"),
            Visibility::Forever,
            true,
        );
        stale.expires_at = Some(Utc::now() - TimeDelta::seconds(1));
        store.append_message(stale).unwrap();
        client.send_text(chat.id, "kept").unwrap();
        assert_eq!(store.chat(chat.id).unwrap().messages.len(), 2);

        sleep(Duration::from_secs(2)).await;
        let messages = store.chat(chat.id).unwrap().messages;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, MessageContent::text("kept"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_detaches_handlers() {
        let (client, _connector, _store) = client();
        let dispatcher = client.dispatcher.clone();
        assert!(dispatcher.handler_count(EventKind::Connected) > 0);
        drop(client);
        assert_eq!(dispatcher.handler_count(EventKind::Connected), 0);
        assert_eq!(dispatcher.handler_count(EventKind::Message), 0);
    }

    #[tokio::test]
    async fn test_bad_endpoint_is_rejected() {
        let config = ClientConfig {
            ws_url: "not a url".into(),
            ..ClientConfig::default()
        };
        let result = ChatClient::new(
            &config,
            me(),
            "t",
            Arc::new(MemoryConnector::new()),
            Arc::new(MemoryStore::new()),
        );
        assert!(matches!(result, Err(ClientError::InvalidUrl(_))));
    }
}
