//! Online/offline tracking with invisible mode.
//!
//! Every user has a true record and a public view. An invisible user's public
//! view is always offline with no last-seen time; only observers on the
//! user's allow-list (and the user themself) see the true record.
//! `presence_changed` is emitted only when a public view actually changes.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use courier_net::{Dispatcher, Event};
use courier_shared::protocol::PresencePayload;
use courier_shared::types::UserId;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresenceRecord {
    pub online: bool,
    pub invisible: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl PresenceRecord {
    fn public_view(&self, user: &UserId) -> PresencePayload {
        if self.invisible {
            PresencePayload {
                user_id: user.clone(),
                online: false,
                last_seen: None,
                visible_to: None,
            }
        } else {
            self.true_view(user)
        }
    }

    fn true_view(&self, user: &UserId) -> PresencePayload {
        PresencePayload {
            user_id: user.clone(),
            online: self.online,
            last_seen: self.last_seen,
            visible_to: None,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<UserId, PresenceRecord>,
    allow: HashMap<UserId, HashSet<UserId>>,
}

#[derive(Debug)]
pub struct PresenceTracker {
    inner: Mutex<Inner>,
    dispatcher: Dispatcher,
}

impl PresenceTracker {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            dispatcher,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change` to `user`'s record and broadcast the new public view if
    /// it differs from the old one.
    fn update(&self, user: &UserId, change: impl FnOnce(&mut PresenceRecord)) -> bool {
        let (before, after) = {
            let mut inner = self.lock();
            let record = inner.records.entry(user.clone()).or_default();
            let before = record.public_view(user);
            change(record);
            (before, record.public_view(user))
        };

        if before == after {
            return false;
        }
        debug!(user = %user.short(), online = after.online, "Public presence changed");
        self.dispatcher.emit(&Event::PresenceChanged(after));
        true
    }

    pub fn mark_online(&self, user: &UserId) -> bool {
        self.update(user, |r| r.online = true)
    }

    /// Also stamps `last_seen`.
    pub fn mark_offline(&self, user: &UserId) -> bool {
        self.update(user, |r| {
            if r.online {
                r.last_seen = Some(Utc::now());
            }
            r.online = false;
        })
    }

    pub fn set_invisible_mode(&self, user: &UserId, enabled: bool) -> bool {
        self.update(user, |r| r.invisible = enabled)
    }

    pub fn is_invisible(&self, user: &UserId) -> bool {
        self.lock().records.get(user).is_some_and(|r| r.invisible)
    }

    /// Let `observer` see `user`'s true presence while `user` is invisible.
    pub fn allow(&self, user: &UserId, observer: &UserId) {
        self.lock()
            .allow
            .entry(user.clone())
            .or_default()
            .insert(observer.clone());
    }

    pub fn revoke(&self, user: &UserId, observer: &UserId) {
        let mut inner = self.lock();
        if let Some(set) = inner.allow.get_mut(user) {
            set.remove(observer);
            if set.is_empty() {
                inner.allow.remove(user);
            }
        }
    }

    /// What anyone outside the allow-list sees.
    pub fn public_view(&self, user: &UserId) -> PresencePayload {
        self.lock()
            .records
            .get(user)
            .copied()
            .unwrap_or_default()
            .public_view(user)
    }

    pub fn allowed_observers(&self, user: &UserId) -> Vec<UserId> {
        let mut observers: Vec<UserId> = self
            .lock()
            .allow
            .get(user)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        observers.sort();
        observers
    }

    /// `observer`'s view of `user`, addressed to `observer` alone.
    pub fn targeted_view(&self, observer: &UserId, user: &UserId) -> PresencePayload {
        PresencePayload {
            visible_to: Some(observer.clone()),
            ..self.view_for(observer, user)
        }
    }

    /// Everything `user` has to publish about themself: the public view,
    /// then one targeted true view per allow-listed observer while
    /// invisible.
    pub fn published_views(&self, user: &UserId) -> Vec<PresencePayload> {
        let mut views = vec![self.public_view(user)];
        if self.is_invisible(user) {
            views.extend(
                self.allowed_observers(user)
                    .iter()
                    .map(|observer| self.targeted_view(observer, user)),
            );
        }
        views
    }

    /// What `observer` sees of `user`.
    pub fn view_for(&self, observer: &UserId, user: &UserId) -> PresencePayload {
        let inner = self.lock();
        let record = inner.records.get(user).copied().unwrap_or_default();
        let trusted = observer == user
            || inner
                .allow
                .get(user)
                .is_some_and(|set| set.contains(observer));
        if trusted {
            record.true_view(user)
        } else {
            record.public_view(user)
        }
    }

    pub fn record(&self, user: &UserId) -> Option<PresenceRecord> {
        self.lock().records.get(user).copied()
    }

    pub fn typing_allowed(&self, user: &UserId) -> bool {
        !self.is_invisible(user)
    }

    pub fn receipts_allowed(&self, user: &UserId) -> bool {
        !self.is_invisible(user)
    }

    /// Take a `presence_update` announced by the endpoint. Remote users only
    /// ever publish their public view, so it is stored as-is.
    pub fn apply_remote(&self, payload: &PresencePayload) -> bool {
        self.update(&payload.user_id, |r| {
            r.online = payload.online;
            if payload.last_seen.is_some() {
                r.last_seen = payload.last_seen;
            }
        })
    }
}
