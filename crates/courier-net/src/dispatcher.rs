//! Typed publish/subscribe fan-out.
//!
//! Handlers are registered per [`EventKind`] and invoked synchronously, in
//! registration order, on whichever task emits. The registry lock is released
//! before handlers run, so a handler may subscribe, unsubscribe or emit.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, error, warn};

use crate::events::{Event, EventKind};

type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<EventKind, Vec<(u64, Handler)>>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<(u64, Handler)>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, kind: EventKind, id: u64) -> bool {
        let mut handlers = self.lock();
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&kind);
        }
        removed
    }
}

/// Cheaply cloneable handle to one event registry.
#[derive(Clone, Default)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

/// One registration. Dropping it does not unsubscribe; call
/// [`Subscription::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    kind: EventKind,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Remove exactly this registration. Returns `false` if it was already
    /// gone or the dispatcher no longer exists.
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => {
                let removed = registry.remove(self.kind, self.id);
                debug!(event = %self.kind, id = self.id, removed, "Unsubscribed handler");
                removed
            }
            None => false,
        }
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));

        debug!(event = %kind, id, "Subscribed handler");

        Subscription {
            id,
            kind,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `event` to every handler currently registered for its kind.
    ///
    /// A failing or panicking handler is logged and skipped; the remaining
    /// handlers still run. Returns how many handlers were invoked.
    pub fn emit(&self, event: &Event) -> usize {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .registry
            .lock()
            .get(&kind)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        for handler in &handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(event = %kind, error = %e, "Event handler failed"),
                Err(_) => error!(event = %kind, "Event handler panicked"),
            }
        }

        handlers.len()
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.registry.lock().get(&kind).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds = self.registry.lock().len();
        f.debug_struct("Dispatcher").field("kinds", &kinds).finish()
    }
}
