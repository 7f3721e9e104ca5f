//! In-process publish/subscribe for stream lifecycle events
//!
//! Handlers are keyed by [`EventKind`] and run synchronously on the
//! publisher's task, in registration order. A handler that returns an error or
//! panics is logged and skipped; the remaining handlers still run and the
//! publisher never sees the failure.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::events::{EventKind, StreamLifecycleEvent};

/// Error type returned by event handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;

type Handler = Arc<dyn Fn(&StreamLifecycleEvent) -> HandlerResult + Send + Sync>;

struct Registration {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct BusState {
    handlers: RwLock<HashMap<EventKind, Vec<Registration>>>,
    next_id: AtomicU64,
}

impl BusState {
    fn remove(&self, id: u64, kinds: &[EventKind]) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        for kind in kinds {
            if let Some(list) = handlers.get_mut(kind) {
                list.retain(|registration| registration.id != id);
            }
        }
    }
}

/// Shared handle to an in-memory event bus; clones publish to the same subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    state: Arc<BusState>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&StreamLifecycleEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(vec![kind], Arc::new(handler))
    }

    /// Register `handler` for every event kind.
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StreamLifecycleEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(EventKind::ALL.to_vec(), Arc::new(handler))
    }

    fn register(&self, kinds: Vec<EventKind>, handler: Handler) -> Subscription {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut handlers = self
                .state
                .handlers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for kind in &kinds {
                handlers.entry(*kind).or_default().push(Registration {
                    id,
                    handler: Arc::clone(&handler),
                });
            }
        }

        Subscription {
            state: Arc::downgrade(&self.state),
            id,
            kinds,
            active: true,
        }
    }

    /// Deliver `event` to the handlers registered for its kind at the time of the call.
    pub fn publish(&self, event: &StreamLifecycleEvent) {
        let kind = event.kind();
        let handlers: Vec<Handler> = {
            let handlers = self
                .state
                .handlers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match handlers.get(&kind) {
                Some(list) => list.iter().map(|r| Arc::clone(&r.handler)).collect(),
                None => return,
            }
        };

        log::debug!(
            "Publishing event {} for stream {} to {} handlers",
            kind,
            event.stream_id(),
            handlers.len()
        );

        for handler in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::error!("Error handling event {} in handler: {}", kind, e);
                }
                Err(_) => {
                    log::error!("Handler panicked while handling event {}", kind);
                }
            }
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.state
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("EventBus");
        for kind in EventKind::ALL {
            debug.field(&kind.to_string(), &self.handler_count(kind));
        }
        debug.finish()
    }
}

/// Handle returned by [`EventBus::subscribe`]; dropping it removes the handler.
#[must_use = "dropping a Subscription removes its handler"]
pub struct Subscription {
    state: Weak<BusState>,
    id: u64,
    kinds: Vec<EventKind>,
    active: bool,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(state) = self.state.upgrade() {
            state.remove(self.id, &self.kinds);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kinds", &self.kinds)
            .field("active", &self.active)
            .finish()
    }
}
