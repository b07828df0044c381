//! Socket event handler registry and user-facing notifications.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use parley_shared::{EventKind, ServerEvent};

pub type Handler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: Vec<(HandlerId, EventKind, Handler)>,
}

impl Registry {
    fn insert(&mut self, kind: EventKind, handler: Handler) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.handlers.push((id, kind, handler));
        id
    }

    fn remove(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(h, _, _)| *h != id);
        self.handlers.len() != before
    }
}

/// Handlers for server-pushed events, keyed by event kind.
#[derive(Default)]
pub struct EventHandlers {
    registry: Mutex<Registry>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.lock().insert(kind, Arc::new(handler))
    }

    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.lock().remove(id)
    }

    /// Swap `old` for a new handler in one step, so no event is dispatched
    /// to both or to neither.
    pub fn replace<F>(&self, old: Option<HandlerId>, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        if let Some(old) = old {
            registry.remove(old);
        }
        registry.insert(kind, Arc::new(handler))
    }

    /// Run every handler registered for the event's kind. Handlers run
    /// outside the registry lock and may (un)subscribe.
    pub fn dispatch(&self, event: &ServerEvent) -> usize {
        let kind = event.kind();
        let matching: Vec<Handler> = self
            .lock()
            .handlers
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, h)| h.clone())
            .collect();

        for handler in &matching {
            handler(event);
        }
        matching.len()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.lock()
            .handlers
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sink for transient user-visible errors.
pub trait Notifier: Send + Sync {
    fn error(&self, message: &str);
}

/// Default notifier: writes notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn error(&self, message: &str) {
        tracing::error!(notice = message, "User-visible error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parley_shared::UserId;

    fn online() -> ServerEvent {
        ServerEvent::OnlineUsers(vec![UserId::parse("a").unwrap()])
    }

    #[test]
    fn dispatch_only_reaches_matching_kind() {
        let handlers = EventHandlers::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        handlers.subscribe(EventKind::OnlineUsers, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        handlers.subscribe(EventKind::NewMessage, |_| panic!("wrong kind"));

        assert_eq!(handlers.dispatch(&online()), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn replace_leaves_a_single_handler() {
        let handlers = EventHandlers::new();
        let mut current = None;

        for _ in 0..5 {
            current = Some(handlers.replace(current, EventKind::NewMessage, |_| {}));
        }

        assert_eq!(handlers.handler_count(EventKind::NewMessage), 1);
        assert!(handlers.unsubscribe(current.unwrap()));
        assert_eq!(handlers.handler_count(EventKind::NewMessage), 0);
    }

    #[test]
    fn handler_may_unsubscribe_itself() {
        let handlers = Arc::new(EventHandlers::new());
        let slot: Arc<Mutex<Option<HandlerId>>> = Arc::new(Mutex::new(None));

        let (hs, s) = (handlers.clone(), slot.clone());
        let id = handlers.subscribe(EventKind::OnlineUsers, move |_| {
            if let Some(id) = s.lock().unwrap().take() {
                hs.unsubscribe(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        assert_eq!(handlers.dispatch(&online()), 1);
        assert_eq!(handlers.dispatch(&online()), 0);
    }
}
