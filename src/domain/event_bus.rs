//! Named-event bus for backend lifecycle and data events.
//!
//! [`EventBus`] keeps an ordered list of handlers per event name and
//! dispatches every published [`GatewayEvent`] to each of them as an
//! independent tokio task. The same event is also pushed through a
//! [`tokio::sync::broadcast`] channel that every WebSocket connection
//! subscribes to.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::broadcast;

use super::GatewayEvent;
use crate::sync;

/// Boxed asynchronous event handler.
pub type EventHandler = Arc<dyn Fn(GatewayEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Publish/subscribe hub owned by one gateway instance.
///
/// Cloning is cheap; all clones share the same handler table and
/// broadcast channel. When the broadcast ring buffer is full, the oldest
/// events are dropped for lagging receivers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
    sender: broadcast::Sender<GatewayEvent>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = sync::read(&self.inner.handlers);
        let counts: HashMap<&str, usize> =
            handlers.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        f.debug_struct("EventBus")
            .field("handlers", &counts)
            .field("receivers", &self.inner.sender.receiver_count())
            .finish()
    }
}

impl EventBus {
    /// Creates a new `EventBus` with the given broadcast capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                handlers: RwLock::new(HashMap::new()),
                sender,
            }),
        }
    }

    /// Registers `handler` for every event published under `name`.
    ///
    /// Handlers are spawned in registration order, but each runs as its
    /// own task, so no ordering between them is guaranteed. The handler
    /// itself is called inside that task, never on the publisher's stack.
    pub fn register_event_handler<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(GatewayEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let handler: EventHandler = Arc::new(move |event| {
            let handler = Arc::clone(&handler);
            async move { handler(event).await }.boxed()
        });
        sync::write(&self.inner.handlers)
            .entry(name.into())
            .or_default()
            .push(handler);
    }

    /// Publishes an event.
    ///
    /// Every handler registered under [`GatewayEvent::name`] is spawned as
    /// a fire-and-forget task; a failing handler affects neither the
    /// others nor the publisher. Returns the number of handlers spawned.
    /// Must be called from within a tokio runtime.
    pub fn send_event(&self, event: GatewayEvent) -> usize {
        let handlers: Vec<EventHandler> = sync::read(&self.inner.handlers)
            .get(event.name())
            .cloned()
            .unwrap_or_default();

        for handler in &handlers {
            let fut = handler(event.clone());
            tokio::spawn(fut);
        }

        let name = event.name().to_string();
        let receivers = self.inner.sender.send(event).unwrap_or(0);
        tracing::trace!(event = %name, handlers = handlers.len(), receivers, "event published");
        handlers.len()
    }

    /// Creates a new receiver that will receive all future events.
    ///
    /// Each WebSocket connection should call this once on connect.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.sender.subscribe()
    }

    /// Returns the number of handlers registered for `name`.
    #[must_use]
    pub fn handler_count(&self, name: &str) -> usize {
        sync::read(&self.inner.handlers)
            .get(name)
            .map_or(0, Vec::len)
    }

    /// Returns the current number of active broadcast receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }
}
