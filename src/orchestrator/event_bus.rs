//! Subscription registry for inbound tool messages.
//!
//! The session pump calls [`EventBus::dispatch`] for every decoded message.
//! Interested parties hold a [`Subscription`], which owns an unbounded
//! receiver and unregisters itself when dropped. Dispatch works on a
//! snapshot of the matching subscribers, so a subscription may be dropped
//! while a fan-out is in progress; messages sent to a dropped subscription
//! are discarded.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tracing::trace;

use crate::models::response::ResponseEvent;

type Filter = Box<dyn Fn(&ResponseEvent) -> bool + Send + Sync>;

struct Subscriber {
    id: u64,
    filter: Filter,
    tx: mpsc::UnboundedSender<ResponseEvent>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Fan-out of tool messages to filtered subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber that receives every message matching `filter`.
    pub fn subscribe<F>(&self, filter: F) -> Subscription
    where
        F: Fn(&ResponseEvent) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.subscribers.push(Subscriber {
            id,
            filter: Box::new(filter),
            tx,
        });
        trace!(id, "event bus: subscribed");

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
            rx,
        }
    }

    /// Deliver `event` to every matching subscriber.
    ///
    /// Returns the number of subscribers the event was delivered to.
    pub fn dispatch(&self, event: &ResponseEvent) -> usize {
        let targets: Vec<mpsc::UnboundedSender<ResponseEvent>> = self
            .lock()
            .subscribers
            .iter()
            .filter(|s| (s.filter)(event))
            .map(|s| s.tx.clone())
            .collect();

        targets
            .into_iter()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

/// A live registration on an [`EventBus`]; unregisters on drop.
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
    rx: mpsc::UnboundedReceiver<ResponseEvent>,
}

impl Subscription {
    /// Wait for the next matching message.
    ///
    /// Returns `None` only if the bus itself is gone.
    pub async fn recv(&mut self) -> Option<ResponseEvent> {
        self.rx.recv().await
    }

    /// Take the next already-delivered message, if any.
    pub fn try_recv(&mut self) -> Option<ResponseEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry.subscribers.retain(|s| s.id != self.id);
            trace!(id = self.id, "event bus: unsubscribed");
        }
    }
}
