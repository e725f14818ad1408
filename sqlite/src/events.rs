//! Named notifications for observers outside the library.
//!
//! A database publishes [`BEGIN_WAITING_FOR_LOCK`] before it first sleeps
//! waiting for another process to release the database, so a UI can show
//! that it is waiting. Retry attempts publish [`LOCK_RETRY`].
//!
//! Callbacks run without the bus lock held, so they may subscribe or
//! unsubscribe themselves.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Published once per statement, before the first lock retry.
pub const BEGIN_WAITING_FOR_LOCK: &str = "begin_waiting_for_lock";

/// Published before every lock retry attempt.
pub const LOCK_RETRY: &str = "lock_retry";

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<String, Vec<(SubscriptionId, Callback)>>,
}

/// Name-keyed callback registry, shared between a database and its
/// executor.
#[derive(Default)]
pub struct EventBus {
    registry: Mutex<Registry>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for events named `name`.
    pub fn subscribe<F>(&self, name: &str, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry
            .subscribers
            .entry(name.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Removes a subscription; returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for callbacks in self.registry.lock().subscribers.values_mut() {
            let before = callbacks.len();
            callbacks.retain(|(existing, _)| *existing != id);
            removed |= callbacks.len() != before;
        }
        removed
    }

    /// Calls every subscriber of `name` in subscription order.
    pub fn publish(&self, name: &str) {
        let callbacks: Vec<Callback> = match self.registry.lock().subscribers.get(name) {
            Some(callbacks) => callbacks.iter().map(|(_, c)| Arc::clone(c)).collect(),
            None => return,
        };
        for callback in callbacks {
            callback();
        }
    }

    /// Number of subscribers for `name`.
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.registry
            .lock()
            .subscribers
            .get(name)
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.lock();
        let counts: HashMap<&str, usize> = registry
            .subscribers
            .iter()
            .map(|(name, callbacks)| (name.as_str(), callbacks.len()))
            .collect();
        f.debug_struct("EventBus").field("subscribers", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_publish_reaches_subscribers_of_that_name_only() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        bus.subscribe(BEGIN_WAITING_FOR_LOCK, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(BEGIN_WAITING_FOR_LOCK);
        bus.publish(LOCK_RETRY);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let id = bus.subscribe("x", || {});
        assert_eq!(bus.subscriber_count("x"), 1);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count("x"), 0);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let bus = Arc::new(EventBus::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let (inner, own) = (Arc::clone(&bus), Arc::clone(&slot));
        let id = bus.subscribe(LOCK_RETRY, move || {
            if let Some(id) = *own.lock() {
                inner.unsubscribe(id);
            }
        });
        *slot.lock() = Some(id);

        bus.publish(LOCK_RETRY);
        assert_eq!(bus.subscriber_count(LOCK_RETRY), 0);
    }
}
