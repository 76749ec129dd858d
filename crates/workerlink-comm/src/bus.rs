use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

/// Subscriber callback; receives the event's arguments.
pub type Listener = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    once: bool,
    listener: Listener,
}

/// Local publish/subscribe for global events.
///
/// Knows nothing about ports or calls: the communicator republishes inbound
/// global events here, and nothing else reaches it.
#[derive(Default)]
pub struct EventBus {
    subscriptions: Mutex<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Subscription>>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn subscribe(&self, event_name: &str, once: bool, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock()
            .entry(event_name.to_string())
            .or_default()
            .push(Subscription { id, once, listener });
        id
    }

    /// Subscribe to every emission of `event_name`.
    pub fn on<F>(&self, event_name: &str, listener: F) -> SubscriptionId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.subscribe(event_name, false, Arc::new(listener))
    }

    /// Subscribe to the next emission of `event_name` only.
    pub fn once<F>(&self, event_name: &str, listener: F) -> SubscriptionId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.subscribe(event_name, true, Arc::new(listener))
    }

    /// Remove every subscriber of `event_name`. Returns how many were removed.
    pub fn off(&self, event_name: &str) -> usize {
        self.lock()
            .remove(event_name)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Remove one subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.lock();
        let mut removed = false;
        subscriptions.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|sub| sub.id != id);
            removed |= subs.len() != before;
            !subs.is_empty()
        });
        removed
    }

    /// Invoke the subscribers of `event_name` on this side only.
    ///
    /// Listeners run in subscription order, outside the internal lock, so
    /// they may subscribe or emit themselves. Returns how many ran.
    pub fn emit_locally(&self, event_name: &str, args: &[Value]) -> usize {
        let listeners: Vec<Listener> = {
            let mut subscriptions = self.lock();
            let Some(subs) = subscriptions.get_mut(event_name) else {
                return 0;
            };
            let listeners = subs.iter().map(|sub| Arc::clone(&sub.listener)).collect();
            subs.retain(|sub| !sub.once);
            if subs.is_empty() {
                subscriptions.remove(event_name);
            }
            listeners
        };

        for listener in &listeners {
            listener(args);
        }
        listeners.len()
    }

    pub fn listener_count(&self, event_name: &str) -> usize {
        self.lock().get(event_name).map(Vec::len).unwrap_or(0)
    }
}
