use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{CommError, Result};

/// Callback receiving scoped events for one call: `(event_name, payload)`.
pub type EventCallback = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// `Ok(payload)` on success, `Err(payload)` on rejection.
pub(crate) type Settlement = std::result::Result<Value, Value>;

struct PendingCall {
    settle: oneshot::Sender<Settlement>,
    on_event: Option<EventCallback>,
}

/// Where a scoped event should go.
pub(crate) enum EventRoute {
    Sink(EventCallback),
    /// The call is outstanding but nobody listens for its events.
    Unobserved,
    /// No such call: already settled, or never issued.
    Unknown,
}

/// Outstanding calls issued by this side, keyed by message id.
#[derive(Default)]
pub(crate) struct PendingCalls {
    calls: Mutex<HashMap<u64, PendingCall>>,
}

impl PendingCalls {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, PendingCall>> {
        // Entries stay consistent even if a holder panicked; no user code runs under the lock.
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(
        &self,
        message_id: u64,
        settle: oneshot::Sender<Settlement>,
        on_event: Option<EventCallback>,
    ) {
        self.lock()
            .insert(message_id, PendingCall { settle, on_event });
    }

    /// Remove the entry for `message_id` and settle it. Exactly once per id.
    pub fn settle(&self, message_id: u64, success: bool, payload: Value) -> Result<()> {
        let call = self
            .lock()
            .remove(&message_id)
            .ok_or(CommError::UnknownCall(message_id))?;

        let settlement = if success { Ok(payload) } else { Err(payload) };
        if call.settle.send(settlement).is_err() {
            debug!(message_id, "caller dropped the call before it settled");
        }
        Ok(())
    }

    /// Find the event sink for `message_id` without removing the entry.
    pub fn event_route(&self, message_id: u64) -> EventRoute {
        match self.lock().get(&message_id) {
            Some(PendingCall {
                on_event: Some(sink),
                ..
            }) => EventRoute::Sink(Arc::clone(sink)),
            Some(_) => EventRoute::Unobserved,
            None => EventRoute::Unknown,
        }
    }

    /// Forget an entry without settling it.
    pub fn remove(&self, message_id: u64) -> bool {
        self.lock().remove(&message_id).is_some()
    }

    /// Drop every entry; their calls observe a closed link.
    pub fn drain(&self) -> usize {
        let mut calls = self.lock();
        let count = calls.len();
        calls.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
