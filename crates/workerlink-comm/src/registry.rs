use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, trace};
use workerlink_port::Port;
use workerlink_wire::WireMessage;

use crate::error::{CommError, HandlerError, Result};
use crate::outcome::Outcome;

/// Result of running a handler.
pub type HandlerResult = std::result::Result<Outcome, HandlerError>;

/// Boxed future returned by an asynchronous handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'static>>;

/// A registered operation.
#[derive(Clone)]
pub enum Handler {
    /// Runs inline on the dispatch loop; its result is posted immediately.
    Sync(Arc<dyn Fn(Value, &Emitter) -> HandlerResult + Send + Sync>),
    /// Returns a future that is spawned so the dispatch loop stays free.
    Async(Arc<dyn Fn(Value, Emitter) -> HandlerFuture + Send + Sync>),
}

impl Handler {
    /// Wrap a closure returning `Result<O, E>` synchronously.
    pub fn from_sync<F, O, E>(handler: F) -> Self
    where
        F: Fn(Value, &Emitter) -> std::result::Result<O, E> + Send + Sync + 'static,
        O: Into<Outcome>,
        E: Into<HandlerError>,
    {
        Handler::Sync(Arc::new(move |payload: Value, emitter: &Emitter| {
            handler(payload, emitter).map(Into::into).map_err(Into::into)
        }))
    }

    /// Wrap a closure returning a future of `Result<O, E>`.
    pub fn from_async<F, Fut, O, E>(handler: F) -> Self
    where
        F: Fn(Value, Emitter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<O, E>> + Send + 'static,
        O: Into<Outcome> + Send + 'static,
        E: Into<HandlerError> + Send + 'static,
    {
        Handler::Async(Arc::new(move |payload: Value, emitter: Emitter| {
            let fut = handler(payload, emitter);
            Box::pin(async move { fut.await.map(Into::into).map_err(Into::into) }) as HandlerFuture
        }))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Sync(_) => f.write_str("Handler::Sync"),
            Handler::Async(_) => f.write_str("Handler::Async"),
        }
    }
}

/// Operation name to handler mapping.
pub(crate) struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Handler>>,
    default_operation: String,
}

impl HandlerRegistry {
    pub fn new(default_operation: impl Into<String>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            default_operation: default_operation.into(),
        }
    }

    pub fn default_operation(&self) -> &str {
        &self.default_operation
    }

    /// Register `handler` under `name`. The last registration wins.
    pub fn register(&self, name: &str, handler: Handler) {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if handlers.insert(name.to_string(), handler).is_some() {
            debug!(operation = name, "replaced handler");
        } else {
            trace!(operation = name, "registered handler");
        }
    }

    /// Find the handler for `operation`; `None` selects the default operation.
    pub fn resolve(&self, operation: Option<&str>) -> Option<Handler> {
        let name = operation.unwrap_or(&self.default_operation);
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(name)
    }

    /// Registered operation names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Posts scoped events for one incoming call.
///
/// Handed to every handler invocation; events it emits reach only the
/// caller's `on_event` callback for that call.
#[derive(Clone)]
pub struct Emitter {
    message_id: u64,
    port: Arc<dyn Port>,
}

impl Emitter {
    pub(crate) fn new(message_id: u64, port: Arc<dyn Port>) -> Self {
        Self { message_id, port }
    }

    /// Id of the call this emitter is scoped to.
    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    /// Post a scoped event to the caller.
    ///
    /// Fails with [`CommError::InvalidEventName`] when `event_name` is empty.
    pub fn emit(&self, event_name: &str, payload: Value) -> Result<()> {
        if event_name.is_empty() {
            return Err(CommError::InvalidEventName);
        }
        trace!(message_id = self.message_id, event = event_name, "emitting scoped event");
        self.port.post_message(
            WireMessage::event(self.message_id, event_name, payload),
            Vec::new(),
        )?;
        Ok(())
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("message_id", &self.message_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;
    use workerlink_port::memory;

    use super::*;

    #[test]
    fn resolve_falls_back_to_default_operation() {
        let registry = HandlerRegistry::new("main");
        registry.register(
            "main",
            Handler::from_sync(|payload, _| Ok::<_, HandlerError>(payload)),
        );

        assert!(registry.resolve(None).is_some());
        assert!(registry.resolve(Some("main")).is_some());
        assert!(registry.resolve(Some("missing")).is_none());
    }

    #[test]
    fn last_registration_wins() {
        let registry = HandlerRegistry::new("main");
        registry.register(
            "op",
            Handler::from_sync(|_, _| Ok::<_, HandlerError>(json!("first"))),
        );
        registry.register(
            "op",
            Handler::from_sync(|_, _| Ok::<_, HandlerError>(json!("second"))),
        );

        let ((port, _inbox), _other) = memory::pair();
        let emitter = Emitter::new(1, Arc::new(port));
        let Some(Handler::Sync(handler)) = registry.resolve(Some("op")) else {
            panic!("expected sync handler");
        };
        assert_eq!(
            handler(Value::Null, &emitter).unwrap(),
            Outcome::Plain(json!("second"))
        );
        assert_eq!(registry.names(), vec!["op".to_string()]);
    }

    #[test]
    fn sync_handler_converts_errors_and_outcomes() {
        let handler = Handler::from_sync(|payload: Value, _: &Emitter| {
            if payload.is_null() {
                return Err(std::io::Error::other("missing payload"));
            }
            Ok(crate::TransferableResponse::new(
                payload,
                vec![Bytes::from_static(b"buf")],
            ))
        });
        let Handler::Sync(handler) = handler else {
            panic!("expected sync handler");
        };

        let ((port, _inbox), _other) = memory::pair();
        let emitter = Emitter::new(1, Arc::new(port));

        let err = handler(Value::Null, &emitter).unwrap_err();
        assert_eq!(err.message(), "missing payload");

        let outcome = handler(json!(1), &emitter).unwrap();
        assert_eq!(
            outcome,
            Outcome::WithTransfer(json!(1), vec![Bytes::from_static(b"buf")])
        );
    }

    #[tokio::test]
    async fn emitter_posts_scoped_events() {
        let ((port, _inbox), (_peer, mut peer_inbox)) = memory::pair();
        let emitter = Emitter::new(7, Arc::new(port));

        emitter.emit("tick", json!(1)).unwrap();
        assert!(matches!(
            emitter.emit("", json!(2)),
            Err(CommError::InvalidEventName)
        ));

        let delivered = peer_inbox.recv().await.unwrap().unwrap();
        assert_eq!(delivered, WireMessage::event(7, "tick", json!(1)));
        assert!(peer_inbox.try_recv().is_none());
    }
}
