use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};
use workerlink_port::{Inbox, Port, PortError};
use workerlink_wire::{Request, ScopedEvent, WireMessage};

use crate::bus::EventBus;
use crate::call::{Call, CallOptions};
use crate::error::{CallError, CommError, HandlerError, Result};
use crate::outcome::{Outcome, TransferableResponse};
use crate::pending::{EventRoute, PendingCalls};
use crate::registry::{Emitter, Handler, HandlerRegistry, HandlerResult};

/// Operation invoked by requests that name none.
pub const DEFAULT_OPERATION: &str = "main";

/// Communicator configuration.
#[derive(Debug, Clone)]
pub struct CommunicatorConfig {
    /// Handler name used when a request carries no operation.
    pub default_operation: String,
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            default_operation: DEFAULT_OPERATION.to_string(),
        }
    }
}

impl CommunicatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_operation(mut self, name: impl Into<String>) -> Self {
        self.default_operation = name.into();
        self
    }
}

struct Inner {
    port: Arc<dyn Port>,
    next_message_id: AtomicU64,
    pending: PendingCalls,
    handlers: HandlerRegistry,
    bus: EventBus,
    shutdown: CancellationToken,
    disconnected: AtomicBool,
}

/// Request/response, scoped events and a global event bus over one port.
///
/// Both ends of a link run the same type; either side may call the other.
/// Cloning is cheap and every clone drives the same link.
///
/// Inbound messages reach the communicator through [`run`](Self::run) (or
/// [`spawn`](Self::spawn)), which needs a tokio runtime; asynchronous
/// handlers are spawned onto it.
#[derive(Clone)]
pub struct Communicator {
    inner: Arc<Inner>,
}

impl Communicator {
    pub fn new<P: Port>(port: P) -> Self {
        Self::with_config(port, CommunicatorConfig::default())
    }

    pub fn with_config<P: Port>(port: P, config: CommunicatorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                port: Arc::new(port),
                next_message_id: AtomicU64::new(1),
                pending: PendingCalls::default(),
                handlers: HandlerRegistry::new(config.default_operation),
                bus: EventBus::new(),
                shutdown: CancellationToken::new(),
                disconnected: AtomicBool::new(false),
            }),
        }
    }

    /// Call the remote operation `operation` with `payload`.
    pub fn exec(&self, operation: &str, payload: Value) -> Call {
        self.start_call(Some(operation), payload, CallOptions::default())
    }

    pub fn exec_with(&self, operation: &str, payload: Value, options: CallOptions) -> Call {
        self.start_call(Some(operation), payload, options)
    }

    /// Call the remote default operation.
    pub fn post_message(&self, payload: Value) -> Call {
        self.start_call(None, payload, CallOptions::default())
    }

    pub fn post_message_with(&self, payload: Value, options: CallOptions) -> Call {
        self.start_call(None, payload, options)
    }

    fn start_call(&self, operation: Option<&str>, payload: Value, options: CallOptions) -> Call {
        if self.is_terminated() {
            return Call::failed(None, CallError::Terminated);
        }
        if self.inner.disconnected.load(Ordering::Acquire) {
            return Call::failed(None, CallError::Disconnected);
        }

        let message_id = self.inner.next_message_id.fetch_add(1, Ordering::Relaxed);
        let (settle, settled) = oneshot::channel();
        // Registered before posting: the result may arrive before post_message returns.
        self.inner.pending.insert(message_id, settle, options.on_event);

        debug!(
            message_id,
            operation = operation.unwrap_or(self.inner.handlers.default_operation()),
            "issuing call"
        );
        let request = WireMessage::request(message_id, payload, operation);
        if let Err(err) = self.inner.port.post_message(request, options.transfer) {
            self.inner.pending.remove(message_id);
            warn!(message_id, error = %err, "failed to post request");
            return Call::failed(Some(message_id), CallError::Port(err));
        }

        // terminate() may have drained the table between the check above and the insert.
        if self.is_terminated() && self.inner.pending.remove(message_id) {
            return Call::failed(Some(message_id), CallError::Terminated);
        }

        Call::waiting(message_id, settled)
    }

    /// Register an asynchronous handler for `name`. The last registration wins.
    ///
    /// ```no_run
    /// # use workerlink_comm::{Communicator, Emitter, HandlerError};
    /// # fn demo(comm: &Communicator) {
    /// comm.operation("echo", |payload, _emit: Emitter| async move {
    ///     Ok::<_, HandlerError>(payload)
    /// });
    /// # }
    /// ```
    pub fn operation<F, Fut, O, E>(&self, name: &str, handler: F) -> &Self
    where
        F: Fn(Value, Emitter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<O, E>> + Send + 'static,
        O: Into<Outcome> + Send + 'static,
        E: Into<HandlerError> + Send + 'static,
    {
        self.register(name, Handler::from_async(handler))
    }

    /// Register a handler that runs inline on the dispatch loop.
    pub fn operation_sync<F, O, E>(&self, name: &str, handler: F) -> &Self
    where
        F: Fn(Value, &Emitter) -> std::result::Result<O, E> + Send + Sync + 'static,
        O: Into<Outcome>,
        E: Into<HandlerError>,
    {
        self.register(name, Handler::from_sync(handler))
    }

    /// Register the handler for requests that name no operation.
    pub fn default_operation(&self, handler: Handler) -> &Self {
        let name = self.inner.handlers.default_operation().to_string();
        self.register(&name, handler)
    }

    pub fn register(&self, name: &str, handler: Handler) -> &Self {
        self.inner.handlers.register(name, handler);
        self
    }

    pub fn has_operation(&self, name: &str) -> bool {
        self.inner.handlers.contains(name)
    }

    /// Registered operation names, sorted.
    pub fn operations(&self) -> Vec<String> {
        self.inner.handlers.names()
    }

    /// Process one inbound message.
    ///
    /// Results for unknown calls come back as [`CommError::UnknownCall`];
    /// everything else is handled here, including handler failures.
    pub fn handle_message(&self, message: WireMessage) -> Result<()> {
        trace!(kind = message.kind(), message_id = ?message.message_id(), "inbound message");
        match message {
            WireMessage::Request(request) => {
                self.dispatch(request);
                Ok(())
            }
            WireMessage::Response(response) => {
                debug!(
                    message_id = response.message_id,
                    success = response.success,
                    "settling call"
                );
                self.inner
                    .pending
                    .settle(response.message_id, response.success, response.payload)
            }
            WireMessage::Event(event) => {
                self.route_event(event);
                Ok(())
            }
            WireMessage::Global(global) => {
                let delivered = self.inner.bus.emit_locally(&global.event_name, &global.args);
                trace!(event = %global.event_name, delivered, "global event");
                Ok(())
            }
        }
    }

    /// Classify a raw JSON value and process it.
    pub fn handle_value(&self, value: Value) -> Result<()> {
        let message = WireMessage::classify(value)?;
        self.handle_message(message)
    }

    fn dispatch(&self, request: Request) {
        let Request {
            message_id,
            payload,
            operation,
        } = request;
        let operation = operation
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.inner.handlers.default_operation().to_string());

        let Some(handler) = self.inner.handlers.resolve(Some(&operation)) else {
            warn!(message_id, operation = %operation, "no handler registered");
            self.send_result(
                message_id,
                Err(HandlerError::msg(format!(
                    "no handler registered for operation '{operation}'"
                ))),
            );
            return;
        };

        debug!(message_id, operation = %operation, "dispatching call");
        let emitter = Emitter::new(message_id, Arc::clone(&self.inner.port));
        match handler {
            Handler::Sync(handler) => {
                let result = panic::catch_unwind(AssertUnwindSafe(|| handler(payload, &emitter)))
                    .unwrap_or_else(|panic| Err(HandlerError::from_panic(panic)));
                self.send_result(message_id, result);
            }
            Handler::Async(handler) => {
                let comm = self.clone();
                tokio::spawn(async move {
                    let result = match panic::catch_unwind(AssertUnwindSafe(|| {
                        handler(payload, emitter)
                    })) {
                        Ok(fut) => AssertUnwindSafe(fut)
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|panic| Err(HandlerError::from_panic(panic))),
                        Err(panic) => Err(HandlerError::from_panic(panic)),
                    };
                    comm.send_result(message_id, result);
                });
            }
        }
    }

    fn send_result(&self, message_id: u64, result: HandlerResult) {
        let (message, transfer) = match result {
            Ok(outcome) => {
                let (payload, transfer) = outcome.into_parts();
                (WireMessage::response(message_id, true, payload), transfer)
            }
            Err(err) => {
                debug!(message_id, error = %err, "handler failed");
                (error_response(message_id, err), Vec::new())
            }
        };
        let success = matches!(&message, WireMessage::Response(resp) if resp.success);

        match self.inner.port.post_message(message, transfer) {
            Ok(()) => {}
            // The caller must still settle: report why the value could not be sent.
            Err(PortError::Wire(err)) if success => {
                warn!(message_id, error = %err, "result rejected by port, sending failure");
                let fallback = error_response(
                    message_id,
                    HandlerError::msg(format!("failed to send result: {err}")),
                );
                if let Err(err) = self.inner.port.post_message(fallback, Vec::new()) {
                    error!(message_id, error = %err, "failed to post result");
                }
            }
            Err(err) => error!(message_id, error = %err, "failed to post result"),
        }
    }

    fn route_event(&self, event: ScopedEvent) {
        let ScopedEvent {
            message_id,
            event_name,
            payload,
        } = event;
        match self.inner.pending.event_route(message_id) {
            EventRoute::Sink(sink) => sink(&event_name, payload),
            EventRoute::Unobserved => {
                trace!(message_id, event = %event_name, "no event callback for call")
            }
            EventRoute::Unknown => {
                debug!(message_id, event = %event_name, "dropping event for settled or unknown call")
            }
        }
    }

    /// Post a global event to the other side. A no-op after [`terminate`](Self::terminate).
    pub fn emit(&self, event_name: &str, args: Vec<Value>) -> Result<&Self> {
        self.post_global(event_name, args, Vec::new())
    }

    /// Post a global event whose single argument comes with transfer buffers.
    pub fn emit_with_transfer(
        &self,
        event_name: &str,
        response: TransferableResponse,
    ) -> Result<&Self> {
        self.post_global(event_name, vec![response.payload], response.transfer)
    }

    fn post_global(
        &self,
        event_name: &str,
        args: Vec<Value>,
        transfer: Vec<bytes::Bytes>,
    ) -> Result<&Self> {
        if event_name.is_empty() {
            return Err(CommError::InvalidEventName);
        }
        if self.is_terminated() {
            trace!(event = event_name, "terminated, not emitting");
            return Ok(self);
        }
        trace!(event = event_name, "emitting global event");
        self.inner
            .port
            .post_message(WireMessage::global(event_name, args), transfer)?;
        Ok(self)
    }

    /// Invoke this side's subscribers without touching the port.
    pub fn emit_locally(&self, event_name: &str, args: &[Value]) -> usize {
        self.inner.bus.emit_locally(event_name, args)
    }

    pub fn on<F>(&self, event_name: &str, listener: F) -> &Self
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.inner.bus.on(event_name, listener);
        self
    }

    pub fn once<F>(&self, event_name: &str, listener: F) -> &Self
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.inner.bus.once(event_name, listener);
        self
    }

    pub fn off(&self, event_name: &str) -> &Self {
        self.inner.bus.off(event_name);
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Drive inbound delivery until the inbox closes or the communicator is
    /// terminated. Outstanding calls then settle with [`CallError::Disconnected`].
    pub async fn run(&self, mut inbox: Inbox) {
        debug!("dispatch loop started");
        loop {
            let delivery = tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => break,
                delivery = inbox.recv() => delivery,
            };
            let Some(delivery) = delivery else {
                break;
            };
            let handled = delivery
                .map_err(CommError::from)
                .and_then(|message| self.handle_message(message));
            if let Err(err) = handled {
                warn!(error = %err, "protocol violation");
            }
        }

        inbox.close();
        self.inner.disconnected.store(true, Ordering::Release);
        let orphaned = self.inner.pending.drain();
        debug!(orphaned, "dispatch loop finished");
    }

    /// Run the dispatch loop on a new task.
    pub fn spawn(&self, inbox: Inbox) -> JoinHandle<()> {
        let comm = self.clone();
        tokio::spawn(async move { comm.run(inbox).await })
    }

    /// Close the port and settle every outstanding call with
    /// [`CallError::Disconnected`]. Later calls fail with [`CallError::Terminated`].
    pub fn terminate(&self) {
        if self.is_terminated() {
            return;
        }
        self.inner.shutdown.cancel();
        self.inner.port.close();
        let orphaned = self.inner.pending.drain();
        debug!(orphaned, "communicator terminated");
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// True when no calls are outstanding.
    pub fn is_free(&self) -> bool {
        self.inner.pending.is_empty()
    }

    /// Number of outstanding calls.
    pub fn jobs_length(&self) -> usize {
        self.inner.pending.len()
    }
}

fn error_response(message_id: u64, err: HandlerError) -> WireMessage {
    WireMessage::response(message_id, false, err.into_descriptor().to_value())
}

impl fmt::Debug for Communicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Communicator")
            .field("default_operation", &self.inner.handlers.default_operation())
            .field("pending", &self.inner.pending.len())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use bytes::Bytes;
    use serde_json::json;
    use tokio::time::timeout;
    use workerlink_port::memory;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn linked() -> (Communicator, Communicator) {
        let ((left_port, left_inbox), (right_port, right_inbox)) = memory::pair();
        let left = Communicator::new(left_port);
        let right = Communicator::new(right_port);
        left.spawn(left_inbox);
        right.spawn(right_inbox);
        (left, right)
    }

    fn echo_worker(worker: &Communicator) {
        worker
            .operation("echo", |payload, _emit| async move {
                Ok::<_, HandlerError>(payload)
            })
            .operation_sync("count", |payload: Value, emit: &Emitter| {
                let n = payload.as_u64().unwrap_or(0);
                for i in 1..=n {
                    emit.emit("tick", json!(i))?;
                }
                Ok::<_, CommError>(json!("done"))
            })
            .operation_sync("boom", |_, _| Err::<Value, _>(HandlerError::msg("x")));
    }

    /// Records what was posted instead of delivering it.
    #[derive(Default)]
    struct RecordingPort {
        posted: Mutex<Vec<(WireMessage, Vec<Bytes>)>>,
    }

    impl Port for RecordingPort {
        fn post_message(
            &self,
            message: WireMessage,
            transfer: Vec<Bytes>,
        ) -> workerlink_port::Result<()> {
            self.posted.lock().unwrap().push((message, transfer));
            Ok(())
        }
    }

    #[tokio::test]
    async fn round_trip_echo() {
        let (client, worker) = linked();
        echo_worker(&worker);

        let value = timeout(WAIT, client.exec("echo", json!("hi")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, json!("hi"));
        assert!(client.is_free());
    }

    #[tokio::test]
    async fn scoped_events_arrive_in_order_before_result() {
        let (client, worker) = linked();
        echo_worker(&worker);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let options = CallOptions::new().with_on_event(move |name, payload| {
            sink.lock().unwrap().push((name.to_string(), payload));
        });

        let value = timeout(WAIT, client.exec_with("count", json!(3), options))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, json!("done"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("tick".to_string(), json!(1)),
                ("tick".to_string(), json!(2)),
                ("tick".to_string(), json!(3)),
            ]
        );
    }

    #[tokio::test]
    async fn handler_failure_rejects_with_descriptor() {
        let (client, worker) = linked();
        echo_worker(&worker);

        let err = timeout(WAIT, client.exec("boom", Value::Null))
            .await
            .unwrap()
            .unwrap_err();
        let remote = err.remote().expect("remote rejection");
        assert_eq!(remote.message(), Some("x"));
        assert!(remote.stack().is_some());
    }

    #[tokio::test]
    async fn panicking_handlers_reject_instead_of_hanging() {
        let (client, worker) = linked();
        worker
            .operation_sync("sync-panic", |_, _| -> std::result::Result<Value, HandlerError> {
                panic!("sync kaboom")
            })
            .operation("async-panic", |_, _| async move {
                if true {
                    panic!("async kaboom");
                }
                Ok::<Value, HandlerError>(Value::Null)
            });

        for (op, text) in [("sync-panic", "sync kaboom"), ("async-panic", "async kaboom")] {
            let err = timeout(WAIT, client.exec(op, Value::Null))
                .await
                .unwrap()
                .unwrap_err();
            let message = err.remote().and_then(|remote| remote.message());
            assert_eq!(message, Some(format!("handler panicked: {text}").as_str()));
        }
    }

    #[tokio::test]
    async fn unknown_operation_is_rejected() {
        let (client, _worker) = linked();

        let err = timeout(WAIT, client.exec("missing", Value::Null))
            .await
            .unwrap()
            .unwrap_err();
        let message = err.remote().and_then(|remote| remote.message()).unwrap();
        assert!(message.contains("no handler registered for operation 'missing'"));
    }

    #[tokio::test]
    async fn post_message_uses_default_operation() {
        let (client, worker) = linked();
        worker.default_operation(Handler::from_sync(|payload: Value, _: &Emitter| {
            Ok::<_, HandlerError>(json!({ "greeting": payload }))
        }));

        let value = timeout(WAIT, client.post_message(json!("bob")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, json!({ "greeting": "bob" }));
        assert!(worker.has_operation(DEFAULT_OPERATION));
    }

    #[tokio::test]
    async fn custom_default_operation_name() {
        let ((left_port, left_inbox), (right_port, right_inbox)) = memory::pair();
        let client = Communicator::new(left_port);
        let worker = Communicator::with_config(
            right_port,
            CommunicatorConfig::new().with_default_operation("index"),
        );
        client.spawn(left_inbox);
        worker.spawn(right_inbox);
        worker.operation_sync("index", |_, _| Ok::<_, HandlerError>(json!(1)));

        let value = timeout(WAIT, client.post_message(Value::Null))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, json!(1));
        assert_eq!(worker.operations(), vec!["index".to_string()]);
    }

    #[tokio::test]
    async fn interleaved_calls_settle_independently() {
        let (client, worker) = linked();
        worker.operation("delay", |payload, _| async move {
            let ms = payload.as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, HandlerError>(payload)
        });

        let slow = client.exec("delay", json!(50));
        let fast = client.exec("delay", json!(1));
        assert_eq!(client.jobs_length(), 2);
        assert!(!client.is_free());

        let (slow, fast) = timeout(WAIT, async { tokio::join!(slow, fast) })
            .await
            .unwrap();
        assert_eq!(slow.unwrap(), json!(50));
        assert_eq!(fast.unwrap(), json!(1));
        assert!(client.is_free());
    }

    #[tokio::test]
    async fn events_for_one_call_never_reach_another() {
        let (client, worker) = linked();
        echo_worker(&worker);

        let counts: Vec<Arc<Mutex<Vec<Value>>>> =
            (0..2).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();
        let calls: Vec<Call> = counts
            .iter()
            .zip([2_u64, 4])
            .map(|(seen, n)| {
                let sink = Arc::clone(seen);
                client.exec_with(
                    "count",
                    json!(n),
                    CallOptions::new().with_on_event(move |_, payload| {
                        sink.lock().unwrap().push(payload);
                    }),
                )
            })
            .collect();
        for call in calls {
            timeout(WAIT, call).await.unwrap().unwrap();
        }

        assert_eq!(*counts[0].lock().unwrap(), vec![json!(1), json!(2)]);
        assert_eq!(
            *counts[1].lock().unwrap(),
            vec![json!(1), json!(2), json!(3), json!(4)]
        );
    }

    #[tokio::test]
    async fn global_events_reach_the_bus_only() {
        let (client, worker) = linked();
        echo_worker(&worker);

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        worker.on("ping", move |args| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(args.to_vec());
            }
        });

        let scoped = Arc::new(Mutex::new(0_usize));
        let hits = Arc::clone(&scoped);
        let call = client.exec_with(
            "echo",
            json!("x"),
            CallOptions::new().with_on_event(move |_, _| *hits.lock().unwrap() += 1),
        );
        client.emit("ping", vec![json!(42)]).unwrap();

        let args = timeout(WAIT, rx).await.unwrap().unwrap();
        assert_eq!(args, vec![json!(42)]);
        timeout(WAIT, call).await.unwrap().unwrap();
        assert_eq!(*scoped.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn emit_validates_event_name() {
        let (client, _worker) = linked();
        assert!(matches!(
            client.emit("", vec![]),
            Err(CommError::InvalidEventName)
        ));
    }

    #[test]
    fn unknown_result_is_a_protocol_error() {
        let comm = Communicator::new(RecordingPort::default());
        let err = comm
            .handle_message(WireMessage::response(99, true, Value::Null))
            .unwrap_err();
        assert!(matches!(err, CommError::UnknownCall(99)));
    }

    #[test]
    fn unknown_scoped_event_is_dropped() {
        let comm = Communicator::new(RecordingPort::default());
        comm.handle_message(WireMessage::event(99, "tick", json!(1)))
            .unwrap();
    }

    #[test]
    fn malformed_values_are_rejected() {
        let comm = Communicator::new(RecordingPort::default());
        let err = comm.handle_value(json!("nope")).unwrap_err();
        assert!(matches!(err, CommError::Wire(_)));
    }

    #[test]
    fn request_with_non_string_operation_is_answered() {
        let port = Arc::new(RecordingPort::default());
        let comm = Communicator::new(Arc::clone(&port));

        comm.handle_value(json!([5, null, 7])).unwrap();

        let posted = port.posted.lock().unwrap();
        assert_eq!(posted.len(), 1);
        let WireMessage::Response(response) = &posted[0].0 else {
            panic!("expected a result, got {:?}", posted[0].0);
        };
        assert_eq!(response.message_id, 5);
        assert!(!response.success);
        let message = response.payload["message"].as_str().unwrap();
        assert!(message.contains("no handler registered for operation '7'"));
    }

    #[test]
    fn emit_with_transfer_unwraps_payload_and_buffers() {
        let port = Arc::new(RecordingPort::default());
        let comm = Communicator::new(Arc::clone(&port));

        comm.emit_with_transfer(
            "frame",
            TransferableResponse::new(json!({"seq": 1}), vec![Bytes::from_static(b"ab")]),
        )
        .unwrap();

        let posted = port.posted.lock().unwrap();
        assert_eq!(
            *posted,
            vec![(
                WireMessage::global("frame", vec![json!({"seq": 1})]),
                vec![Bytes::from_static(b"ab")]
            )]
        );
        assert_eq!(
            serde_json::to_value(&posted[0].0).unwrap(),
            json!({"eventName": "frame", "args": [{"seq": 1}]})
        );
    }

    #[tokio::test]
    async fn events_after_settlement_are_ignored() {
        let port = Arc::new(RecordingPort::default());
        let comm = Communicator::new(Arc::clone(&port));

        let seen = Arc::new(Mutex::new(0_usize));
        let hits = Arc::clone(&seen);
        let call = comm.exec_with(
            "op",
            Value::Null,
            CallOptions::new().with_on_event(move |_, _| *hits.lock().unwrap() += 1),
        );
        let id = call.message_id().unwrap();

        comm.handle_message(WireMessage::event(id, "tick", json!(1)))
            .unwrap();
        comm.handle_message(WireMessage::response(id, true, json!("ok")))
            .unwrap();
        comm.handle_message(WireMessage::event(id, "tick", json!(2)))
            .unwrap();

        assert_eq!(call.await.unwrap(), json!("ok"));
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn message_ids_start_at_one_and_increase() {
        let port = Arc::new(RecordingPort::default());
        let comm = Communicator::new(Arc::clone(&port));
        let first = comm.exec("a", Value::Null);
        let second = comm.post_message(Value::Null);
        assert_eq!(first.message_id(), Some(1));
        assert_eq!(second.message_id(), Some(2));

        let posted = port.posted.lock().unwrap();
        assert_eq!(posted[0].0, WireMessage::request(1, Value::Null, Some("a")));
        assert_eq!(posted[1].0, WireMessage::request(2, Value::Null, None));
    }

    #[test]
    fn transfer_lists_follow_the_outcome() {
        let port = Arc::new(RecordingPort::default());
        let comm = Communicator::new(Arc::clone(&port));
        comm.operation_sync("plain", |_, _| Ok::<_, HandlerError>(json!(1)))
            .operation_sync("buffers", |_, _| {
                Ok::<_, HandlerError>(TransferableResponse::new(
                    json!({"len": 3}),
                    vec![Bytes::from_static(b"abc")],
                ))
            });

        comm.handle_message(WireMessage::request(1, Value::Null, Some("plain")))
            .unwrap();
        comm.handle_message(WireMessage::request(2, Value::Null, Some("buffers")))
            .unwrap();

        let posted = port.posted.lock().unwrap();
        assert_eq!(posted[0].0, WireMessage::response(1, true, json!(1)));
        assert!(posted[0].1.is_empty());
        assert_eq!(posted[1].0, WireMessage::response(2, true, json!({"len": 3})));
        assert_eq!(posted[1].1, vec![Bytes::from_static(b"abc")]);
    }

    #[test]
    fn post_failure_settles_the_call() {
        let ((port, _inbox), other) = memory::pair();
        drop(other);
        let comm = Communicator::new(port);

        let call = comm.exec("echo", Value::Null);
        assert!(comm.is_free());
        let err = futures_util::FutureExt::now_or_never(call)
            .expect("ready")
            .unwrap_err();
        assert!(matches!(err, CallError::Port(_)));
    }

    #[tokio::test]
    async fn closing_the_link_disconnects_pending_calls() {
        let ((client_port, client_inbox), (worker_port, worker_inbox)) = memory::pair();
        let client = Communicator::new(client_port);
        let loop_handle = client.spawn(client_inbox);

        let call = client.exec("never", Value::Null);
        drop(worker_port);
        drop(worker_inbox);

        let err = timeout(WAIT, call).await.unwrap().unwrap_err();
        assert!(matches!(err, CallError::Disconnected));
        timeout(WAIT, loop_handle).await.unwrap().unwrap();

        let late = client.exec("never", Value::Null).await.unwrap_err();
        assert!(matches!(late, CallError::Disconnected));
    }

    #[tokio::test]
    async fn terminate_settles_calls_and_silences_emit() {
        let (client, worker) = linked();
        worker.operation("hang", |_, _| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, HandlerError>(Value::Null)
        });

        let call = client.exec("hang", Value::Null);
        client.terminate();
        client.terminate();

        let err = timeout(WAIT, call).await.unwrap().unwrap_err();
        assert!(matches!(err, CallError::Disconnected));
        assert!(client.is_terminated());
        assert!(client.is_free());

        let late = client.exec("echo", Value::Null).await.unwrap_err();
        assert!(matches!(late, CallError::Terminated));
        assert!(client.emit("ping", vec![]).is_ok());
    }
}
