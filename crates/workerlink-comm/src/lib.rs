//! Correlated request/response over a raw message port.
//!
//! A [`Communicator`] sits on one end of a link. It issues calls to named
//! operations on the other side and runs the handlers the other side calls.
//! Handlers can stream scoped events back to the one caller that triggered
//! them, and both sides share a small global event bus.
//!
//! ```no_run
//! use serde_json::json;
//! use workerlink_comm::{CallOptions, Communicator};
//! use workerlink_port::memory;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let ((client_port, client_inbox), (worker_port, worker_inbox)) = memory::pair();
//! let client = Communicator::new(client_port);
//! let worker = Communicator::new(worker_port);
//! client.spawn(client_inbox);
//! worker.spawn(worker_inbox);
//!
//! worker.operation_sync("count", |payload, emit| {
//!     for i in 1..=payload.as_u64().unwrap_or(0) {
//!         emit.emit("tick", json!(i))?;
//!     }
//!     Ok::<_, workerlink_comm::CommError>(json!("done"))
//! });
//!
//! let options = CallOptions::new().with_on_event(|name, payload| println!("{name}: {payload}"));
//! let done = client.exec_with("count", json!(3), options).await?;
//! assert_eq!(done, json!("done"));
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod call;
pub mod communicator;
pub mod error;
pub mod outcome;
mod pending;
pub mod registry;

pub use bus::{EventBus, Listener, SubscriptionId};
pub use call::{Call, CallOptions};
pub use communicator::{Communicator, CommunicatorConfig, DEFAULT_OPERATION};
pub use error::{CallError, CommError, HandlerError, RemoteError, Result};
pub use outcome::{Outcome, TransferableResponse};
pub use pending::EventCallback;
pub use registry::{Emitter, Handler, HandlerFuture, HandlerResult};
