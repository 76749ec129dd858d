//! Correlated request/response and events between a process and its workers.
//!
//! workerlink turns any bidirectional message port into a two-way RPC link:
//! calls to named operations, progress events scoped to a single call, and a
//! small global event bus shared by both ends.
//!
//! # Crate Structure
//!
//! - [`wire`]: wire message shapes, classification and stream framing
//! - [`port`]: the port contract plus in-memory and byte-stream adapters
//! - [`comm`]: the `Communicator` (behind the `comm` feature)

/// Re-export wire types.
pub mod wire {
    pub use workerlink_wire::*;
}

/// Re-export port types.
pub mod port {
    pub use workerlink_port::*;
}

/// Re-export communicator types (requires `comm` feature).
#[cfg(feature = "comm")]
pub mod comm {
    pub use workerlink_comm::*;
}

#[cfg(feature = "comm")]
pub use workerlink_comm::{CallError, CallOptions, Communicator, Emitter, HandlerError};
