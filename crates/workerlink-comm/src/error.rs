use std::any::Any;
use std::fmt;

use serde_json::Value;
use workerlink_port::PortError;
use workerlink_wire::{ErrorDescriptor, WireError};

/// Errors raised locally by communicator operations.
#[derive(Debug, thiserror::Error)]
pub enum CommError {
    /// Port-level error.
    #[error("port error: {0}")]
    Port(#[from] PortError),

    /// An inbound message did not match any wire shape.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// `emit` was called without a usable event name.
    #[error("eventName is required and must be a non-empty string")]
    InvalidEventName,

    /// A result referenced a call this side never issued or already settled.
    #[error("result for unknown call {0} (sender and receiver out of sync)")]
    UnknownCall(u64),
}

pub type Result<T> = std::result::Result<T, CommError>;

/// Why a [`Call`](crate::Call) did not resolve to a value.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The remote handler failed, or no handler was registered.
    #[error("remote call failed: {0}")]
    Remote(RemoteError),

    /// The link closed before the result arrived.
    #[error("link closed before the call settled")]
    Disconnected,

    /// The call was issued after `terminate()`.
    #[error("communicator terminated")]
    Terminated,

    /// The request could not be posted.
    #[error("failed to post request: {0}")]
    Port(#[from] PortError),
}

impl CallError {
    /// The remote rejection, if this is one.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            CallError::Remote(err) => Some(err),
            _ => None,
        }
    }
}

/// Rejection payload sent back by the remote side.
///
/// Peers built on this crate always send an [`ErrorDescriptor`]; other peers
/// may send any serializable value, which is kept as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    payload: Value,
}

impl RemoteError {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    /// The raw rejection payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// The `message` field of the descriptor.
    pub fn message(&self) -> Option<&str> {
        self.payload.get("message").and_then(Value::as_str)
    }

    /// The `stack` field of the descriptor.
    pub fn stack(&self) -> Option<&str> {
        self.payload.get("stack").and_then(Value::as_str)
    }

    pub fn descriptor(&self) -> Option<ErrorDescriptor> {
        ErrorDescriptor::from_value(&self.payload)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(message) => f.write_str(message),
            None => write!(f, "{}", self.payload),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Failure of a local handler.
///
/// Any `std::error::Error` converts into it, so handlers can use `?`. The
/// error is reduced to a message and a trace string before it leaves the
/// process; the error value itself never crosses the link.
pub struct HandlerError {
    message: String,
    stack: String,
}

impl HandlerError {
    /// Failure with a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        let message = message.into();
        let stack = format!("Error: {message}");
        Self { message, stack }
    }

    /// Replace the diagnostic trace.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }

    pub(crate) fn from_panic(panic: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(text) = panic.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = panic.downcast_ref::<String>() {
            text.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self {
            message: format!("handler panicked: {detail}"),
            stack: format!("panic: {detail}"),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    pub fn into_descriptor(self) -> ErrorDescriptor {
        ErrorDescriptor::new(self.message, self.stack)
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        let mut stack = format!("{}: {err}", std::any::type_name::<E>());
        let mut source = err.source();
        while let Some(cause) = source {
            stack.push_str(&format!("\n    caused by: {cause}"));
            source = cause.source();
        }
        Self {
            message: err.to_string(),
            stack,
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("message", &self.message)
            .field("stack", &self.stack)
            .finish()
    }
}
