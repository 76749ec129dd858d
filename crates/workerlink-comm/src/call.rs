use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{CallError, RemoteError};
use crate::pending::{EventCallback, Settlement};

/// Optional parts of a call.
#[derive(Default)]
pub struct CallOptions {
    pub(crate) transfer: Vec<Bytes>,
    pub(crate) on_event: Option<EventCallback>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers the port may hand over instead of copying.
    pub fn with_transfer(mut self, transfer: Vec<Bytes>) -> Self {
        self.transfer = transfer;
        self
    }

    /// Receive the scoped events the remote handler emits for this call.
    ///
    /// Invoked in emission order, never after the call settles.
    pub fn with_on_event<F>(mut self, on_event: F) -> Self
    where
        F: Fn(&str, Value) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(on_event));
        self
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("transfer", &self.transfer.len())
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}

/// An issued call; resolves once the matching result arrives.
///
/// Dropping it abandons the result but does not cancel the remote work.
#[must_use = "a Call does nothing unless awaited"]
pub struct Call {
    message_id: Option<u64>,
    state: CallState,
}

enum CallState {
    Waiting(oneshot::Receiver<Settlement>),
    Done(Option<Result<Value, CallError>>),
}

impl Call {
    pub(crate) fn waiting(message_id: u64, rx: oneshot::Receiver<Settlement>) -> Self {
        Self {
            message_id: Some(message_id),
            state: CallState::Waiting(rx),
        }
    }

    pub(crate) fn failed(message_id: Option<u64>, err: CallError) -> Self {
        Self {
            message_id,
            state: CallState::Done(Some(Err(err))),
        }
    }

    /// Id assigned to the request, if it got that far.
    pub fn message_id(&self) -> Option<u64> {
        self.message_id
    }
}

impl Future for Call {
    type Output = Result<Value, CallError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            CallState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(settled) => {
                    this.state = CallState::Done(None);
                    Poll::Ready(match settled {
                        Ok(Ok(payload)) => Ok(payload),
                        Ok(Err(payload)) => Err(CallError::Remote(RemoteError::new(payload))),
                        Err(_) => Err(CallError::Disconnected),
                    })
                }
                Poll::Pending => Poll::Pending,
            },
            CallState::Done(result) => match result.take() {
                Some(result) => Poll::Ready(result),
                None => panic!("Call polled after completion"),
            },
        }
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            CallState::Waiting(_) => "waiting",
            CallState::Done(_) => "done",
        };
        f.debug_struct("Call")
            .field("message_id", &self.message_id)
            .field("state", &state)
            .finish()
    }
}
