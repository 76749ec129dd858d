use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use workerlink_wire::WireMessage;

use crate::error::{PortError, Result};

/// The sending half of a messaging link.
///
/// A port posts one [`WireMessage`] at a time. The `transfer` list names
/// buffers the adapter may hand over without copying; it is a hint only and
/// adapters that cannot honor it drop it.
pub trait Port: Send + Sync + 'static {
    /// Post one message to the other end of the link.
    fn post_message(&self, message: WireMessage, transfer: Vec<Bytes>) -> Result<()>;

    /// Release the link. Further posts fail with [`PortError::Closed`].
    fn close(&self) {}
}

impl<P: Port + ?Sized> Port for Arc<P> {
    fn post_message(&self, message: WireMessage, transfer: Vec<Bytes>) -> Result<()> {
        (**self).post_message(message, transfer)
    }

    fn close(&self) {
        (**self).close()
    }
}

impl<P: Port + ?Sized> Port for Box<P> {
    fn post_message(&self, message: WireMessage, transfer: Vec<Bytes>) -> Result<()> {
        (**self).post_message(message, transfer)
    }

    fn close(&self) {
        (**self).close()
    }
}

/// The receiving half of a messaging link.
///
/// Yields exactly one decoded message per underlying delivery, in the order
/// the other end posted them. Undecodable deliveries surface as `Err` items
/// so the consumer can report them and keep going.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<Result<WireMessage>>,
}

/// Feeds an [`Inbox`]. Adapters hold one of these per link.
#[derive(Debug, Clone)]
pub struct InboxSender {
    tx: mpsc::UnboundedSender<Result<WireMessage>>,
}

impl Inbox {
    /// Create a connected sender/inbox pair.
    pub fn channel() -> (InboxSender, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (InboxSender { tx }, Inbox { rx })
    }

    /// Receive the next delivery. Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Result<WireMessage>> {
        self.rx.recv().await
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<Result<WireMessage>> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting deliveries; already queued ones can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl InboxSender {
    /// Deliver a decoded message.
    pub fn deliver(&self, message: WireMessage) -> Result<()> {
        self.tx.send(Ok(message)).map_err(|_| PortError::Closed)
    }

    /// Deliver a decode/classification failure.
    pub fn deliver_error(&self, err: PortError) -> Result<()> {
        self.tx.send(Err(err)).map_err(|_| PortError::Closed)
    }

    /// True once the inbox has been dropped or closed.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
