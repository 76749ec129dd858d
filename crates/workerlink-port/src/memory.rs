//! In-process port pair.
//!
//! Messages are handed to the other end as values, without serialization.
//! Transfer buffers are reference-counted `Bytes`, so "moving" them costs
//! nothing; the adapter only accounts for them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use tracing::{debug, trace};
use workerlink_wire::WireMessage;

use crate::error::{PortError, Result};
use crate::traits::{Inbox, InboxSender, Port};

/// One end of an in-memory link.
#[derive(Debug)]
pub struct MemoryPort {
    peer: Mutex<Option<InboxSender>>,
    transferred_bytes: AtomicU64,
}

/// Create two connected ports. Each tuple is one end: its outbound port and
/// the inbox receiving what the other end posts.
pub fn pair() -> ((MemoryPort, Inbox), (MemoryPort, Inbox)) {
    let (to_left, left_inbox) = Inbox::channel();
    let (to_right, right_inbox) = Inbox::channel();
    (
        (MemoryPort::new(to_right), left_inbox),
        (MemoryPort::new(to_left), right_inbox),
    )
}

impl MemoryPort {
    fn new(peer: InboxSender) -> Self {
        Self {
            peer: Mutex::new(Some(peer)),
            transferred_bytes: AtomicU64::new(0),
        }
    }

    /// Total size of the buffers handed over as transfer hints.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    /// True once this end was closed or the other end's inbox went away.
    pub fn is_closed(&self) -> bool {
        match self.peer.lock() {
            Ok(peer) => peer.as_ref().is_none_or(InboxSender::is_closed),
            Err(_) => true,
        }
    }
}

impl Port for MemoryPort {
    fn post_message(&self, message: WireMessage, transfer: Vec<Bytes>) -> Result<()> {
        let peer = self.peer.lock().map_err(|_| PortError::Closed)?;
        let Some(peer) = peer.as_ref() else {
            return Err(PortError::Closed);
        };

        if !transfer.is_empty() {
            let size: usize = transfer.iter().map(Bytes::len).sum();
            self.transferred_bytes
                .fetch_add(size as u64, Ordering::Relaxed);
            trace!(
                buffers = transfer.len(),
                size,
                "handing over transfer buffers"
            );
        }

        peer.deliver(message)
    }

    fn close(&self) {
        if let Ok(mut peer) = self.peer.lock() {
            if peer.take().is_some() {
                debug!("memory port closed");
            }
        }
    }
}
