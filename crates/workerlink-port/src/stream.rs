//! Port over a pair of byte streams (child process stdio, sockets, pipes).
//!
//! Each wire message travels as one length-prefixed JSON frame. Two tasks
//! drive the streams: a writer draining the outbound queue and a reader
//! decoding frames into the [`Inbox`].

use std::sync::Mutex;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace, warn};
use workerlink_wire::{FrameConfig, WireCodec, WireError, WireMessage};

use crate::error::{PortError, Result};
use crate::traits::{Inbox, InboxSender, Port};

/// Port writing frames to an `AsyncWrite` and reading them from an `AsyncRead`.
///
/// Must be created inside a tokio runtime.
#[derive(Debug)]
pub struct StreamPort {
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    codec: WireCodec,
    writer: Mutex<Option<JoinHandle<()>>>,
    reader: JoinHandle<()>,
}

impl StreamPort {
    /// Start a port over `reader`/`writer` with default framing.
    pub fn spawn<R, W>(reader: R, writer: W) -> (Self, Inbox)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::spawn_with_config(reader, writer, FrameConfig::default())
    }

    /// Start a port with explicit framing configuration.
    pub fn spawn_with_config<R, W>(reader: R, writer: W, config: FrameConfig) -> (Self, Inbox)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let codec = WireCodec::new(config);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox) = Inbox::channel();

        let writer = tokio::spawn(write_frames(
            FramedWrite::new(writer, codec.clone()),
            outbound_rx,
        ));
        let reader = tokio::spawn(read_frames(FramedRead::new(reader, codec.clone()), inbox_tx));

        let port = Self {
            outbound: Mutex::new(Some(outbound_tx)),
            codec,
            writer: Mutex::new(Some(writer)),
            reader,
        };
        (port, inbox)
    }

    /// Close the outbound side and wait until every queued frame is flushed.
    pub async fn shutdown(&self) {
        self.close();
        let writer = self.writer.lock().ok().and_then(|mut writer| writer.take());
        if let Some(writer) = writer {
            if let Err(err) = writer.await {
                warn!(error = %err, "stream port writer task failed");
            }
        }
    }
}

impl Port for StreamPort {
    fn post_message(&self, message: WireMessage, transfer: Vec<Bytes>) -> Result<()> {
        if !transfer.is_empty() {
            trace!(
                buffers = transfer.len(),
                "byte streams ignore transfer hints"
            );
        }

        // Encode here so oversized or unserializable messages fail the caller.
        let payload = self.codec.encode_payload(&message)?;
        let outbound = self.outbound.lock().map_err(|_| PortError::Closed)?;
        match outbound.as_ref() {
            Some(tx) => tx.send(payload).map_err(|_| PortError::Closed),
            None => Err(PortError::Closed),
        }
    }

    fn close(&self) {
        if let Ok(mut outbound) = self.outbound.lock() {
            if outbound.take().is_some() {
                debug!("stream port outbound closed");
            }
        }
    }
}

impl Drop for StreamPort {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn write_frames<W>(
    mut sink: FramedWrite<W, WireCodec>,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(payload) = rx.recv().await {
        if let Err(err) = sink.send(payload).await {
            warn!(error = %err, "failed writing frame; stopping writer");
            return;
        }
    }
    if let Err(err) = SinkExt::<Bytes>::close(&mut sink).await {
        debug!(error = %err, "error closing stream writer");
    }
}

async fn read_frames<R>(mut frames: FramedRead<R, WireCodec>, inbox: InboxSender)
where
    R: AsyncRead + Unpin,
{
    while let Some(frame) = frames.next().await {
        let delivered = match frame {
            Ok(payload) => {
                trace!(size = payload.len(), "frame received");
                match WireMessage::from_slice(&payload) {
                    Ok(message) => inbox.deliver(message),
                    Err(err) => inbox.deliver_error(PortError::Wire(err)),
                }
            }
            Err(WireError::Io(err)) => {
                // Stream failures end the link.
                let _ = inbox.deliver_error(PortError::Io(err));
                return;
            }
            Err(err) => {
                // Framing lost sync; nothing after this point can be trusted.
                let _ = inbox.deliver_error(PortError::Wire(err));
                return;
            }
        };
        if delivered.is_err() {
            debug!("inbox dropped; stopping reader");
            return;
        }
    }
    debug!("stream reached EOF");
}
