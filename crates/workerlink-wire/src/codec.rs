use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Result, WireError};
use crate::message::WireMessage;

/// Frame header: magic (2) + length (4) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// Magic bytes: "WL" (0x57 0x4C).
pub const MAGIC: [u8; 2] = [0x57, 0x4C];

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Encode one frame payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬───────────┬──────────────────────────┐
/// │ Magic (2B)   │ Length    │ Payload                  │
/// │ 0x57 0x4C    │ (4B LE)   │ (Length bytes, JSON)     │
/// │ "WL"         │           │                          │
/// └──────────────┴───────────┴──────────────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(WireError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one frame payload from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    if src[0..2] != MAGIC {
        return Err(WireError::InvalidMagic);
    }

    let payload_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;

    if payload_len > max_payload {
        return Err(WireError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    Ok(Some(src.split_to(payload_len).freeze()))
}

/// Configuration for stream framing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl FrameConfig {
    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }
}

/// `tokio_util` codec that frames JSON-encoded wire messages.
///
/// Decoding yields raw frame payloads rather than classified messages so a
/// single malformed message does not terminate the stream; classification is
/// left to the reader via [`WireMessage::from_slice`].
#[derive(Debug, Clone, Default)]
pub struct WireCodec {
    config: FrameConfig,
}

impl WireCodec {
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Serialize a message and check it against the payload limit.
    pub fn encode_payload(&self, message: &WireMessage) -> Result<Bytes> {
        let payload = message.to_vec()?;
        self.check_size(payload.len())?;
        Ok(Bytes::from(payload))
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.config.max_payload_size {
            return Err(WireError::PayloadTooLarge {
                size,
                max: self.config.max_payload_size,
            });
        }
        Ok(())
    }
}

impl Decoder for WireCodec {
    type Item = Bytes;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        decode_frame(src, self.config.max_payload_size)
    }
}

/// Frames a payload that is already JSON-encoded.
impl Encoder<Bytes> for WireCodec {
    type Error = WireError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        self.check_size(item.len())?;
        tracing::trace!(size = item.len(), "encoding frame");
        encode_frame(&item, dst)
    }
}

impl Encoder<WireMessage> for WireCodec {
    type Error = WireError;

    fn encode(&mut self, item: WireMessage, dst: &mut BytesMut) -> Result<()> {
        let payload = self.encode_payload(&item)?;
        Encoder::<Bytes>::encode(self, payload, dst)
    }
}
