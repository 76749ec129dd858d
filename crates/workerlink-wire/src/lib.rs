//! Wire format for workerlink.
//!
//! Defines the four message shapes exchanged between two communicators, the
//! structural classifier that tells them apart, the serializable error
//! descriptor carried by failed results, and a length-prefixed framing used
//! when messages travel over a byte stream:
//! - A 2-byte magic number ("WL") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A JSON-encoded wire message

pub mod codec;
pub mod descriptor;
pub mod error;
pub mod message;

pub use codec::{
    decode_frame, encode_frame, FrameConfig, WireCodec, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use descriptor::ErrorDescriptor;
pub use error::{Result, WireError};
pub use message::{
    GlobalEvent, Request, Response, ScopedEvent, WireMessage, ENVELOPE_LEN, EVENT_TAG,
    RESULT_ERROR, RESULT_SUCCESS, RESULT_TAG,
};
