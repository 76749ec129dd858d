/// Errors that can occur while classifying, encoding or decoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The message does not match any recognized wire shape.
    #[error("malformed wire message: {0}")]
    Malformed(String),

    /// A result/event envelope carried a leading tag that is neither RESULT nor EVENT.
    #[error("unknown envelope tag {0}")]
    UnknownTag(u64),

    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x574C \"WL\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WireError>;
