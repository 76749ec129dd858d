use workerlink_wire::WireError;

/// Errors that can occur in port operations.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// The port was closed, or the other end of the link went away.
    #[error("port closed")]
    Closed,

    /// An inbound message could not be decoded or classified, or an outbound
    /// message could not be encoded.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// An I/O error occurred on the underlying stream.
    #[error("port I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PortError>;
