use bytes::Bytes;
use serde_json::Value;

/// A payload paired with buffers the port may hand over instead of copying.
///
/// Return it from a handler, or pass it to
/// [`Communicator::emit_with_transfer`](crate::Communicator::emit_with_transfer).
#[derive(Debug, Clone, PartialEq)]
pub struct TransferableResponse {
    pub payload: Value,
    pub transfer: Vec<Bytes>,
}

impl TransferableResponse {
    pub fn new(payload: Value, transfer: Vec<Bytes>) -> Self {
        Self { payload, transfer }
    }
}

/// Successful result of a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Posted as-is with an empty transfer list.
    Plain(Value),
    /// Payload and transfer list are posted separately.
    WithTransfer(Value, Vec<Bytes>),
}

impl Outcome {
    pub fn into_parts(self) -> (Value, Vec<Bytes>) {
        match self {
            Outcome::Plain(payload) => (payload, Vec::new()),
            Outcome::WithTransfer(payload, transfer) => (payload, transfer),
        }
    }
}

impl From<Value> for Outcome {
    fn from(payload: Value) -> Self {
        Outcome::Plain(payload)
    }
}

impl From<TransferableResponse> for Outcome {
    fn from(response: TransferableResponse) -> Self {
        Outcome::WithTransfer(response.payload, response.transfer)
    }
}
