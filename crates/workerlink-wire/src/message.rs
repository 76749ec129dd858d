//! Wire message shapes and the structural classifier.
//!
//! Every message on a link is one of four shapes, told apart without any
//! shared schema:
//!
//! ```text
//! Request       [message_id, payload, operation?]
//! Result        [RESULT_TAG, message_id, success, payload]
//! Scoped event  [EVENT_TAG,  message_id, event_name, payload]
//! Global event  { "eventName": name, "args": [..] }
//! ```

use serde::de::Error as _;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{Result, WireError};

/// Leading tag of a Result envelope.
pub const RESULT_TAG: u64 = 0;

/// Leading tag of a Scoped event envelope.
pub const EVENT_TAG: u64 = 1;

/// `success` flag value for a failed call.
pub const RESULT_ERROR: u64 = 0;

/// `success` flag value for a successful call.
pub const RESULT_SUCCESS: u64 = 1;

/// Length of the Result / Scoped event envelope.
pub const ENVELOPE_LEN: usize = 4;

const GLOBAL_EVENT_NAME: &str = "eventName";
const GLOBAL_EVENT_ARGS: &str = "args";

/// A call issued by the remote side.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub message_id: u64,
    pub payload: Value,
    /// `None` selects the default operation.
    pub operation: Option<String>,
}

/// Terminal outcome of a call previously issued by this side.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub message_id: u64,
    pub success: bool,
    pub payload: Value,
}

/// Progress notification tied to one in-flight call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedEvent {
    pub message_id: u64,
    pub event_name: String,
    pub payload: Value,
}

/// Publish/subscribe notification not tied to any call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalEvent {
    #[serde(rename = "eventName")]
    pub event_name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// One message exchanged over a port.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Request(Request),
    Response(Response),
    Event(ScopedEvent),
    Global(GlobalEvent),
}

impl WireMessage {
    /// Build a request message.
    pub fn request(message_id: u64, payload: Value, operation: Option<&str>) -> Self {
        Self::Request(Request {
            message_id,
            payload,
            operation: operation
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        })
    }

    /// Build a result message.
    pub fn response(message_id: u64, success: bool, payload: Value) -> Self {
        Self::Response(Response {
            message_id,
            success,
            payload,
        })
    }

    /// Build a scoped event message.
    pub fn event(message_id: u64, event_name: impl Into<String>, payload: Value) -> Self {
        Self::Event(ScopedEvent {
            message_id,
            event_name: event_name.into(),
            payload,
        })
    }

    /// Build a global event message.
    pub fn global(event_name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Global(GlobalEvent {
            event_name: event_name.into(),
            args,
        })
    }

    /// Message id this message refers to. Global events carry none.
    pub fn message_id(&self) -> Option<u64> {
        match self {
            Self::Request(req) => Some(req.message_id),
            Self::Response(resp) => Some(resp.message_id),
            Self::Event(ev) => Some(ev.message_id),
            Self::Global(_) => None,
        }
    }

    /// Short name of the shape, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Response(_) => "result",
            Self::Event(_) => "event",
            Self::Global(_) => "global",
        }
    }

    /// Classify a decoded JSON value purely by its shape.
    ///
    /// A 4-element array is a Result or Scoped event (selected by its leading
    /// tag), any other array is a Request, an object with `eventName` is a
    /// Global event. Everything else is rejected.
    pub fn classify(value: Value) -> Result<Self> {
        match value {
            Value::Array(items) if items.len() == ENVELOPE_LEN => classify_envelope(items),
            Value::Array(items) => classify_request(items),
            Value::Object(map) if map.contains_key(GLOBAL_EVENT_NAME) => classify_global(map),
            other => Err(WireError::Malformed(format!(
                "unrecognized {} message",
                json_kind(&other)
            ))),
        }
    }

    /// Encode into the JSON wire shape.
    pub fn into_value(self) -> Value {
        match self {
            Self::Request(req) => {
                let mut items = vec![Value::from(req.message_id), req.payload];
                if let Some(operation) = req.operation {
                    items.push(Value::String(operation));
                }
                Value::Array(items)
            }
            Self::Response(resp) => Value::Array(vec![
                Value::from(RESULT_TAG),
                Value::from(resp.message_id),
                Value::from(success_flag(resp.success)),
                resp.payload,
            ]),
            Self::Event(ev) => Value::Array(vec![
                Value::from(EVENT_TAG),
                Value::from(ev.message_id),
                Value::String(ev.event_name),
                ev.payload,
            ]),
            Self::Global(ev) => {
                let mut map = Map::with_capacity(2);
                map.insert(GLOBAL_EVENT_NAME.to_string(), Value::String(ev.event_name));
                map.insert(GLOBAL_EVENT_ARGS.to_string(), Value::Array(ev.args));
                Value::Object(map)
            }
        }
    }

    /// Decode a JSON byte slice and classify it.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::classify(value)
    }

    /// Encode into JSON bytes.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn success_flag(success: bool) -> u64 {
    if success {
        RESULT_SUCCESS
    } else {
        RESULT_ERROR
    }
}

fn classify_envelope(items: Vec<Value>) -> Result<WireMessage> {
    let mut items = items.into_iter();
    let tag = next_u64(&mut items, "envelope tag")?;
    let message_id = next_u64(&mut items, "message id")?;
    let third = items.next().unwrap_or(Value::Null);
    let payload = items.next().unwrap_or(Value::Null);

    match tag {
        RESULT_TAG => {
            let success = match third.as_u64() {
                Some(RESULT_SUCCESS) => true,
                Some(RESULT_ERROR) => false,
                _ => {
                    return Err(WireError::Malformed(format!(
                        "result {message_id} has invalid success flag {third}"
                    )))
                }
            };
            Ok(WireMessage::response(message_id, success, payload))
        }
        EVENT_TAG => match third {
            Value::String(event_name) => Ok(WireMessage::event(message_id, event_name, payload)),
            other => Err(WireError::Malformed(format!(
                "event for call {message_id} has {} event name",
                json_kind(&other)
            ))),
        },
        other => Err(WireError::UnknownTag(other)),
    }
}

fn classify_request(items: Vec<Value>) -> Result<WireMessage> {
    if items.is_empty() || items.len() > 3 {
        return Err(WireError::Malformed(format!(
            "request array has {} elements (expected 1 to 3)",
            items.len()
        )));
    }

    let mut items = items.into_iter();
    let message_id = next_u64(&mut items, "message id")?;
    let payload = items.next().unwrap_or(Value::Null);
    let operation = match items.next() {
        None | Some(Value::Null) => None,
        Some(Value::String(name)) if name.is_empty() => None,
        Some(Value::String(name)) => Some(name),
        Some(Value::Bool(false)) => None,
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => None,
        // Looked up by its JSON text; the request is still answered.
        Some(other) => Some(other.to_string()),
    };

    Ok(WireMessage::Request(Request {
        message_id,
        payload,
        operation,
    }))
}

fn classify_global(map: Map<String, Value>) -> Result<WireMessage> {
    let event: GlobalEvent = serde_json::from_value(Value::Object(map))?;
    if event.event_name.is_empty() {
        return Err(WireError::Malformed(
            "global event has empty eventName".to_string(),
        ));
    }
    Ok(WireMessage::Global(event))
}

fn next_u64(items: &mut impl Iterator<Item = Value>, what: &str) -> Result<u64> {
    match items.next() {
        Some(value) => value.as_u64().ok_or_else(|| {
            WireError::Malformed(format!("{what} must be a non-negative integer, got {value}"))
        }),
        None => Err(WireError::Malformed(format!("missing {what}"))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Serialize for WireMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Request(req) => {
                let len = if req.operation.is_some() { 3 } else { 2 };
                let mut seq = serializer.serialize_seq(Some(len))?;
                seq.serialize_element(&req.message_id)?;
                seq.serialize_element(&req.payload)?;
                if let Some(operation) = &req.operation {
                    seq.serialize_element(operation)?;
                }
                seq.end()
            }
            Self::Response(resp) => {
                let mut seq = serializer.serialize_seq(Some(ENVELOPE_LEN))?;
                seq.serialize_element(&RESULT_TAG)?;
                seq.serialize_element(&resp.message_id)?;
                seq.serialize_element(&success_flag(resp.success))?;
                seq.serialize_element(&resp.payload)?;
                seq.end()
            }
            Self::Event(ev) => {
                let mut seq = serializer.serialize_seq(Some(ENVELOPE_LEN))?;
                seq.serialize_element(&EVENT_TAG)?;
                seq.serialize_element(&ev.message_id)?;
                seq.serialize_element(&ev.event_name)?;
                seq.serialize_element(&ev.payload)?;
                seq.end()
            }
            Self::Global(ev) => ev.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for WireMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        WireMessage::classify(value).map_err(D::Error::custom)
    }
}
