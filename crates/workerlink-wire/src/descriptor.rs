use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Serializable description of a failed call, carried as the payload of an
/// error Result.
///
/// Only plain data crosses the link; native error objects never do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub message: String,
    #[serde(default)]
    pub stack: String,
}

impl ErrorDescriptor {
    pub fn new(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: stack.into(),
        }
    }

    /// Encode as a JSON payload.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "message": self.message,
            "stack": self.stack,
        })
    }

    /// Best-effort decode of an error payload produced by any peer.
    pub fn from_value(value: &Value) -> Option<Self> {
        let message = value.get("message")?.as_str()?.to_string();
        let stack = value
            .get("stack")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some(Self { message, stack })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn value_shape_has_message_and_stack() {
        let desc = ErrorDescriptor::new("x", "Error: x\n    at boom");
        assert_eq!(
            desc.to_value(),
            json!({"message": "x", "stack": "Error: x\n    at boom"})
        );
    }

    #[test]
    fn from_value_tolerates_missing_stack() {
        let desc = ErrorDescriptor::from_value(&json!({"message": "nope"})).unwrap();
        assert_eq!(desc.message, "nope");
        assert!(desc.stack.is_empty());

        assert!(ErrorDescriptor::from_value(&json!("plain string")).is_none());
    }
}
