use crate::error::BridgeError;
use serde_json::{Map, Value};
use uuid::Uuid;

/// A request or response object exchanged over the stream pair
pub type Envelope = Map<String, Value>;

/// Generate a fresh correlation id
pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Return the envelope's correlation id, assigning a fresh one when absent or null
pub fn ensure_correlation_id(envelope: &mut Envelope, field: &str) -> Value {
    match envelope.get(field) {
        Some(id) if !id.is_null() => id.clone(),
        _ => {
            let id = Value::String(new_correlation_id());
            envelope.insert(field.to_string(), id.clone());
            id
        }
    }
}

/// Whether `value` is an object whose correlation field equals `id`
pub(crate) fn matches_correlation_id(value: &Value, field: &str, id: &Value) -> bool {
    value.get(field).is_some_and(|candidate| candidate == id)
}

/// Encode an envelope as a single newline-terminated JSON line
pub(crate) fn encode_line(envelope: &Envelope) -> serde_json::Result<Vec<u8>> {
    let mut line = serde_json::to_vec(envelope)?;
    line.push(b'\n');
    Ok(line)
}

/// A failed call: the correlation id it was issued under plus the cause
#[derive(Debug)]
pub struct CallFailure {
    pub correlation_id: Value,
    pub error: BridgeError,
}

impl CallFailure {
    pub(crate) fn new(correlation_id: Value, error: BridgeError) -> Self {
        Self {
            correlation_id,
            error,
        }
    }

    /// Render as a structured error object carrying the correlation id
    pub fn to_json(&self, field: &str) -> Value {
        let mut body = Envelope::new();
        body.insert(field.to_string(), self.correlation_id.clone());
        body.insert("error".to_string(), Value::String(self.error.to_string()));
        body.insert(
            "error_kind".to_string(),
            Value::String(self.error.kind().to_string()),
        );
        Value::Object(body)
    }
}

impl std::fmt::Display for CallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "call {} failed: {}", self.correlation_id, self.error)
    }
}

impl std::error::Error for CallFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
