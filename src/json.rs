//! JSON envelope shapes (SPEC_FULL.md §3, §6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    pub name: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
}

impl EnvelopeHeader {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// `{ "header": {...}, "payload": {...} }` — a single directive/event/ack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub header: EnvelopeHeader,
    pub payload: Value,
}

impl Envelope {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            header: EnvelopeHeader::new(name),
            payload,
        }
    }
}

/// Wrap a batch of envelopes under the topic's array name, e.g.
/// `{"events":[...]}` / `{"directives":[...]}`.
pub fn wrap_array(array_name: &str, items: &[Envelope]) -> serde_json::Result<Vec<u8>> {
    let mut map = serde_json::Map::new();
    map.insert(array_name.to_string(), serde_json::to_value(items)?);
    serde_json::to_vec(&Value::Object(map))
}

/// Extract the envelopes out of an array-wrapped JSON payload.
pub fn unwrap_array(array_name: &str, buf: &[u8]) -> serde_json::Result<Vec<Envelope>> {
    let value: Value = serde_json::from_slice(buf)?;
    let items = value
        .get(array_name)
        .cloned()
        .unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(items)
}
