//! Exception Manager: builds `ExceptionEncountered` events for malformed
//! inbound messages (SPEC_FULL.md §4.11).

use serde_json::json;

use crate::json::Envelope;
use crate::regulator::RegulatorBuffer;
use crate::topic::Topic;

pub struct ExceptionManager<'a> {
    event_queue: &'a RegulatorBuffer,
}

impl<'a> ExceptionManager<'a> {
    pub fn new(event_queue: &'a RegulatorBuffer) -> Self {
        Self { event_queue }
    }

    /// Enqueue a `MalformedMessage` `ExceptionEncountered` event naming the
    /// topic being dispatched when the failure occurred (SPEC_FULL.md §9(c):
    /// the literal topic, not a hardcoded constant).
    pub fn malformed_message(&self, topic: Topic, sequence_number: Option<u32>, index: Option<usize>) {
        let mut message = json!({ "topic": topic.leaf() });
        if let Some(seq) = sequence_number {
            message["sequenceNumber"] = json!(seq);
        }
        if let Some(idx) = index {
            message["index"] = json!(idx);
        }
        let payload = json!({
            "error": { "code": "MALFORMED_MESSAGE" },
            "message": message,
        });
        let envelope = Envelope::new("ExceptionEncountered", payload);
        if let Ok(bytes) = serde_json::to_vec(&envelope) {
            let _ = self.event_queue.enqueue(bytes);
        }
    }
}
