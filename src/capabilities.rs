//! Capabilities Sender: publishes the device's capability document and
//! tracks the service's acknowledgement (SPEC_FULL.md §4.10).

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use crate::json::Envelope;
use crate::regulator::RegulatorBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilitiesState {
    None,
    Published,
    Accepted,
    Rejected,
}

/// Compile-time-known capability configuration the document is generated from.
#[derive(Debug, Clone)]
pub struct CapabilitiesConfig {
    pub interfaces: Vec<Value>,
}

pub struct CapabilitiesSender {
    config: CapabilitiesConfig,
    queue: Arc<RegulatorBuffer>,
    observer: Box<dyn Fn(CapabilitiesState, Option<String>) + Send + Sync>,
    state: Mutex<CapabilitiesState>,
}

impl CapabilitiesSender {
    pub fn new(
        config: CapabilitiesConfig,
        queue: Arc<RegulatorBuffer>,
        observer: Box<dyn Fn(CapabilitiesState, Option<String>) + Send + Sync>,
    ) -> Self {
        Self {
            config,
            queue,
            observer,
            state: Mutex::new(CapabilitiesState::None),
        }
    }

    pub fn state(&self) -> CapabilitiesState {
        *self.state.lock().unwrap()
    }

    /// Idempotent while already `Published`: re-publishing has no effect
    /// until an acknowledgement resolves the state.
    pub fn publish(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == CapabilitiesState::Published {
                return;
            }
            *state = CapabilitiesState::Published;
        }
        let payload = json!({ "capabilities": self.config.interfaces });
        let envelope = Envelope::new("PublishCapabilities", payload);
        if let Ok(bytes) = serde_json::to_vec(&envelope) {
            let _ = self.queue.enqueue(bytes);
        }
    }

    /// Handle the `CapabilitiesAcknowledge` directive-array element payload.
    pub fn on_acknowledge(&self, accepted: bool, description: Option<String>) {
        let new_state = if accepted { CapabilitiesState::Accepted } else { CapabilitiesState::Rejected };
        *self.state.lock().unwrap() = new_state;
        (self.observer)(new_state, description);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> CapabilitiesConfig {
        CapabilitiesConfig { interfaces: vec![json!({"name": "Microphone"})] }
    }

    #[test]
    fn publish_enqueues_once_while_published() {
        let queue = Arc::new(RegulatorBuffer::new(4096));
        let sender = CapabilitiesSender::new(config(), queue.clone(), Box::new(|_s, _d| {}));
        sender.publish();
        sender.publish();
        assert_eq!(queue.len(), 1);
        assert_eq!(sender.state(), CapabilitiesState::Published);
    }

    #[test]
    fn acknowledge_transitions_and_notifies_observer() {
        let queue = Arc::new(RegulatorBuffer::new(4096));
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let sender = CapabilitiesSender::new(
            config(),
            queue,
            Box::new(move |_state, _desc| { c.fetch_add(1, Ordering::SeqCst); }),
        );
        sender.publish();
        sender.on_acknowledge(true, None);
        assert_eq!(sender.state(), CapabilitiesState::Accepted);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejection_notifies_observer_with_description() {
        let queue = Arc::new(RegulatorBuffer::new(4096));
        let received = Arc::new(Mutex::new(None));
        let r = received.clone();
        let sender = CapabilitiesSender::new(
            config(),
            queue,
            Box::new(move |_state, desc| { *r.lock().unwrap() = desc; }),
        );
        sender.publish();
        sender.on_acknowledge(false, Some("bad version".to_string()));
        assert_eq!(sender.state(), CapabilitiesState::Rejected);
        assert_eq!(received.lock().unwrap().as_deref(), Some("bad version"));
    }
}
