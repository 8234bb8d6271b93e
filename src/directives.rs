//! Directive handler registry: maps an envelope's `header.name` to the
//! component that handles it (SPEC_FULL.md §4.6).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

/// `(payload, payload_len, sequence_number, index)` — `index` is the
/// element's position within its enclosing array message.
pub type DirectiveHandler = Arc<dyn Fn(&Value, usize, u32, usize) + Send + Sync>;

#[derive(Default)]
pub struct DirectiveRegistry {
    handlers: Mutex<HashMap<String, DirectiveHandler>>,
}

impl DirectiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, handler: DirectiveHandler) {
        self.handlers.lock().unwrap().insert(name.into(), handler);
    }

    /// Invoke the handler registered for `name`. Returns `false` if no
    /// handler is registered (caller emits `MalformedMessage`).
    pub fn dispatch(&self, name: &str, payload: &Value, payload_len: usize, sequence_number: u32, index: usize) -> bool {
        let handler = self.handlers.lock().unwrap().get(name).cloned();
        match handler {
            Some(h) => {
                h(payload, payload_len, sequence_number, index);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use serde_json::json;

    #[test]
    fn dispatch_invokes_registered_handler() {
        let registry = DirectiveRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        registry.register("SetVolume", Arc::new(move |_payload, _len, _seq, _idx| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        let found = registry.dispatch("SetVolume", &json!({"volume": 5}), 10, 0, 0);
        assert!(found);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_unknown_name_returns_false() {
        let registry = DirectiveRegistry::new();
        assert!(!registry.dispatch("Unknown", &json!({}), 0, 0, 0));
    }
}
