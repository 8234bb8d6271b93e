//! Alert Manager: opaque alert-token set loaded from storage
//! (SPEC_FULL.md §4.11).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::capability::ArcStorage;
use crate::json::Envelope;
use crate::regulator::RegulatorBuffer;

const STORAGE_KEY: &str = "alerts";

pub struct AlertManager {
    storage: ArcStorage,
    event_queue: Arc<RegulatorBuffer>,
    tokens: Mutex<HashSet<String>>,
}

impl AlertManager {
    pub fn load(storage: ArcStorage, event_queue: Arc<RegulatorBuffer>) -> Self {
        let tokens = storage
            .load(STORAGE_KEY)
            .ok()
            .flatten()
            .and_then(|bytes| serde_json::from_slice::<Vec<String>>(&bytes).ok())
            .unwrap_or_default();
        Self {
            storage,
            event_queue,
            tokens: Mutex::new(tokens.into_iter().collect()),
        }
    }

    fn persist(&self, tokens: &HashSet<String>) -> bool {
        let list: Vec<&String> = tokens.iter().collect();
        match serde_json::to_vec(&list) {
            Ok(bytes) => self.storage.store(STORAGE_KEY, &bytes).is_ok(),
            Err(_) => false,
        }
    }

    fn emit(&self, name: &str, payload: serde_json::Value) {
        let envelope = Envelope::new(name, payload);
        if let Ok(bytes) = serde_json::to_vec(&envelope) {
            let _ = self.event_queue.enqueue(bytes);
        }
    }

    pub fn set_alert(&self, token: String) {
        let mut tokens = self.tokens.lock().unwrap();
        tokens.insert(token.clone());
        if self.persist(&tokens) {
            self.emit("SetAlertSucceeded", json!({ "token": token }));
        } else {
            self.emit("SetAlertFailed", json!({ "token": token }));
        }
    }

    pub fn delete_alert(&self, token: String) {
        let mut tokens = self.tokens.lock().unwrap();
        let existed = tokens.remove(&token);
        if existed && self.persist(&tokens) {
            self.emit("DeleteAlertSucceeded", json!({ "token": token }));
        } else {
            self.emit("DeleteAlertFailed", json!({ "token": token }));
        }
    }

    /// `allAlerts` contribution to the `SynchronizeState` event payload.
    pub fn synchronize_state(&self) -> serde_json::Value {
        let tokens: Vec<String> = self.tokens.lock().unwrap().iter().cloned().collect();
        json!({ "allAlerts": tokens })
    }
}
