//! UX State Manager: caches the last `SetAttentionState` directive and
//! forwards it to the host observer (SPEC_FULL.md §4.11).

use std::sync::Mutex;

use crate::capability::ArcUxObserver;

pub struct UxStateManager {
    observer: ArcUxObserver,
    last_state: Mutex<Option<String>>,
}

impl UxStateManager {
    pub fn new(observer: ArcUxObserver) -> Self {
        Self {
            observer,
            last_state: Mutex::new(None),
        }
    }

    pub fn on_set_attention_state(&self, state: &str) {
        *self.last_state.lock().unwrap() = Some(state.to_string());
        self.observer.on_attention_state(state);
    }

    pub fn last_state(&self) -> Option<String> {
        self.last_state.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    struct RecordingObserver {
        seen: StdMutex<Vec<String>>,
    }

    impl crate::capability::UxObserver for RecordingObserver {
        fn on_attention_state(&self, state: &str) {
            self.seen.lock().unwrap().push(state.to_string());
        }
    }

    #[test]
    fn forwards_and_caches_attention_state() {
        let observer = Arc::new(RecordingObserver { seen: StdMutex::new(Vec::new()) });
        let mgr = UxStateManager::new(observer.clone());
        mgr.on_set_attention_state("SPEAKING");
        assert_eq!(mgr.last_state(), Some("SPEAKING".to_string()));
        assert_eq!(observer.seen.lock().unwrap().as_slice(), &["SPEAKING".to_string()]);
    }
}
