//! Volume Manager: tracks the speaker and alert volume, applies `SetVolume`
//! and `AdjustVolume` directives, and persists the result
//! (SPEC_FULL.md §4.11).

use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::capability::{ArcStorage, ArcVolumeControl};
use crate::json::Envelope;
use crate::regulator::RegulatorBuffer;

const STORAGE_KEY: &str = "volume";
const DEFAULT_VOLUME: u8 = 50;
const MAX_VOLUME: u8 = 100;

pub struct VolumeManager {
    control: ArcVolumeControl,
    storage: ArcStorage,
    event_queue: Arc<RegulatorBuffer>,
    volume: Mutex<u8>,
    alert_volume: Mutex<u8>,
}

impl VolumeManager {
    pub fn load(control: ArcVolumeControl, storage: ArcStorage, event_queue: Arc<RegulatorBuffer>) -> Self {
        let volume = storage
            .load(STORAGE_KEY)
            .ok()
            .flatten()
            .and_then(|bytes| bytes.first().copied())
            .unwrap_or(DEFAULT_VOLUME);
        Self {
            control,
            storage,
            event_queue,
            volume: Mutex::new(volume),
            alert_volume: Mutex::new(volume),
        }
    }

    fn persist(&self, volume: u8) {
        let _ = self.storage.store(STORAGE_KEY, &[volume]);
    }

    fn emit(&self, name: &str, volume: u8) {
        let envelope = Envelope::new(name, json!({ "volume": volume }));
        if let Ok(bytes) = serde_json::to_vec(&envelope) {
            let _ = self.event_queue.enqueue(bytes);
        }
    }

    pub fn current(&self) -> u8 {
        *self.volume.lock().unwrap()
    }

    pub fn current_alert_volume(&self) -> u8 {
        *self.alert_volume.lock().unwrap()
    }

    pub fn on_set_volume_directive(&self, volume: u8) {
        let clamped = volume.min(MAX_VOLUME);
        *self.volume.lock().unwrap() = clamped;
        self.control.set_volume(clamped);
        self.persist(clamped);
        self.emit("VolumeChanged", clamped);
    }

    pub fn on_adjust_volume_directive(&self, delta: i32) {
        let mut current = self.volume.lock().unwrap();
        let adjusted = (*current as i32 + delta).clamp(0, MAX_VOLUME as i32) as u8;
        *current = adjusted;
        self.control.set_volume(adjusted);
        self.persist(adjusted);
        self.emit("VolumeChanged", adjusted);
    }

    pub fn on_set_alert_volume_directive(&self, volume: u8) {
        let clamped = volume.min(MAX_VOLUME);
        *self.alert_volume.lock().unwrap() = clamped;
        self.emit("AlertVolumeChanged", clamped);
    }

    /// `speaker.volume` contribution to the `SynchronizeState` event payload.
    pub fn synchronize_state(&self) -> serde_json::Value {
        json!({ "volume": self.current() })
    }
}
