//! Clock Manager: answers `SynchronizeClock` directives and exposes the
//! host clock to deadline math elsewhere (SPEC_FULL.md §4.11).

use std::sync::Arc;

use serde_json::json;

use crate::capability::ArcClock;
use crate::json::Envelope;
use crate::regulator::RegulatorBuffer;

pub struct ClockManager {
    clock: ArcClock,
    event_queue: Arc<RegulatorBuffer>,
}

impl ClockManager {
    pub fn new(clock: ArcClock, event_queue: Arc<RegulatorBuffer>) -> Self {
        Self { clock, event_queue }
    }

    pub fn now_epoch_seconds(&self) -> u64 {
        self.clock.epoch_seconds()
    }

    pub fn on_synchronize_clock_directive(&self) {
        let envelope = Envelope::new(
            "SynchronizeClock",
            json!({ "epochSeconds": self.clock.epoch_seconds() }),
        );
        if let Ok(bytes) = serde_json::to_vec(&envelope) {
            let _ = self.event_queue.enqueue(bytes);
        }
    }
}
