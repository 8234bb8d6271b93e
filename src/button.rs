//! Button Manager: translates a physical button press into a
//! `ButtonCommandIssued` event (SPEC_FULL.md §4.11).

use std::sync::Arc;

use serde_json::json;

use crate::json::Envelope;
use crate::regulator::RegulatorBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonCommand {
    Play,
    Next,
    Previous,
    Stop,
    Pause,
}

impl ButtonCommand {
    fn as_str(self) -> &'static str {
        match self {
            ButtonCommand::Play => "PLAY",
            ButtonCommand::Next => "NEXT",
            ButtonCommand::Previous => "PREVIOUS",
            ButtonCommand::Stop => "STOP",
            ButtonCommand::Pause => "PAUSE",
        }
    }
}

pub struct ButtonManager {
    event_queue: Arc<RegulatorBuffer>,
}

impl ButtonManager {
    pub fn new(event_queue: Arc<RegulatorBuffer>) -> Self {
        Self { event_queue }
    }

    pub fn on_button_press(&self, command: ButtonCommand) {
        let envelope = Envelope::new("ButtonCommandIssued", json!({ "command": command.as_str() }));
        if let Ok(bytes) = serde_json::to_vec(&envelope) {
            let _ = self.event_queue.enqueue(bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_press_emits_command_issued_event() {
        let events = Arc::new(RegulatorBuffer::new(4096));
        let mgr = ButtonManager::new(events.clone());
        mgr.on_button_press(ButtonCommand::Play);
        assert_eq!(events.len(), 1);
    }
}
