//! Speaker Manager (interface-level, SPEC_FULL.md §4.9): consumes decrypted
//! Speaker binary blobs, fragments into frames, and renders them through the
//! host's `SpeakerRenderer` capability at a fixed cadence.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::capability::ArcSpeakerRenderer;
use crate::header::{split_offset, BinaryMessageHeader};
use crate::json::Envelope;
use crate::regulator::RegulatorBuffer;
use crate::task_pool::{ArcTaskPool, JobHandle};

const CONTENT_TYPE: u8 = 0;
const MARKER_TYPE: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerState {
    Closed,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Good,
    OverrunWarning,
    UnderrunWarning,
}

impl BufferState {
    fn as_str(self) -> &'static str {
        match self {
            BufferState::Good => "GOOD",
            BufferState::OverrunWarning => "OVERRUN_WARNING",
            BufferState::UnderrunWarning => "UNDERRUN_WARNING",
        }
    }
}

struct Inner {
    state: SpeakerState,
    frames: VecDeque<Vec<u8>>,
    buffer_state: BufferState,
    render_handle: Option<JobHandle>,
}

pub struct SpeakerManager {
    renderer: ArcSpeakerRenderer,
    event_queue: Arc<RegulatorBuffer>,
    task_pool: ArcTaskPool,
    render_cadence_ms: u64,
    high_watermark: usize,
    low_watermark: usize,
    inner: Mutex<Inner>,
}

impl SpeakerManager {
    pub fn new(
        renderer: ArcSpeakerRenderer,
        event_queue: Arc<RegulatorBuffer>,
        task_pool: ArcTaskPool,
        render_cadence_ms: u64,
        high_watermark: usize,
        low_watermark: usize,
    ) -> Self {
        Self {
            renderer,
            event_queue,
            task_pool,
            render_cadence_ms,
            high_watermark,
            low_watermark,
            inner: Mutex::new(Inner {
                state: SpeakerState::Closed,
                frames: VecDeque::new(),
                buffer_state: BufferState::Good,
                render_handle: None,
            }),
        }
    }

    pub fn state(&self) -> SpeakerState {
        self.inner.lock().unwrap().state
    }

    fn emit(&self, name: &str, payload: serde_json::Value) {
        let envelope = Envelope::new(name, payload);
        if let Ok(bytes) = serde_json::to_vec(&envelope) {
            let _ = self.event_queue.enqueue(bytes);
        }
    }

    /// Feed one decrypted Speaker binary message.
    pub fn on_speaker_payload(self: &Arc<Self>, body: &[u8], sequence_number: u32) {
        let Ok((header, data)) = BinaryMessageHeader::parse(body) else {
            return;
        };
        match header.message_type {
            CONTENT_TYPE => {
                let Ok((_offset, frame)) = split_offset(data) else {
                    return;
                };
                self.open_if_needed();
                self.push_frame(frame.to_vec());
            }
            MARKER_TYPE => {
                self.emit(
                    "SpeakerMarkerEncountered",
                    json!({ "sequenceNumber": sequence_number }),
                );
            }
            _ => {}
        }
    }

    fn open_if_needed(self: &Arc<Self>) {
        let needs_open = {
            let inner = self.inner.lock().unwrap();
            inner.state == SpeakerState::Closed
        };
        if !needs_open {
            return;
        }
        {
            let mut inner = self.inner.lock().unwrap();
            inner.state = SpeakerState::Open;
        }
        self.emit("SpeakerOpened", json!({}));
        self.start_render_pump();
    }

    fn start_render_pump(self: &Arc<Self>) {
        let this = self.clone();
        let handle = self.task_pool.schedule_periodic(self.render_cadence_ms, Arc::new(move || {
            this.render_once();
        }));
        self.inner.lock().unwrap().render_handle = Some(handle);
    }

    fn push_frame(&self, frame: Vec<u8>) {
        let transition = {
            let mut inner = self.inner.lock().unwrap();
            inner.frames.push_back(frame);
            self.buffer_transition(&mut inner)
        };
        if let Some(state) = transition {
            self.emit("BufferStateChanged", json!({ "state": state.as_str() }));
        }
    }

    fn render_once(&self) {
        let (frame, transition) = {
            let mut inner = self.inner.lock().unwrap();
            let frame = inner.frames.pop_front();
            let transition = self.buffer_transition(&mut inner);
            (frame, transition)
        };
        if let Some(f) = frame {
            self.renderer.render(&f);
        }
        if let Some(state) = transition {
            self.emit("BufferStateChanged", json!({ "state": state.as_str() }));
        }
    }

    /// Returns `Some(new_state)` only when the watermark crossing changes the
    /// buffer state (debounced — no event on every tick).
    fn buffer_transition(&self, inner: &mut Inner) -> Option<BufferState> {
        let len = inner.frames.len();
        let new_state = if len >= self.high_watermark {
            BufferState::OverrunWarning
        } else if len <= self.low_watermark {
            BufferState::UnderrunWarning
        } else {
            BufferState::Good
        };
        if new_state != inner.buffer_state {
            inner.buffer_state = new_state;
            Some(new_state)
        } else {
            None
        }
    }

    pub fn close(&self) {
        let handle = {
            let mut inner = self.inner.lock().unwrap();
            inner.state = SpeakerState::Closed;
            inner.frames.clear();
            inner.render_handle.take()
        };
        if let Some(h) = handle {
            self.task_pool.try_cancel(h);
        }
        self.emit("SpeakerClosed", json!({}));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_pool::ManualTaskPool;
    use std::sync::Mutex as StdMutex;

    struct RecordingRenderer {
        rendered: StdMutex<Vec<Vec<u8>>>,
    }

    impl crate::capability::SpeakerRenderer for RecordingRenderer {
        fn render(&self, frame: &[u8]) {
            self.rendered.lock().unwrap().push(frame.to_vec());
        }
    }

    fn content_message(offset: u64, data: &[u8]) -> Vec<u8> {
        let with_offset = crate::header::prefix_offset(offset, data);
        BinaryMessageHeader::serialize(CONTENT_TYPE, 1, &with_offset)
    }

    fn marker_message() -> Vec<u8> {
        BinaryMessageHeader::serialize(MARKER_TYPE, 1, &[])
    }

    #[test]
    fn content_message_opens_speaker_and_queues_frame() {
        let renderer = Arc::new(RecordingRenderer { rendered: StdMutex::new(Vec::new()) });
        let events = Arc::new(RegulatorBuffer::new(65536));
        let pool = Arc::new(ManualTaskPool::new());
        let mgr = Arc::new(SpeakerManager::new(renderer, events.clone(), pool.clone(), 20, 5, 0));

        mgr.on_speaker_payload(&content_message(0, b"abc"), 0);
        assert_eq!(mgr.state(), SpeakerState::Open);
        assert_eq!(events.len(), 1); // SpeakerOpened

        pool.advance(20);
        assert_eq!(events.len(), 2); // UnderrunWarning -> Good transition after drain... at least one more event
    }

    #[test]
    fn marker_message_emits_marker_event_without_opening() {
        let renderer = Arc::new(RecordingRenderer { rendered: StdMutex::new(Vec::new()) });
        let events = Arc::new(RegulatorBuffer::new(65536));
        let pool = Arc::new(ManualTaskPool::new());
        let mgr = Arc::new(SpeakerManager::new(renderer, events.clone(), pool, 20, 5, 0));

        mgr.on_speaker_payload(&marker_message(), 3);
        assert_eq!(events.len(), 1);
        assert_eq!(mgr.state(), SpeakerState::Closed);
    }

    #[test]
    fn close_emits_speaker_closed_and_cancels_pump() {
        let renderer = Arc::new(RecordingRenderer { rendered: StdMutex::new(Vec::new()) });
        let events = Arc::new(RegulatorBuffer::new(65536));
        let pool = Arc::new(ManualTaskPool::new());
        let mgr = Arc::new(SpeakerManager::new(renderer, events.clone(), pool, 20, 5, 0));
        mgr.on_speaker_payload(&content_message(0, b"abc"), 0);
        mgr.close();
        assert_eq!(mgr.state(), SpeakerState::Closed);
    }
}
