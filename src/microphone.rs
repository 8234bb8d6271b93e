//! Microphone Manager: hold/tap/wakeword capture sessions, the audio pump,
//! and `OpenMicrophone`/`CloseMicrophone` directive handling (SPEC_FULL.md §4.8).

use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::header::{prefix_offset, BinaryMessageHeader};
use crate::json::Envelope;
use crate::regulator::RegulatorBuffer;
use crate::sds::Reader;
use crate::task_pool::{ArcTaskPool, JobHandle};

const MIN_WAKEWORD_PREROLL_SAMPLES: u64 = 8_000;
const CONTENT_MESSAGE_TYPE: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicrophoneState {
    Closed,
    Open,
}

#[derive(Debug, Clone)]
pub enum Initiator {
    Hold { sample_index: u64 },
    Tap { sample_index: u64, profile: String },
    WakeWord { begin_index: u64, end_index: u64, profile: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicrophoneError {
    UnsupportedWakeWord,
    InsufficientPreroll,
}

impl Initiator {
    fn type_str(&self) -> &'static str {
        match self {
            Initiator::Hold { .. } => "HOLD",
            Initiator::Tap { .. } => "TAP",
            Initiator::WakeWord { .. } => "WAKEWORD",
        }
    }

    fn start_index(&self) -> u64 {
        match self {
            Initiator::Hold { sample_index } => *sample_index,
            Initiator::Tap { sample_index, .. } => *sample_index,
            Initiator::WakeWord { begin_index, .. } => *begin_index,
        }
    }

    fn payload_json(&self) -> Option<serde_json::Value> {
        match self {
            Initiator::Hold { .. } => None,
            Initiator::Tap { profile, .. } => Some(json!({ "profile": profile })),
            Initiator::WakeWord { profile, end_index, .. } => {
                Some(json!({ "profile": profile, "wakeWordEndIndex": end_index }))
            }
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self.payload_json() {
            Some(payload) => json!({ "type": self.type_str(), "payload": payload }),
            None => json!({ "type": self.type_str() }),
        }
    }
}

struct Inner {
    state: MicrophoneState,
    bytes_streamed: u64,
    pump_handle: Option<JobHandle>,
    open_deadline_handle: Option<JobHandle>,
    pending_echo: Option<Initiator>,
}

pub struct MicrophoneManager {
    reader: Reader,
    mic_queue: Arc<RegulatorBuffer>,
    event_queue: Arc<RegulatorBuffer>,
    task_pool: ArcTaskPool,
    publish_rate_ms: u64,
    pump_chunk_words: u64,
    inner: Mutex<Inner>,
}

impl MicrophoneManager {
    pub fn new(
        reader: Reader,
        mic_queue: Arc<RegulatorBuffer>,
        event_queue: Arc<RegulatorBuffer>,
        task_pool: ArcTaskPool,
        publish_rate_ms: u64,
        pump_chunk_words: u64,
    ) -> Self {
        Self {
            reader,
            mic_queue,
            event_queue,
            task_pool,
            publish_rate_ms,
            pump_chunk_words,
            inner: Mutex::new(Inner {
                state: MicrophoneState::Closed,
                bytes_streamed: 0,
                pump_handle: None,
                open_deadline_handle: None,
                pending_echo: None,
            }),
        }
    }

    pub fn state(&self) -> MicrophoneState {
        self.inner.lock().unwrap().state
    }

    /// Begin a capture session for any of the three start triggers. Wakeword
    /// starts reject any wake word other than `"ALEXA"` and any preroll
    /// shorter than 8,000 samples.
    pub fn start(self: &Arc<Self>, initiator: Initiator, wake_word: Option<&str>) -> Result<(), MicrophoneError> {
        if let Initiator::WakeWord { begin_index, .. } = &initiator {
            if wake_word != Some("ALEXA") {
                return Err(MicrophoneError::UnsupportedWakeWord);
            }
            // Caller is expected to have started capture far enough ahead of
            // begin_index; we only validate the preroll margin itself.
            if *begin_index < MIN_WAKEWORD_PREROLL_SAMPLES {
                return Err(MicrophoneError::InsufficientPreroll);
            }
        }

        let seek_index = initiator.start_index();
        let _ = self.reader.seek(seek_index as i64, crate::sds::SeekReference::Absolute);

        let bytes_streamed = {
            let mut inner = self.inner.lock().unwrap();
            inner.state = MicrophoneState::Open;
            inner.bytes_streamed = 0;
            inner.bytes_streamed
        };

        let (echoed, deadline_handle) = {
            let mut inner = self.inner.lock().unwrap();
            (inner.pending_echo.take(), inner.open_deadline_handle.take())
        };
        if let Some(h) = deadline_handle {
            self.task_pool.try_cancel(h);
        }
        // `offset` here is the byte offset into the outbound Microphone stream
        // (which always starts at 0), not the SDS seek index above — those
        // are independent: one positions the reader, the other labels the
        // first outbound chunk.
        self.emit_microphone_opened(bytes_streamed, echoed.as_ref().unwrap_or(&initiator));

        self.start_pump();
        Ok(())
    }

    /// `OpenMicrophone` directive: the app has some deadline to actually open
    /// the mic; if it opens in time the initiator is echoed back verbatim.
    pub fn on_open_microphone_directive(self: &Arc<Self>, deadline_ms: u64, initiator: Initiator) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.pending_echo = Some(initiator);
        }
        let this = self.clone();
        let handle = self.task_pool.schedule_after(deadline_ms, Box::new(move || {
            this.on_open_microphone_deadline();
        }));
        self.inner.lock().unwrap().open_deadline_handle = Some(handle);
    }

    fn on_open_microphone_deadline(&self) {
        let still_pending = {
            let mut inner = self.inner.lock().unwrap();
            inner.open_deadline_handle = None;
            inner.pending_echo.take().is_some()
        };
        if still_pending {
            let envelope = Envelope::new("OpenMicrophoneTimedOut", json!({}));
            if let Ok(bytes) = serde_json::to_vec(&envelope) {
                let _ = self.event_queue.enqueue(bytes);
            }
        }
    }

    fn emit_microphone_opened(&self, offset: u64, initiator: &Initiator) {
        let payload = json!({
            "offset": offset,
            "initiator": initiator.to_json(),
        });
        let envelope = Envelope::new("MicrophoneOpened", payload);
        if let Ok(bytes) = serde_json::to_vec(&envelope) {
            let _ = self.event_queue.enqueue(bytes);
        }
    }

    fn start_pump(self: &Arc<Self>) {
        let this = self.clone();
        let handle = self.task_pool.schedule_periodic(self.publish_rate_ms, Arc::new(move || {
            this.pump_once();
        }));
        self.inner.lock().unwrap().pump_handle = Some(handle);
    }

    fn pump_once(&self) {
        if self.state() != MicrophoneState::Open {
            return;
        }
        let Ok(bytes) = self.reader.read(self.pump_chunk_words) else {
            return;
        };
        if bytes.is_empty() {
            return;
        }
        let offset_bytes = {
            let mut inner = self.inner.lock().unwrap();
            let offset = inner.bytes_streamed;
            inner.bytes_streamed += bytes.len() as u64;
            offset
        };
        let with_offset = prefix_offset(offset_bytes, &bytes);
        let framed = BinaryMessageHeader::serialize(CONTENT_MESSAGE_TYPE, 1, &with_offset);
        let _ = self.mic_queue.enqueue(framed);
    }

    /// `CloseMicrophone`, from a directive or a local trigger.
    pub fn close(&self) {
        let (handle, offset) = {
            let mut inner = self.inner.lock().unwrap();
            inner.state = MicrophoneState::Closed;
            (inner.pump_handle.take(), inner.bytes_streamed)
        };
        if let Some(h) = handle {
            self.task_pool.try_cancel(h);
        }
        let envelope = Envelope::new("MicrophoneClosed", json!({ "offset": offset }));
        if let Ok(bytes) = serde_json::to_vec(&envelope) {
            let _ = self.event_queue.enqueue(bytes);
        }
    }
}
