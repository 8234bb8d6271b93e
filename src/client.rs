//! Client: wires every component together behind the owner-free-interfaces
//! pattern (SPEC_FULL.md §2, design note 9). The client holds `Arc`s to its
//! collaborators and threads capability objects between them at
//! construction time; no component owns another.

use std::sync::{Arc, Mutex};

use log::warn;
use serde_json::Value;

use crate::alerts::AlertManager;
use crate::button::{ButtonCommand, ButtonManager};
use crate::capabilities::{CapabilitiesConfig, CapabilitiesSender};
use crate::capability::{ArcClock, ArcSpeakerRenderer, ArcStorage, ArcUxObserver, ArcVolumeControl};
use crate::clock::ClockManager;
use crate::connection::{ConnectionCallbacks, ConnectionManager};
use crate::directives::DirectiveRegistry;
use crate::dispatcher::Dispatcher;
use crate::emitter::Emitter;
use crate::json::Envelope;
use crate::microphone::{Initiator, MicrophoneManager};
use crate::regulator::{EmitMode, Regulator, RegulatorBuffer};
use crate::sds::{ReaderPolicy, StreamDataBuffer, Writer, WriterPolicy};
use crate::secret_manager::SecretManager;
use crate::speaker::SpeakerManager;
use crate::task_pool::{ArcTaskPool, JobHandle, TaskPool};
use crate::topic::Topic;
use crate::transport::ArcTransport;
use crate::ux::UxStateManager;
use crate::volume::VolumeManager;

const MIC_WORD_SIZE_BYTES: usize = 2;
const MIC_RING_WORDS: u64 = 160_000;
const MIC_MAX_READERS: usize = 1;
const OUTBOUND_EMITTER_TOPICS: [Topic; 3] = [Topic::Event, Topic::Microphone, Topic::CapabilitiesPublish];

/// Construction-time parameters that aren't themselves capability objects.
pub struct ClientConfig {
    pub topic_root: String,
    pub aws_account_id: String,
    pub client_id: String,
    pub max_message_size: usize,
    pub emit_mode: EmitMode,
    pub publish_rate_ms: u64,
    pub mic_pump_chunk_words: u64,
    pub speaker_render_cadence_ms: u64,
    pub speaker_high_watermark: usize,
    pub speaker_low_watermark: usize,
    pub capabilities: CapabilitiesConfig,
}

/// Host-supplied collaborators (SPEC_FULL.md §5, §6).
pub struct ClientCapabilities {
    pub transport: ArcTransport,
    pub task_pool: ArcTaskPool,
    pub storage: ArcStorage,
    pub clock: ArcClock,
    pub volume_control: ArcVolumeControl,
    pub ux_observer: ArcUxObserver,
    pub speaker_renderer: ArcSpeakerRenderer,
    pub initial_secret: Vec<u8>,
}

struct OutboundLane {
    topic: Topic,
    queue: Arc<RegulatorBuffer>,
    emitter: Arc<Emitter>,
}

pub struct Client {
    topic_root: String,
    transport: ArcTransport,
    task_pool: ArcTaskPool,
    publish_rate_ms: u64,
    secret_manager: Arc<SecretManager>,
    connection: Arc<ConnectionManager>,
    dispatcher: Arc<Dispatcher>,
    regulator: Regulator,
    lanes: Vec<OutboundLane>,
    event_queue: Arc<RegulatorBuffer>,
    microphone: Arc<MicrophoneManager>,
    microphone_writer: Arc<Writer>,
    speaker: Arc<SpeakerManager>,
    capabilities_sender: Arc<CapabilitiesSender>,
    alerts: Arc<AlertManager>,
    ux: Arc<UxStateManager>,
    clock: Arc<ClockManager>,
    buttons: Arc<ButtonManager>,
    volume: Arc<VolumeManager>,
    tick_handle: Mutex<Option<JobHandle>>,
}

impl Client {
    pub fn new(config: ClientConfig, caps: ClientCapabilities) -> Arc<Self> {
        let secret_manager = Arc::new(SecretManager::new(caps.initial_secret));

        let mut lanes = Vec::new();
        for topic in OUTBOUND_EMITTER_TOPICS {
            lanes.push(OutboundLane {
                topic,
                queue: Arc::new(RegulatorBuffer::new(config.max_message_size)),
                emitter: Arc::new(Emitter::new(topic, 0)),
            });
        }
        let event_queue = lanes.iter().find(|l| l.topic == Topic::Event).unwrap().queue.clone();
        let mic_outbound_queue = lanes.iter().find(|l| l.topic == Topic::Microphone).unwrap().queue.clone();
        let capabilities_queue =
            lanes.iter().find(|l| l.topic == Topic::CapabilitiesPublish).unwrap().queue.clone();

        let directive_registry = Arc::new(DirectiveRegistry::new());

        let capabilities_sender = Arc::new(CapabilitiesSender::new(
            config.capabilities,
            capabilities_queue,
            Box::new(|_state, _description| {}),
        ));

        let capabilities_for_connect = capabilities_sender.clone();
        let connection = Arc::new(ConnectionManager::new(
            config.topic_root.clone(),
            config.aws_account_id.clone(),
            config.client_id.clone(),
            caps.transport.clone(),
            caps.task_pool.clone(),
            ConnectionCallbacks {
                on_connected: Box::new(move || capabilities_for_connect.publish()),
                on_connect_rejected: Box::new(|code| warn!("connection rejected: {code:?}")),
                on_disconnected: Box::new(|code| warn!("disconnected: {code:?}")),
            },
        ));

        let sds = StreamDataBuffer::new(MIC_WORD_SIZE_BYTES, MIC_RING_WORDS, MIC_MAX_READERS)
            .expect("fixed word size and reader count are always valid");
        let microphone_writer =
            Arc::new(sds.create_writer(WriterPolicy::Nonblocking, false).expect("first writer always succeeds"));
        let microphone_reader =
            sds.create_reader(None, ReaderPolicy::Nonblocking, true, false).expect("first reader always succeeds");
        let microphone = Arc::new(MicrophoneManager::new(
            microphone_reader,
            mic_outbound_queue,
            event_queue.clone(),
            caps.task_pool.clone(),
            config.publish_rate_ms,
            config.mic_pump_chunk_words,
        ));

        let speaker = Arc::new(SpeakerManager::new(
            caps.speaker_renderer,
            event_queue.clone(),
            caps.task_pool.clone(),
            config.speaker_render_cadence_ms,
            config.speaker_high_watermark,
            config.speaker_low_watermark,
        ));

        let alerts = Arc::new(AlertManager::load(caps.storage.clone(), event_queue.clone()));
        let ux = Arc::new(UxStateManager::new(caps.ux_observer));
        let clock = Arc::new(ClockManager::new(caps.clock, event_queue.clone()));
        let buttons = Arc::new(ButtonManager::new(event_queue.clone()));
        let volume = Arc::new(VolumeManager::load(caps.volume_control, caps.storage, event_queue.clone()));

        let speaker_for_sink = speaker.clone();
        let dispatcher = Arc::new(Dispatcher::new(
            config.topic_root.clone(),
            secret_manager.clone(),
            directive_registry.clone(),
            event_queue.clone(),
            connection.clone(),
            caps.task_pool.clone(),
            Arc::new(move |body: &[u8], seq: u32| speaker_for_sink.on_speaker_payload(body, seq)),
        ));

        let client = Arc::new(Self {
            topic_root: config.topic_root,
            transport: caps.transport,
            task_pool: caps.task_pool,
            publish_rate_ms: config.publish_rate_ms,
            secret_manager,
            connection,
            dispatcher,
            regulator: Regulator::new(config.emit_mode),
            lanes,
            event_queue,
            microphone,
            microphone_writer,
            speaker,
            capabilities_sender,
            alerts,
            ux,
            clock,
            buttons,
            volume,
            tick_handle: Mutex::new(None),
        });

        client.register_directive_handlers(&directive_registry);

        let for_inbound = client.clone();
        client
            .transport
            .set_inbound_handler(Arc::new(move |full_topic, payload| for_inbound.dispatcher.on_message(full_topic, payload)));

        client
    }

    /// A write handle for the host's microphone capture front-end to push
    /// captured samples into the microphone ring buffer.
    pub fn microphone_writer(&self) -> Arc<Writer> {
        self.microphone_writer.clone()
    }

    pub fn microphone(&self) -> Arc<MicrophoneManager> {
        self.microphone.clone()
    }

    pub fn speaker(&self) -> Arc<SpeakerManager> {
        self.speaker.clone()
    }

    pub fn start(self: &Arc<Self>) {
        self.connection.connect();

        let this = self.clone();
        let handle = self.task_pool.schedule_periodic(
            self.publish_rate_ms,
            Arc::new(move || this.tick_outbound()),
        );
        *self.tick_handle.lock().unwrap() = Some(handle);
    }

    fn tick_outbound(&self) {
        for lane in &self.lanes {
            let secret_manager = &self.secret_manager;
            let emitter = lane.emitter.clone();
            let transport = self.transport.clone();
            let full_topic = lane.topic.full_topic(&self.topic_root);
            self.regulator.tick(&lane.queue, |chunk, remaining_bytes, remaining_chunks| {
                match emitter.on_chunk(chunk, remaining_bytes, remaining_chunks, secret_manager) {
                    Ok(Some(framed)) => transport.publish(&full_topic, &framed).is_ok(),
                    Ok(None) => true,
                    Err(_) => false,
                }
            });
        }
    }

    /// `SynchronizeState` event aggregating the per-component contributions.
    pub fn emit_synchronize_state(&self) {
        let payload = serde_json::json!({
            "speaker": self.volume.synchronize_state(),
            "alerts": self.alerts.synchronize_state(),
        });
        let envelope = Envelope::new("SynchronizeState", payload);
        if let Ok(bytes) = serde_json::to_vec(&envelope) {
            let _ = self.event_queue.enqueue(bytes);
        }
    }

    pub fn on_button_press(&self, command: ButtonCommand) {
        self.buttons.on_button_press(command);
    }

    fn register_directive_handlers(self: &Arc<Self>, registry: &DirectiveRegistry) {
        let mic = self.microphone.clone();
        registry.register(
            "OpenMicrophone",
            Arc::new(move |payload: &Value, _len, _seq, _index| {
                let Some(initiator) = parse_initiator(payload.get("initiator").unwrap_or(&Value::Null)) else {
                    return;
                };
                let deadline_ms = payload.get("deadlineMs").and_then(Value::as_u64).unwrap_or(0);
                mic.on_open_microphone_directive(deadline_ms, initiator);
            }),
        );

        let mic = self.microphone.clone();
        registry.register(
            "CloseMicrophone",
            Arc::new(move |_payload: &Value, _len, _seq, _index| {
                mic.close();
            }),
        );

        let volume = self.volume.clone();
        registry.register(
            "SetVolume",
            Arc::new(move |payload: &Value, _len, _seq, _index| {
                if let Some(v) = payload.get("volume").and_then(Value::as_u64) {
                    volume.on_set_volume_directive(v.min(u8::MAX as u64) as u8);
                }
            }),
        );

        let volume = self.volume.clone();
        registry.register(
            "AdjustVolume",
            Arc::new(move |payload: &Value, _len, _seq, _index| {
                if let Some(delta) = payload.get("delta").and_then(Value::as_i64) {
                    volume.on_adjust_volume_directive(delta as i32);
                }
            }),
        );

        let alerts = self.alerts.clone();
        registry.register(
            "SetAlert",
            Arc::new(move |payload: &Value, _len, _seq, _index| {
                if let Some(token) = payload.get("token").and_then(Value::as_str) {
                    alerts.set_alert(token.to_string());
                }
            }),
        );

        let alerts = self.alerts.clone();
        registry.register(
            "DeleteAlert",
            Arc::new(move |payload: &Value, _len, _seq, _index| {
                if let Some(token) = payload.get("token").and_then(Value::as_str) {
                    alerts.delete_alert(token.to_string());
                }
            }),
        );

        let clock = self.clock.clone();
        registry.register(
            "SynchronizeClock",
            Arc::new(move |_payload: &Value, _len, _seq, _index| {
                clock.on_synchronize_clock_directive();
            }),
        );

        let ux = self.ux.clone();
        registry.register(
            "SetAttentionState",
            Arc::new(move |payload: &Value, _len, _seq, _index| {
                if let Some(state) = payload.get("state").and_then(Value::as_str) {
                    ux.on_set_attention_state(state);
                }
            }),
        );

        let capabilities_sender = self.capabilities_sender.clone();
        registry.register(
            "CapabilitiesAcknowledge",
            Arc::new(move |payload: &Value, _len, _seq, _index| {
                let accepted = payload.get("accepted").and_then(Value::as_bool).unwrap_or(false);
                let description = payload.get("description").and_then(Value::as_str).map(str::to_string);
                capabilities_sender.on_acknowledge(accepted, description);
            }),
        );

        registry.register(
            "Exception",
            Arc::new(move |payload: &Value, _len, _seq, _index| {
                warn!("service reported exception: {payload}");
            }),
        );

        let client = self.clone();
        registry.register(
            "RotateSecret",
            Arc::new(move |payload: &Value, _len, _seq, _index| {
                client.on_rotate_secret_directive(payload);
            }),
        );
    }

    fn on_rotate_secret_directive(&self, payload: &Value) {
        use base64::Engine;
        let Some(secret_b64) = payload.get("secret").and_then(Value::as_str) else {
            return;
        };
        let Ok(new_secret) = base64::engine::general_purpose::STANDARD.decode(secret_b64) else {
            return;
        };
        let directive_seq = payload.get("directiveSequenceNumber").and_then(Value::as_u64).unwrap_or(0) as u32;
        let speaker_seq = payload.get("speakerSequenceNumber").and_then(Value::as_u64).unwrap_or(0) as u32;

        let next_sequence_for = |topic: Topic| -> u32 {
            self.lanes
                .iter()
                .find(|l| l.topic == topic)
                .map(|l| l.emitter.next_sequence_number())
                .unwrap_or(0)
        };

        let Ok(rotated) = self.secret_manager.rotate(new_secret, directive_seq, speaker_seq, next_sequence_for) else {
            return;
        };

        let envelope = Envelope::new(
            "SecretRotated",
            serde_json::json!({
                "sequenceNumber": rotated.event_sequence_number,
                "microphoneSequenceNumber": rotated.microphone_sequence_number,
            }),
        );
        let Ok(bytes) = serde_json::to_vec(&envelope) else {
            self.secret_manager.revert_last_rotation();
            return;
        };
        if self.event_queue.enqueue(bytes).is_err() {
            self.secret_manager.revert_last_rotation();
        }
    }
}

fn parse_initiator(value: &Value) -> Option<Initiator> {
    let type_str = value.get("type").and_then(Value::as_str)?;
    match type_str {
        "HOLD" => Some(Initiator::Hold { sample_index: value.get("sampleIndex").and_then(Value::as_u64)? }),
        "TAP" => Some(Initiator::Tap {
            sample_index: value.get("sampleIndex").and_then(Value::as_u64)?,
            profile: value.get("profile").and_then(Value::as_str).unwrap_or("NEAR_FIELD").to_string(),
        }),
        "WAKEWORD" => Some(Initiator::WakeWord {
            begin_index: value.get("beginIndex").and_then(Value::as_u64)?,
            end_index: value.get("endIndex").and_then(Value::as_u64)?,
            profile: value.get("profile").and_then(Value::as_str).unwrap_or("NEAR_FIELD").to_string(),
        }),
        _ => None,
    }
}
