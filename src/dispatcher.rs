//! Dispatcher: routes inbound transport messages to sequencers, decrypts
//! sequenced payloads, and fans directive/ack elements out to registered
//! handlers (SPEC_FULL.md §4.6).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::connection::ConnectionManager;
use crate::directives::DirectiveRegistry;
use crate::error::DisconnectCode;
use crate::exception::ExceptionManager;
use crate::header::CommonHeader;
use crate::json::unwrap_array;
use crate::regulator::RegulatorBuffer;
use crate::secret_manager::SecretManager;
use crate::sequencer::{Sequencer, SequencerSink};
use crate::task_pool::ArcTaskPool;
use crate::topic::{Direction, Topic};

const SEQUENCER_TIMEOUT_MS: u64 = 2_000;

#[derive(Default)]
struct CollectingSink {
    sequenced: Vec<Vec<u8>>,
    timed_out: bool,
}

impl SequencerSink for CollectingSink {
    fn on_sequenced(&mut self, buf: Vec<u8>) {
        self.sequenced.push(buf);
    }
    fn on_timeout(&mut self) {
        self.timed_out = true;
    }
}

pub struct Dispatcher {
    topic_root: String,
    secret_manager: Arc<SecretManager>,
    sequencers: HashMap<Topic, Mutex<Sequencer>>,
    directive_registry: Arc<DirectiveRegistry>,
    event_queue: Arc<RegulatorBuffer>,
    connection: Arc<ConnectionManager>,
    task_pool: ArcTaskPool,
    speaker_sink: Arc<dyn Fn(&[u8], u32) + Send + Sync>,
}

const SEQUENCED_ENCRYPTED_INBOUND: [Topic; 3] = [Topic::Directive, Topic::Speaker, Topic::CapabilitiesAcknowledge];

impl Dispatcher {
    pub fn new(
        topic_root: String,
        secret_manager: Arc<SecretManager>,
        directive_registry: Arc<DirectiveRegistry>,
        event_queue: Arc<RegulatorBuffer>,
        connection: Arc<ConnectionManager>,
        task_pool: ArcTaskPool,
        speaker_sink: Arc<dyn Fn(&[u8], u32) + Send + Sync>,
    ) -> Self {
        let mut sequencers = HashMap::new();
        for topic in SEQUENCED_ENCRYPTED_INBOUND {
            sequencers.insert(topic, Mutex::new(Sequencer::new(64, 0)));
        }
        Self {
            topic_root,
            secret_manager,
            sequencers,
            directive_registry,
            event_queue,
            connection,
            task_pool,
            speaker_sink,
        }
    }

    fn strip_leaf<'a>(&self, full_topic: &'a str) -> Option<&'a str> {
        full_topic.strip_prefix(&self.topic_root)?.strip_prefix('/')
    }

    /// Entry point for every message the transport callback delivers.
    pub fn on_message(self: &Arc<Self>, full_topic: &str, payload: &[u8]) {
        let Some(leaf) = self.strip_leaf(full_topic) else {
            return;
        };
        let Some(topic) = Topic::from_leaf(leaf) else {
            return;
        };
        if topic.direction() != Direction::Inbound {
            return; // not ours to consume
        }

        if topic == Topic::ConnectionFromService {
            self.handle_connection_from_service(payload);
            return;
        }

        self.handle_sequenced_topic(topic, payload);
    }

    fn handle_connection_from_service(&self, payload: &[u8]) {
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(payload) else {
            ExceptionManager::new(&self.event_queue).malformed_message(Topic::ConnectionFromService, None, None);
            return;
        };
        let name = value.pointer("/header/name").and_then(|v| v.as_str()).unwrap_or("");
        let inner = value.get("payload").cloned().unwrap_or_default();
        match name {
            "ConnectionAcknowledge" => {
                let code = inner.get("code").and_then(|v| v.as_str()).unwrap_or("UNKNOWN_FAILURE");
                let description = inner.get("description").and_then(|v| v.as_str());
                self.connection.on_ack(code, description);
            }
            "Disconnect" => {
                let code = inner.get("code").and_then(|v| v.as_str()).unwrap_or("GOING_OFFLINE");
                self.connection.on_service_disconnect(code);
            }
            _ => {
                ExceptionManager::new(&self.event_queue).malformed_message(Topic::ConnectionFromService, None, None);
            }
        }
    }

    fn handle_sequenced_topic(self: &Arc<Self>, topic: Topic, payload: &[u8]) {
        if payload.len() < 4 {
            ExceptionManager::new(&self.event_queue).malformed_message(topic, None, None);
            return;
        }
        let seq = u32::from_le_bytes(payload[0..4].try_into().unwrap());

        let Some(mutex) = self.sequencers.get(&topic) else {
            return;
        };
        let mut sink = CollectingSink::default();
        let arm_result = {
            let mut seq_guard = mutex.lock().unwrap();
            seq_guard.write(seq, payload.to_vec(), &mut sink)
        };
        match arm_result {
            Ok(should_arm) => {
                if should_arm {
                    let this = self.clone();
                    self.task_pool.schedule_after(
                        SEQUENCER_TIMEOUT_MS,
                        Box::new(move || this.on_sequencer_timer_fire(topic)),
                    );
                }
            }
            Err(_window_overflow) => {
                self.connection.disconnect(DisconnectCode::UnexpectedSequenceNumber, None);
                return;
            }
        }

        for buf in sink.sequenced {
            self.process_sequenced(topic, buf);
        }
    }

    fn on_sequencer_timer_fire(self: &Arc<Self>, topic: Topic) {
        let Some(mutex) = self.sequencers.get(&topic) else {
            return;
        };
        let mut sink = CollectingSink::default();
        {
            let mut guard = mutex.lock().unwrap();
            guard.on_timer_fire(&mut sink);
        }
        if sink.timed_out {
            self.connection.disconnect(DisconnectCode::UnexpectedSequenceNumber, None);
        }
        for buf in sink.sequenced {
            self.process_sequenced(topic, buf);
        }
    }

    fn process_sequenced(&self, topic: Topic, buf: Vec<u8>) {
        let exceptions = ExceptionManager::new(&self.event_queue);
        let (hdr, encrypted_region) = match CommonHeader::parse(&buf) {
            Ok(parsed) => parsed,
            Err(_) => {
                exceptions.malformed_message(topic, None, None);
                return;
            }
        };

        let plaintext = match self.secret_manager.decrypt(topic, hdr.sequence_number_plain, &hdr.iv, &hdr.mac, encrypted_region) {
            Ok(p) => p,
            Err(_) => {
                self.connection.disconnect(DisconnectCode::EncryptionError, None);
                return;
            }
        };
        if plaintext.len() < 4 {
            exceptions.malformed_message(topic, Some(hdr.sequence_number_plain), None);
            return;
        }
        let seq_enc = u32::from_le_bytes(plaintext[0..4].try_into().unwrap());
        if seq_enc != hdr.sequence_number_plain {
            self.connection.disconnect(DisconnectCode::MessageTampered, None);
            return;
        }
        let real_payload = &plaintext[4..];

        match topic {
            Topic::Directive | Topic::CapabilitiesAcknowledge => {
                let array_name = topic.array_name().unwrap();
                match unwrap_array(array_name, real_payload) {
                    Ok(envelopes) => {
                        for (index, envelope) in envelopes.into_iter().enumerate() {
                            let found = self.directive_registry.dispatch(
                                &envelope.header.name,
                                &envelope.payload,
                                real_payload.len(),
                                hdr.sequence_number_plain,
                                index,
                            );
                            if !found {
                                exceptions.malformed_message(topic, Some(hdr.sequence_number_plain), Some(index));
                            }
                        }
                    }
                    Err(_) => exceptions.malformed_message(topic, Some(hdr.sequence_number_plain), None),
                }
            }
            Topic::Speaker => {
                (self.speaker_sink)(real_payload, hdr.sequence_number_plain);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionCallbacks;
    use crate::task_pool::ManualTaskPool;
    use crate::transport::RecordingTransport;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn secrets() -> Arc<SecretManager> {
        Arc::new(SecretManager::new(vec![0x11u8; 32]))
    }

    fn frame(secrets: &SecretManager, topic: Topic, seq: u32, payload: &[u8]) -> Vec<u8> {
        let (iv, mac, ct) = secrets.encrypt(topic, seq, payload).unwrap();
        CommonHeader::serialize(seq, iv, mac, &ct)
    }

    fn make_dispatcher(secrets: Arc<SecretManager>) -> (Arc<Dispatcher>, Arc<DirectiveRegistry>, Arc<RegulatorBuffer>) {
        let transport = Arc::new(RecordingTransport::new());
        let pool = Arc::new(ManualTaskPool::new());
        let connection = Arc::new(ConnectionManager::new(
            "root".to_string(),
            "acct".to_string(),
            "client".to_string(),
            transport,
            pool.clone(),
            ConnectionCallbacks {
                on_connected: Box::new(|| {}),
                on_connect_rejected: Box::new(|_| {}),
                on_disconnected: Box::new(|_| {}),
            },
        ));
        let registry = Arc::new(DirectiveRegistry::new());
        let events = Arc::new(RegulatorBuffer::new(4096));
        let dispatcher = Arc::new(Dispatcher::new(
            "root".to_string(),
            secrets,
            registry.clone(),
            events.clone(),
            connection,
            pool,
            Arc::new(|_payload, _seq| {}),
        ));
        (dispatcher, registry, events)
    }

    #[test]
    fn unknown_leaf_topic_is_discarded_silently() {
        let (dispatcher, _registry, events) = make_dispatcher(secrets());
        dispatcher.on_message("root/not-a-real-topic", b"x");
        assert!(events.is_empty());
    }

    #[test]
    fn outbound_topic_delivered_inbound_is_dropped() {
        let (dispatcher, _registry, events) = make_dispatcher(secrets());
        dispatcher.on_message("root/event", b"x");
        assert!(events.is_empty());
    }

    #[test]
    fn directive_array_dispatches_to_registered_handler() {
        let secrets = secrets();
        let (dispatcher, registry, events) = make_dispatcher(secrets.clone());
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        registry.register("SetVolume", Arc::new(move |_p, _l, _s, _i| { c.fetch_add(1, Ordering::SeqCst); }));

        let array_payload = format!(
            "{{\"directives\":[{{\"header\":{{\"name\":\"SetVolume\",\"messageId\":\"m\"}},\"payload\":{}}}]}}",
            json!({"volume": 5})
        );
        let wire = frame(&secrets, Topic::Directive, 0, array_payload.as_bytes());
        dispatcher.on_message("root/directive", &wire);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(events.is_empty());
    }

    #[test]
    fn unknown_directive_name_emits_malformed_message() {
        let secrets = secrets();
        let (dispatcher, _registry, events) = make_dispatcher(secrets.clone());
        let array_payload = "{\"directives\":[{\"header\":{\"name\":\"NoSuchThing\",\"messageId\":\"m\"},\"payload\":{}}]}";
        let wire = frame(&secrets, Topic::Directive, 0, array_payload.as_bytes());
        dispatcher.on_message("root/directive", &wire);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn too_short_payload_emits_malformed_message() {
        let (dispatcher, _registry, events) = make_dispatcher(secrets());
        dispatcher.on_message("root/directive", &[1, 2]);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn speaker_binary_routes_to_speaker_sink() {
        let secrets = secrets();
        let transport = Arc::new(RecordingTransport::new());
        let pool = Arc::new(ManualTaskPool::new());
        let connection = Arc::new(ConnectionManager::new(
            "root".to_string(),
            "acct".to_string(),
            "client".to_string(),
            transport,
            pool.clone(),
            ConnectionCallbacks {
                on_connected: Box::new(|| {}),
                on_connect_rejected: Box::new(|_| {}),
                on_disconnected: Box::new(|_| {}),
            },
        ));
        let registry = Arc::new(DirectiveRegistry::new());
        let events = Arc::new(RegulatorBuffer::new(4096));
        let received = Arc::new(Mutex::new(Vec::new()));
        let r = received.clone();
        let dispatcher = Arc::new(Dispatcher::new(
            "root".to_string(),
            secrets.clone(),
            registry,
            events,
            connection,
            pool,
            Arc::new(move |payload, seq| r.lock().unwrap().push((payload.to_vec(), seq))),
        ));
        let wire = frame(&secrets, Topic::Speaker, 0, &[9, 9, 9]);
        dispatcher.on_message("root/speaker", &wire);
        assert_eq!(received.lock().unwrap()[0], (vec![9, 9, 9], 0));
    }
}
