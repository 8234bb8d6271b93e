//! Emitter: per-topic outbound sequencing, framing, and AEAD encryption
//! (SPEC_FULL.md §4.3).

use std::sync::Mutex;

use thiserror::Error;

use crate::header::CommonHeader;
use crate::secret_manager::{SecretError, SecretManager};
use crate::topic::Topic;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterError {
    #[error("non-array JSON topic chunk must be the complete message")]
    IncompleteJsonMessage,
    #[error("encryption failed: {0}")]
    Encryption(SecretError),
}

impl From<SecretError> for EmitterError {
    fn from(e: SecretError) -> Self {
        EmitterError::Encryption(e)
    }
}

pub type Result<T> = std::result::Result<T, EmitterError>;

struct Inner {
    next_sequence_number: u32,
    array_accumulator: Vec<Vec<u8>>,
}

/// Assembles regulator-emitted chunks for a single outbound topic into a
/// framed, encrypted wire message.
pub struct Emitter {
    topic: Topic,
    inner: Mutex<Inner>,
}

impl Emitter {
    pub fn new(topic: Topic, starting_sequence_number: u32) -> Self {
        Self {
            topic,
            inner: Mutex::new(Inner {
                next_sequence_number: starting_sequence_number,
                array_accumulator: Vec::new(),
            }),
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn next_sequence_number(&self) -> u32 {
        self.inner.lock().unwrap().next_sequence_number
    }

    /// Feed one regulator-emitted chunk. Returns `Some(framed_message)` once
    /// a complete outbound message is ready to publish, `None` if the chunk
    /// was only accumulated (JSON array topics, more chunks pending).
    pub fn on_chunk(
        &self,
        chunk: &[u8],
        remaining_bytes: usize,
        remaining_chunks: usize,
        secrets: &SecretManager,
    ) -> Result<Option<Vec<u8>>> {
        let payload = match self.topic.array_name() {
            Some(array_name) => {
                let mut inner = self.inner.lock().unwrap();
                inner.array_accumulator.push(chunk.to_vec());
                if remaining_chunks != 0 {
                    return Ok(None);
                }
                let items = std::mem::take(&mut inner.array_accumulator);
                wrap_json_array(array_name, &items)
            }
            None if self.topic.wire_form() == crate::topic::WireForm::Json => {
                if remaining_bytes != 0 || remaining_chunks != 0 {
                    return Err(EmitterError::IncompleteJsonMessage);
                }
                chunk.to_vec()
            }
            None => chunk.to_vec(),
        };

        let framed = self.frame_and_encrypt(&payload, secrets)?;
        Ok(Some(framed))
    }

    fn frame_and_encrypt(&self, payload: &[u8], secrets: &SecretManager) -> Result<Vec<u8>> {
        let seq = {
            let mut inner = self.inner.lock().unwrap();
            let seq = inner.next_sequence_number;
            inner.next_sequence_number = inner.next_sequence_number.wrapping_add(1);
            seq
        };
        let (iv, mac, ciphertext) = secrets.encrypt(self.topic, seq, payload)?;
        Ok(CommonHeader::serialize(seq, iv, mac, &ciphertext))
    }
}

fn wrap_json_array(array_name: &str, items: &[Vec<u8>]) -> Vec<u8> {
    let mut joined = Vec::new();
    joined.push(b'{');
    joined.extend_from_slice(format!("\"{array_name}\":[").as_bytes());
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            joined.push(b',');
        }
        joined.extend_from_slice(item);
    }
    joined.extend_from_slice(b"]}");
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets() -> SecretManager {
        SecretManager::new(vec![0xABu8; 32])
    }

    fn decrypt_payload(secrets: &SecretManager, topic: Topic, framed: &[u8]) -> Vec<u8> {
        let (hdr, enc) = CommonHeader::parse(framed).unwrap();
        let plaintext = secrets
            .decrypt(topic, hdr.sequence_number_plain, &hdr.iv, &hdr.mac, enc)
            .unwrap();
        plaintext[4..].to_vec()
    }

    #[test]
    fn json_non_array_topic_requires_complete_chunk() {
        let secrets = secrets();
        let emitter = Emitter::new(Topic::CapabilitiesPublish, 0);
        let err = emitter
            .on_chunk(b"{\"partial\":true}", 10, 0, &secrets)
            .unwrap_err();
        assert_eq!(err, EmitterError::IncompleteJsonMessage);
    }

    #[test]
    fn json_non_array_topic_emits_on_complete_chunk() {
        let secrets = secrets();
        let emitter = Emitter::new(Topic::CapabilitiesPublish, 0);
        let framed = emitter
            .on_chunk(b"{\"a\":1}", 0, 0, &secrets)
            .unwrap()
            .unwrap();
        let plain = decrypt_payload(&secrets, Topic::CapabilitiesPublish, &framed);
        assert_eq!(plain, b"{\"a\":1}");
        assert_eq!(emitter.next_sequence_number(), 1);
    }

    #[test]
    fn json_array_topic_accumulates_until_last_chunk() {
        let secrets = secrets();
        let emitter = Emitter::new(Topic::Event, 0);
        assert!(emitter.on_chunk(b"{\"header\":{}}", 10, 1, &secrets).unwrap().is_none());
        let framed = emitter
            .on_chunk(b"{\"header\":{}}", 0, 0, &secrets)
            .unwrap()
            .unwrap();
        let plain = decrypt_payload(&secrets, Topic::Event, &framed);
        assert_eq!(
            plain,
            b"{\"events\":[{\"header\":{}},{\"header\":{}}]}".to_vec()
        );
    }

    #[test]
    fn binary_topic_passes_through_verbatim() {
        let secrets = secrets();
        let emitter = Emitter::new(Topic::Microphone, 0);
        let framed = emitter.on_chunk(&[1, 2, 3], 0, 0, &secrets).unwrap().unwrap();
        let plain = decrypt_payload(&secrets, Topic::Microphone, &framed);
        assert_eq!(plain, vec![1, 2, 3]);
    }

    #[test]
    fn sequence_number_monotonically_increases() {
        let secrets = secrets();
        let emitter = Emitter::new(Topic::Microphone, 0);
        emitter.on_chunk(&[1], 0, 0, &secrets).unwrap();
        emitter.on_chunk(&[2], 0, 0, &secrets).unwrap();
        assert_eq!(emitter.next_sequence_number(), 2);
    }
}
