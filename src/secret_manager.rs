//! Secret Manager: ordered secret history keyed by per-topic starting
//! sequence numbers, AEAD encrypt/decrypt, and the rotation handshake
//! (SPEC_FULL.md §4.5).

use std::collections::HashMap;
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroize;

use crate::header::{IV_LEN, MAC_LEN};
use crate::topic::Topic;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretError {
    #[error("no secret covers sequence number")]
    NoSecretForSequence,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("non-monotonic starting sequence number for topic")]
    NonMonotonic,
}

pub type Result<T> = std::result::Result<T, SecretError>;

#[derive(Debug, Clone)]
pub struct SecretRecord {
    pub secret: Vec<u8>,
    pub starting_sequence_number: HashMap<Topic, u32>,
}

impl Drop for SecretRecord {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

struct Keyed {
    secret: Vec<u8>,
    cipher: Aes256Gcm,
}

pub struct SecretManager {
    records: Mutex<Vec<SecretRecord>>,
    current: Mutex<Option<Keyed>>,
}

/// Fixed padding added to the emitter's current next-sequence-number when a
/// rotation record's starting sequence number is derived for outbound
/// encrypted topics (SPEC_FULL.md §4.5 / spec.md §4.5).
pub const ROTATION_PADDING: u32 = 5;

impl SecretManager {
    pub fn new(initial_secret: Vec<u8>) -> Self {
        let mut starting = HashMap::new();
        for t in Topic::ALL {
            starting.insert(t, 0);
        }
        let record = SecretRecord {
            secret: initial_secret,
            starting_sequence_number: starting,
        };
        let manager = Self {
            records: Mutex::new(Vec::new()),
            current: Mutex::new(None),
        };
        manager.push_record(record);
        manager
    }

    fn push_record(&self, record: SecretRecord) {
        self.records.lock().unwrap().push(record);
    }

    fn pop_last_record(&self) -> Option<SecretRecord> {
        self.records.lock().unwrap().pop()
    }

    /// Select the record with the largest `starting_sequence_number[topic] <= seq`.
    fn select_secret(&self, topic: Topic, seq: u32) -> Result<Vec<u8>> {
        let records = self.records.lock().unwrap();
        records
            .iter()
            .filter(|r| {
                r.starting_sequence_number
                    .get(&topic)
                    .is_some_and(|&start| start <= seq)
            })
            .max_by_key(|r| r.starting_sequence_number.get(&topic).copied().unwrap_or(0))
            .map(|r| r.secret.clone())
            .ok_or(SecretError::NoSecretForSequence)
    }

    fn ensure_keyed(&self, secret: Vec<u8>) -> Result<()> {
        let mut current = self.current.lock().unwrap();
        let needs_rekey = match current.as_ref() {
            Some(k) => k.secret != secret,
            None => true,
        };
        if needs_rekey {
            let key = Key::<Aes256Gcm>::from_slice(derive_key_bytes(&secret).as_slice());
            let cipher = Aes256Gcm::new(key);
            *current = Some(Keyed { secret, cipher });
        }
        Ok(())
    }

    /// Encrypt `seq ++ payload` under the secret covering `(topic, seq)`,
    /// with a fresh random IV. Returns `(iv, mac, ciphertext_without_tag)`
    /// matching the common header layout (tag is appended by AES-GCM and
    /// split back out here since the wire format carries it separately).
    pub fn encrypt(&self, topic: Topic, seq: u32, payload: &[u8]) -> Result<([u8; IV_LEN], [u8; MAC_LEN], Vec<u8>)> {
        let secret = self.select_secret(topic, seq)?;
        self.ensure_keyed(secret)?;
        let current = self.current.lock().unwrap();
        let keyed = current.as_ref().unwrap();

        let mut iv = [0u8; IV_LEN];
        rand::rngs::OsRng.fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        let mut plaintext = Vec::with_capacity(4 + payload.len());
        plaintext.extend_from_slice(&seq.to_le_bytes());
        plaintext.extend_from_slice(payload);

        let sealed = keyed
            .cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| SecretError::EncryptionFailed)?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - MAC_LEN);
        let mut mac = [0u8; MAC_LEN];
        mac.copy_from_slice(tag);
        Ok((iv, mac, ciphertext.to_vec()))
    }

    /// Decrypt an encrypted region `(iv, mac, ciphertext)` belonging to
    /// `(topic, seq)` (the plaintext sequence number from the outer header,
    /// used only to select the secret — the caller separately verifies the
    /// decrypted copy matches).
    pub fn decrypt(
        &self,
        topic: Topic,
        seq: u32,
        iv: &[u8; IV_LEN],
        mac: &[u8; MAC_LEN],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        let secret = self.select_secret(topic, seq)?;
        self.ensure_keyed(secret)?;
        let current = self.current.lock().unwrap();
        let keyed = current.as_ref().unwrap();

        let nonce = Nonce::from_slice(iv);
        let mut sealed = Vec::with_capacity(ciphertext.len() + MAC_LEN);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(mac);

        keyed
            .cipher
            .decrypt(nonce, sealed.as_slice())
            .map_err(|_| SecretError::DecryptionFailed)
    }

    /// Build and persist a new secret record for a `RotateSecret` directive.
    /// `next_sequence_for` supplies the emitter's current next-sequence
    /// number for each outbound encrypted topic so the rotation record's
    /// starting sequence numbers can be computed (`next + ROTATION_PADDING`).
    ///
    /// Returns the starting sequence numbers to publish in `SecretRotated`
    /// (event + microphone), or an error if the new record's starting
    /// sequence numbers would not be strictly increasing per topic.
    pub fn rotate(
        &self,
        new_secret: Vec<u8>,
        directive_sequence_number: u32,
        speaker_sequence_number: u32,
        next_sequence_for: impl Fn(Topic) -> u32,
    ) -> Result<RotationStartingSequenceNumbers> {
        let mut starting = HashMap::new();
        starting.insert(Topic::Directive, directive_sequence_number);
        starting.insert(Topic::Speaker, speaker_sequence_number);
        let event_start = next_sequence_for(Topic::Event) + ROTATION_PADDING;
        let microphone_start = next_sequence_for(Topic::Microphone) + ROTATION_PADDING;
        let capabilities_start = next_sequence_for(Topic::CapabilitiesPublish) + ROTATION_PADDING;
        starting.insert(Topic::Event, event_start);
        starting.insert(Topic::Microphone, microphone_start);
        starting.insert(Topic::CapabilitiesPublish, capabilities_start);

        {
            let records = self.records.lock().unwrap();
            if let Some(last) = records.last() {
                for (topic, new_start) in &starting {
                    if let Some(&prev_start) = last.starting_sequence_number.get(topic) {
                        if *new_start <= prev_start {
                            return Err(SecretError::NonMonotonic);
                        }
                    }
                }
            }
        }

        self.push_record(SecretRecord {
            secret: new_secret,
            starting_sequence_number: starting,
        });

        Ok(RotationStartingSequenceNumbers {
            event_sequence_number: event_start,
            microphone_sequence_number: microphone_start,
        })
    }

    /// Undo the most recently pushed rotation record (Open Question (a) in
    /// SPEC_FULL.md §9: on failed `SecretRotated` publish, the in-memory
    /// insertion is popped in addition to the caller's persisted-storage
    /// revert, so the two never diverge).
    pub fn revert_last_rotation(&self) {
        self.pop_last_record();
        *self.current.lock().unwrap() = None;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RotationStartingSequenceNumbers {
    pub event_sequence_number: u32,
    pub microphone_sequence_number: u32,
}

fn derive_key_bytes(secret: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    if secret.len() == 32 {
        let mut out = [0u8; 32];
        out.copy_from_slice(secret);
        out
    } else {
        let mut hasher = Sha256::new();
        hasher.update(secret);
        hasher.finalize().into()
    }
}
