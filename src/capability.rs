//! Capability traits: the shapes of host-supplied collaborators this crate
//! drives but does not implement (SPEC_FULL.md §5, §6), following the
//! teacher's `VoiceStreamingListener`-style owner-free-interface pattern —
//! the crate accepts `Arc<dyn Trait>` objects rather than owning concrete
//! host types.

use std::sync::Arc;

use thiserror::Error;

use crate::header::{IV_LEN, MAC_LEN};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("AEAD operation failed")]
    Aead,
    #[error("key exchange failed")]
    Ecdh,
    #[error("storage operation failed: {0}")]
    Storage(String),
    #[error("http request failed: {0}")]
    Http(String),
}

pub type Result<T> = std::result::Result<T, CapabilityError>;

/// AES-GCM (96-bit IV, 128-bit tag) AEAD, keyed per call. The crate ships a
/// default implementation (`AesGcmAead`, see `secret_manager.rs`); hosts that
/// need hardware-backed AEAD can supply their own.
pub trait Aead: Send + Sync {
    fn encrypt(&self, key: &[u8], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<(Vec<u8>, [u8; MAC_LEN])>;
    fn decrypt(&self, key: &[u8], iv: &[u8; IV_LEN], mac: &[u8; MAC_LEN], ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Curve25519 keypair generation and shared-secret derivation for the
/// registration handshake.
pub trait Ecdh: Send + Sync {
    /// Returns `(public_key_bytes, keypair_handle)`; the handle is opaque to
    /// the caller and passed back into `shared_secret`.
    fn generate_keypair(&self) -> Result<([u8; 32], Vec<u8>)>;
    fn shared_secret(&self, keypair_handle: &[u8], peer_public_key: &[u8; 32]) -> Result<[u8; 32]>;
}

/// Cryptographically secure random byte source.
pub trait RandomSource: Send + Sync {
    fn fill(&self, buf: &mut [u8]);
}

/// Opaque persisted blobs: topic root, shared secret, volume, alert set.
pub trait Storage: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn store(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// Blocking one-shot HTTPS POST used only for registration.
pub trait HttpClient: Send + Sync {
    fn post(&self, url: &str, body: &[u8]) -> Result<Vec<u8>>;
}

/// Host audio front end: writes captured microphone samples into the
/// microphone SDS.
pub trait MicrophoneCapture: Send + Sync {
    fn start(&self, writer_generation: u64);
    fn stop(&self);
}

/// Host audio front end: consumes decoded speaker frames at render cadence.
pub trait SpeakerRenderer: Send + Sync {
    fn render(&self, frame: &[u8]);
}

/// Sink for attention-state changes reported by the service.
pub trait UxObserver: Send + Sync {
    fn on_attention_state(&self, state: &str);
}

/// Host wall clock, seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn epoch_seconds(&self) -> u64;
}

/// Host speaker volume control, 0-100.
pub trait VolumeControl: Send + Sync {
    fn set_volume(&self, volume: u8);
}

/// `Clock` backed by `std::time::SystemTime`.
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_seconds(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

pub type ArcAead = Arc<dyn Aead>;
pub type ArcEcdh = Arc<dyn Ecdh>;
pub type ArcRandomSource = Arc<dyn RandomSource>;
pub type ArcStorage = Arc<dyn Storage>;
pub type ArcHttpClient = Arc<dyn HttpClient>;
pub type ArcUxObserver = Arc<dyn UxObserver>;
pub type ArcMicrophoneCapture = Arc<dyn MicrophoneCapture>;
pub type ArcSpeakerRenderer = Arc<dyn SpeakerRenderer>;
pub type ArcClock = Arc<dyn Clock>;
pub type ArcVolumeControl = Arc<dyn VolumeControl>;

/// `RandomSource` backed by `rand::rngs::OsRng` — the crate's default,
/// matching the teacher's reliance on OS randomness for nonces.
pub struct OsRandomSource;

impl RandomSource for OsRandomSource {
    fn fill(&self, buf: &mut [u8]) {
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_random_source_fills_buffer() {
        let src = OsRandomSource;
        let mut buf = [0u8; 16];
        src.fill(&mut buf);
        assert_ne!(buf, [0u8; 16]);
    }
}
