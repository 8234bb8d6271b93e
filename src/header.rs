//! Byte-exact wire layouts (SPEC_FULL.md §3, §6): the common encrypted
//! header and the binary message header carried inside Microphone/Speaker
//! payloads. Packing mirrors the manual header packing in the teacher's
//! `network/packet.rs` (explicit byte slices, little-endian here per spec).

use thiserror::Error;

pub const IV_LEN: usize = 12;
pub const MAC_LEN: usize = 16;
/// `[u32 seq_plain][IV][MAC][u32 seq_enc]` — the fixed prefix before payload.
pub const COMMON_HEADER_LEN: usize = 4 + IV_LEN + MAC_LEN + 4;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    #[error("message shorter than common header ({COMMON_HEADER_LEN} bytes)")]
    TooShort,
    #[error("message shorter than binary message header (8 bytes)")]
    BinaryTooShort,
    #[error("unknown binary message type byte {0}")]
    UnknownBinaryType(u8),
}

pub type Result<T> = std::result::Result<T, HeaderError>;

/// The plaintext-visible fields of the common header, plus the still-encrypted
/// payload region `(seq_enc ++ payload)` that the Secret Manager decrypts.
#[derive(Debug, Clone)]
pub struct CommonHeader {
    pub sequence_number_plain: u32,
    pub iv: [u8; IV_LEN],
    pub mac: [u8; MAC_LEN],
}

impl CommonHeader {
    /// Split a raw inbound message into `(header, encrypted_region)`.
    pub fn parse(buf: &[u8]) -> Result<(CommonHeader, &[u8])> {
        if buf.len() < COMMON_HEADER_LEN {
            return Err(HeaderError::TooShort);
        }
        let sequence_number_plain = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&buf[4..4 + IV_LEN]);
        let mut mac = [0u8; MAC_LEN];
        mac.copy_from_slice(&buf[4 + IV_LEN..4 + IV_LEN + MAC_LEN]);
        let encrypted_region = &buf[COMMON_HEADER_LEN - 4..];
        Ok((
            CommonHeader {
                sequence_number_plain,
                iv,
                mac,
            },
            encrypted_region,
        ))
    }

    /// Serialize `[seq_plain][iv][mac]` followed by the ciphertext (which
    /// already begins with the encrypted sequence-number copy, per the
    /// Emitter/Secret Manager contract).
    pub fn serialize(sequence_number_plain: u32, iv: [u8; IV_LEN], mac: [u8; MAC_LEN], ciphertext: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(COMMON_HEADER_LEN - 4 + ciphertext.len());
        out.extend_from_slice(&sequence_number_plain.to_le_bytes());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&mac);
        out.extend_from_slice(ciphertext);
        out
    }
}

/// Binary message type discriminator, shared by Speaker/Microphone with
/// different meanings for value `1` (see spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryMessageType {
    Content,
    SpeakerMarker,
    MicrophoneWakewordMetadata,
}

#[derive(Debug, Clone)]
pub struct BinaryMessageHeader {
    pub length: u32,
    pub message_type: u8,
    pub count: u8,
    pub data_offset: usize,
}

impl BinaryMessageHeader {
    const HEADER_LEN: usize = 4 + 1 + 1 + 2;

    pub fn parse(buf: &[u8]) -> Result<(BinaryMessageHeader, &[u8])> {
        if buf.len() < Self::HEADER_LEN {
            return Err(HeaderError::BinaryTooShort);
        }
        let length = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let message_type = buf[4];
        let count = buf[5];
        let data = &buf[Self::HEADER_LEN..];
        Ok((
            BinaryMessageHeader {
                length,
                message_type,
                count,
                data_offset: Self::HEADER_LEN,
            },
            data,
        ))
    }

    pub fn serialize(message_type: u8, count: u8, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_LEN + data.len());
        let length = data.len() as u32;
        out.extend_from_slice(&length.to_le_bytes());
        out.push(message_type);
        out.push(count);
        out.extend_from_slice(&[0u8; 2]);
        out.extend_from_slice(data);
        out
    }
}

/// Prepend the `u64` little-endian byte offset carried by Speaker/Microphone
/// Content messages ahead of their raw audio bytes.
pub fn prefix_offset(offset: u64, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + data.len());
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(data);
    out
}

pub fn split_offset(buf: &[u8]) -> Result<(u64, &[u8])> {
    if buf.len() < 8 {
        return Err(HeaderError::BinaryTooShort);
    }
    let offset = u64::from_le_bytes(buf[0..8].try_into().unwrap());
    Ok((offset, &buf[8..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_header_round_trip() {
        let iv = [7u8; IV_LEN];
        let mac = [9u8; MAC_LEN];
        let ciphertext = b"encrypted-seq-and-payload".to_vec();
        let wire = CommonHeader::serialize(42, iv, mac, &ciphertext);
        let (hdr, enc) = CommonHeader::parse(&wire).unwrap();
        assert_eq!(hdr.sequence_number_plain, 42);
        assert_eq!(hdr.iv, iv);
        assert_eq!(hdr.mac, mac);
        assert_eq!(enc, ciphertext.as_slice());
    }

    #[test]
    fn common_header_too_short_rejected() {
        let buf = vec![0u8; COMMON_HEADER_LEN - 1];
        assert_eq!(CommonHeader::parse(&buf).unwrap_err(), HeaderError::TooShort);
    }

    #[test]
    fn binary_message_header_round_trip() {
        let data = prefix_offset(1000, b"samples");
        let wire = BinaryMessageHeader::serialize(0, 1, &data);
        let (hdr, payload) = BinaryMessageHeader::parse(&wire).unwrap();
        assert_eq!(hdr.length as usize, data.len());
        assert_eq!(hdr.message_type, 0);
        assert_eq!(hdr.count, 1);
        let (offset, samples) = split_offset(payload).unwrap();
        assert_eq!(offset, 1000);
        assert_eq!(samples, b"samples");
    }
}
