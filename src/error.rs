//! Crate-wide error kinds shared across the core subsystems.
//!
//! Individual modules keep their own focused `thiserror` enum (as the
//! teacher modules do); this type is what the facade and the dispatcher use
//! to classify a failure for the propagation policy in SPEC_FULL.md §7.

use thiserror::Error;

/// Language-neutral error kinds named in the specification's error model.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("malformed message")]
    Malformed,
    #[error("sequence violation")]
    SequenceViolation,
    #[error("encryption failure")]
    EncryptionFailure,
    #[error("message tampered")]
    Tampered,
    #[error("buffer overrun")]
    BufferOverrun,
    #[error("buffer underrun")]
    BufferUnderrun,
    #[error("would block")]
    WouldBlock,
    #[error("closed")]
    Closed,
    #[error("resource exhausted")]
    ResourceExhausted,
    #[error("transport failure")]
    TransportFailure,
    #[error("configuration error")]
    ConfigurationError,
}

/// Typed codes for `ConnectionAcknowledge.code` (service → client), §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectAckCode {
    ConnectionEstablished,
    UnknownFailure,
    ApiVersionDeprecated,
    InvalidClientId,
    InvalidAccountId,
}

impl ConnectAckCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionEstablished => "CONNECTION_ESTABLISHED",
            Self::UnknownFailure => "UNKNOWN_FAILURE",
            Self::ApiVersionDeprecated => "API_VERSION_DEPRECATED",
            Self::InvalidClientId => "INVALID_CLIENT_ID",
            Self::InvalidAccountId => "INVALID_ACCOUNT_ID",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "CONNECTION_ESTABLISHED" => Self::ConnectionEstablished,
            "API_VERSION_DEPRECATED" => Self::ApiVersionDeprecated,
            "INVALID_CLIENT_ID" => Self::InvalidClientId,
            "INVALID_ACCOUNT_ID" => Self::InvalidAccountId,
            _ => Self::UnknownFailure,
        }
    }
}

/// Typed codes for `Disconnect.code`, both directions, §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCode {
    GoingOffline,
    UnexpectedSequenceNumber,
    EncryptionError,
    ApiVersionDeprecated,
    MessageTampered,
}

impl DisconnectCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GoingOffline => "GOING_OFFLINE",
            Self::UnexpectedSequenceNumber => "UNEXPECTED_SEQUENCE_NUMBER",
            Self::EncryptionError => "ENCRYPTION_ERROR",
            Self::ApiVersionDeprecated => "API_VERSION_DEPRECATED",
            Self::MessageTampered => "MESSAGE_TAMPERED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "GOING_OFFLINE" => Self::GoingOffline,
            "UNEXPECTED_SEQUENCE_NUMBER" => Self::UnexpectedSequenceNumber,
            "ENCRYPTION_ERROR" => Self::EncryptionError,
            "API_VERSION_DEPRECATED" => Self::ApiVersionDeprecated,
            "MESSAGE_TAMPERED" => Self::MessageTampered,
            _ => return None,
        })
    }
}

/// Registration-specific error codes, §7.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("registration response error")]
    ResponseError,
    #[error("registration request send failed")]
    SendFailed,
    #[error("registration rejected by service: {0}")]
    Service(String),
}
