/*!
Error handling for the QKD key delivery interfaces.

Every failure carries enough information to be reported both as a Rust
error value and as the numeric status code of the API it surfaced through.
*/

use std::io;
use thiserror::Error;

use crate::stream::types::{Ksid, StreamStatus};
use crate::vault::types::VaultStatus;

/// Result type for the QKD interfaces
pub type Result<T> = std::result::Result<T, Error>;

/// Which of the two key delivery interfaces an operation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Api {
    /// Stateful key stream interface (ETSI GS QKD 004)
    Stream,
    /// Stateless key vault interface (ETSI GS QKD 014)
    Vault,
}

impl std::fmt::Display for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Api::Stream => write!(f, "stream"),
            Api::Vault => write!(f, "vault"),
        }
    }
}

/// Error type for the QKD interfaces
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A required argument was missing or malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No backend is configured for the API
    #[error("No {0} backend configured")]
    NoBackend(Api),

    /// The configured backend does not implement the operation
    #[error("Backend {backend} does not support {operation}")]
    Unsupported {
        backend: String,
        operation: &'static str,
    },

    /// No key stream slot is available
    #[error("No QKD connection available: {0}")]
    NoConnection(String),

    /// OPEN_CONNECT with a KSID that already has a session
    #[error("Key stream {0} already in use")]
    KsidInUse(Ksid),

    /// Requested QoS cannot be satisfied
    #[error("QoS not met: {0}")]
    QosNotMet(String),

    /// No session exists for the KSID
    #[error("Peer not connected for key stream {0}")]
    PeerNotConnected(Ksid),

    /// Requested index is ahead of the negotiated key rate
    #[error("Insufficient key: index {index} exceeds deliverable index {available}")]
    InsufficientKey { index: u32, available: u64 },

    /// Caller metadata buffer is too small
    #[error("Metadata buffer too small: {required} bytes required, {capacity} available")]
    MetadataSizeInsufficient { required: usize, capacity: usize },

    /// Transport did not answer in time
    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    /// The remote key stream server reported a failure status
    #[error("Peer reported status {0}")]
    PeerStatus(StreamStatus),

    /// KME answered with a non-success HTTP code
    #[error("KME responded with HTTP {0}")]
    Http(u16),

    /// KME could not be reached
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Role credentials are missing or unusable
    #[error("Credential error: {0}")]
    Credentials(String),

    /// Invalid wire frame
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    /// Unsupported wire protocol version
    #[error("Unsupported protocol version: {0}.{1}.{2}")]
    UnsupportedVersion(u8, u8, u8),
}

impl Error {
    /// Map the error onto the Stream API status codes
    pub fn stream_status(&self) -> StreamStatus {
        match self {
            Error::KsidInUse(_) => StreamStatus::KsidInUse,
            Error::QosNotMet(_) => StreamStatus::QosNotMet,
            Error::PeerNotConnected(_) => StreamStatus::PeerNotConnectedGetKey,
            Error::InsufficientKey { .. } => StreamStatus::InsufficientKey,
            Error::MetadataSizeInsufficient { .. } => StreamStatus::MetadataSizeInsufficient,
            Error::Timeout(_) => StreamStatus::Timeout,
            Error::PeerStatus(status) => *status,
            Error::Io(err) if is_timeout(err) => StreamStatus::Timeout,
            _ => StreamStatus::NoConnection,
        }
    }

    /// Map the error onto the Vault API status codes
    pub fn vault_status(&self) -> VaultStatus {
        match self {
            Error::Http(code) if *code >= 500 => VaultStatus::ServerError,
            Error::Http(_) => VaultStatus::BadRequest,
            Error::Credentials(_) => VaultStatus::Unauthorized,
            Error::NoBackend(_)
            | Error::Unsupported { .. }
            | Error::Transport(_)
            | Error::Timeout(_)
            | Error::Io(_) => VaultStatus::ServerError,
            _ => VaultStatus::BadRequest,
        }
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

/// Convert a string to an Error::InvalidArgument
pub fn invalid_arg<T, S: Into<String>>(msg: S) -> Result<T> {
    Err(Error::InvalidArgument(msg.into()))
}

/// Convert a string to an Error::InvalidFormat
pub fn format_err<T, S: Into<String>>(msg: S) -> Result<T> {
    Err(Error::InvalidFormat(msg.into()))
}

/// Convert a string to an Error::Decode
pub fn decode_err<T, S: Into<String>>(msg: S) -> Result<T> {
    Err(Error::Decode(msg.into()))
}

/// Convert a string to an Error::QosNotMet
pub fn qos_err<T, S: Into<String>>(msg: S) -> Result<T> {
    Err(Error::QosNotMet(msg.into()))
}
