/*!
Types shared by the key stream engine and its backends.
*/

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::core::constants::sizes::{KSID_SIZE, MAX_KEY_CHUNK_SIZE};
use crate::core::error::{Error, Result};

/// Stream API status codes
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Successful
    Success = 0,
    /// Connection opened, peer not connected yet
    PeerDisconnected = 1,
    /// GET_KEY failed: insufficient key available
    InsufficientKey = 2,
    /// GET_KEY failed: peer not connected
    PeerNotConnectedGetKey = 3,
    /// No QKD connection available
    NoConnection = 4,
    /// OPEN_CONNECT failed: KSID already in use
    KsidInUse = 5,
    /// Timeout
    Timeout = 6,
    /// OPEN_CONNECT failed: QoS could not be met
    QosNotMet = 7,
    /// GET_KEY failed: metadata buffer too small
    MetadataSizeInsufficient = 8,
}

impl StreamStatus {
    /// Convert a u32 value to a StreamStatus
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(StreamStatus::Success),
            1 => Some(StreamStatus::PeerDisconnected),
            2 => Some(StreamStatus::InsufficientKey),
            3 => Some(StreamStatus::PeerNotConnectedGetKey),
            4 => Some(StreamStatus::NoConnection),
            5 => Some(StreamStatus::KsidInUse),
            6 => Some(StreamStatus::Timeout),
            7 => Some(StreamStatus::QosNotMet),
            8 => Some(StreamStatus::MetadataSizeInsufficient),
            _ => None,
        }
    }

    /// Get the u32 value of this StreamStatus
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamStatus::Success => "SUCCESS",
            StreamStatus::PeerDisconnected => "PEER_DISCONNECTED",
            StreamStatus::InsufficientKey => "INSUFFICIENT_KEY",
            StreamStatus::PeerNotConnectedGetKey => "PEER_NOT_CONNECTED_GET_KEY",
            StreamStatus::NoConnection => "NO_CONNECTION",
            StreamStatus::KsidInUse => "KSID_IN_USE",
            StreamStatus::Timeout => "TIMEOUT",
            StreamStatus::QosNotMet => "QOS_NOT_MET",
            StreamStatus::MetadataSizeInsufficient => "METADATA_SIZE_INSUFFICIENT",
        };
        write!(f, "{name} ({})", self.as_u32())
    }
}

/// Key stream identifier shared by both ends of a session.
///
/// The all-zero value is reserved: passed to OPEN_CONNECT it asks the
/// backend to allocate a fresh identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ksid([u8; KSID_SIZE]);

impl Ksid {
    /// The reserved all-zero identifier
    pub const fn zero() -> Self {
        Self([0u8; KSID_SIZE])
    }

    /// A fresh random (UUIDv4) identifier
    pub fn generate() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    pub const fn from_bytes(bytes: [u8; KSID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse from a slice of exactly 16 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; KSID_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::InvalidFormat(format!("KSID must be {KSID_SIZE} bytes, got {}", bytes.len())))?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; KSID_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn to_uuid(&self) -> Uuid {
        Uuid::from_bytes(self.0)
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(*uuid.as_bytes())
    }
}

impl fmt::Display for Ksid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uuid().hyphenated())
    }
}

impl fmt::Debug for Ksid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ksid({self})")
    }
}

impl FromStr for Ksid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self::from_uuid)
            .map_err(|err| Error::InvalidArgument(format!("invalid KSID {s:?}: {err}")))
    }
}

/// QoS parameters negotiated at OPEN_CONNECT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qos {
    /// Length of each key chunk in bytes
    pub key_chunk_size: u32,
    /// Maximum bit rate
    pub max_bps: u32,
    /// Minimum bit rate
    pub min_bps: u32,
    /// Maximum deviation for key delivery
    pub jitter: u32,
    /// Priority level
    pub priority: u32,
    /// Timeout in milliseconds, advisory
    pub timeout: u32,
    /// Time-to-live in seconds
    pub ttl: u32,
    /// Metadata format, truncated to 256 bytes on the wire
    pub metadata_mimetype: String,
}

impl Default for Qos {
    fn default() -> Self {
        Self {
            key_chunk_size: 32,
            max_bps: 40_000,
            min_bps: 5_000,
            jitter: 10,
            priority: 0,
            timeout: 5_000,
            ttl: 3_600,
            metadata_mimetype: "application/json".to_string(),
        }
    }
}

impl Qos {
    /// Check that the parameters can be satisfied at all
    pub fn validate(&self) -> Result<()> {
        if self.min_bps > self.max_bps {
            return Err(Error::QosNotMet(format!(
                "min_bps {} exceeds max_bps {}",
                self.min_bps, self.max_bps
            )));
        }
        if self.key_chunk_size == 0 {
            return Err(Error::QosNotMet("key_chunk_size must be non-zero".into()));
        }
        if self.key_chunk_size > MAX_KEY_CHUNK_SIZE {
            return Err(Error::QosNotMet(format!(
                "key_chunk_size {} exceeds {MAX_KEY_CHUNK_SIZE} bytes",
                self.key_chunk_size
            )));
        }
        Ok(())
    }

    /// TTL in milliseconds
    pub fn ttl_ms(&self) -> u64 {
        u64::from(self.ttl) * 1000
    }

    /// Highest key index deliverable after `elapsed_ms` at `max_bps`.
    ///
    /// The bound is inclusive: indices `0..=bound` may be served, so a
    /// fresh session can always hand out index 0 and the caller gets one
    /// chunk more than `elapsed * rate` alone would cover.
    pub fn max_deliverable_index(&self, elapsed_ms: u64) -> u64 {
        let bits = u128::from(elapsed_ms) * u128::from(self.max_bps);
        let per_chunk = 8000u128 * u128::from(self.key_chunk_size.max(1));
        (bits / per_chunk).min(u128::from(u64::MAX)) as u64
    }
}

/// Caller-owned metadata buffer with a fixed capacity.
///
/// Backends write into it through [`MetadataBuffer::fill`], which refuses
/// to truncate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataBuffer {
    capacity: usize,
    data: Vec<u8>,
}

impl MetadataBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Contents as UTF-8, if they are
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// Replace the contents, failing if they do not fit
    pub fn fill(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.capacity {
            return Err(Error::MetadataSizeInsufficient {
                required: bytes.len(),
                capacity: self.capacity,
            });
        }
        self.data.clear();
        self.data.extend_from_slice(bytes);
        Ok(())
    }
}

/// Arguments of an OPEN_CONNECT call
#[derive(Debug, Clone, Copy)]
pub struct OpenRequest<'a> {
    pub source: &'a str,
    pub destination: &'a str,
    pub qos: &'a Qos,
    /// All-zero for an initiator, the peer's KSID for a responder
    pub ksid: Ksid,
}

/// Outcome of a successful OPEN_CONNECT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenResponse {
    pub ksid: Ksid,
    /// `Success` for a responder, `PeerDisconnected` for a fresh initiator
    pub status: StreamStatus,
    /// QoS in effect for the stream
    pub qos: Qos,
}
