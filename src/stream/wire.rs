/*!
Frame codec for the legacy key stream server.

Every message is an 8-byte header followed by a payload:

- Version (3 bytes): major, minor, patch, currently 1.0.1
- Service type (1 byte, signed): request or response kind
- Payload length (4 bytes, big-endian)

All integers in payloads are big-endian. Responses carrying a failure
status may stop right after the status word.
*/

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut, BytesMut};

use crate::core::constants::WIRE_VERSION;
use crate::core::constants::sizes::{FRAME_HEADER_SIZE, KSID_SIZE, MAX_PAYLOAD_SIZE, MIMETYPE_SIZE, QOS_BLOCK_SIZE};
use crate::core::error::{Error, Result, format_err};
use crate::stream::types::{Ksid, Qos, StreamStatus};

/// Service types carried in the frame header
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    OpenConnectRequest = 0x02,
    OpenConnectResponse = 0x03,
    GetKeyRequest = 0x04,
    GetKeyResponse = 0x05,
    CloseRequest = 0x08,
    CloseResponse = 0x09,
}

impl ServiceType {
    /// Convert a raw header byte to a ServiceType
    pub fn from_i8(value: i8) -> Option<Self> {
        match value {
            0x02 => Some(ServiceType::OpenConnectRequest),
            0x03 => Some(ServiceType::OpenConnectResponse),
            0x04 => Some(ServiceType::GetKeyRequest),
            0x05 => Some(ServiceType::GetKeyResponse),
            0x08 => Some(ServiceType::CloseRequest),
            0x09 => Some(ServiceType::CloseResponse),
            _ => None,
        }
    }

    pub fn as_i8(&self) -> i8 {
        *self as i8
    }

    /// The response type answering this request type
    pub fn response(&self) -> Option<Self> {
        match self {
            ServiceType::OpenConnectRequest => Some(ServiceType::OpenConnectResponse),
            ServiceType::GetKeyRequest => Some(ServiceType::GetKeyResponse),
            ServiceType::CloseRequest => Some(ServiceType::CloseResponse),
            _ => None,
        }
    }
}

/// Frame header (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub service: ServiceType,
    pub payload_len: u32,
}

impl FrameHeader {
    /// Create a header for the current wire version
    pub fn new(service: ServiceType, payload_len: u32) -> Self {
        let (major, minor, patch) = WIRE_VERSION;
        Self {
            major,
            minor,
            patch,
            service,
            payload_len,
        }
    }

    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut bytes = [0u8; FRAME_HEADER_SIZE];
        bytes[0] = self.major;
        bytes[1] = self.minor;
        bytes[2] = self.patch;
        bytes[3] = self.service.as_i8() as u8;
        BigEndian::write_u32(&mut bytes[4..8], self.payload_len);
        bytes
    }

    /// Parse a header, accepting any minor or patch level of major version 1
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return format_err("Frame header too short");
        }

        let (major, minor, patch) = (bytes[0], bytes[1], bytes[2]);
        if major != WIRE_VERSION.0 {
            return Err(Error::UnsupportedVersion(major, minor, patch));
        }

        let service = match ServiceType::from_i8(bytes[3] as i8) {
            Some(service) => service,
            None => return format_err(format!("Invalid service type: {}", bytes[3] as i8)),
        };

        Ok(Self {
            major,
            minor,
            patch,
            service,
            payload_len: BigEndian::read_u32(&bytes[4..8]),
        })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut bytes = [0u8; FRAME_HEADER_SIZE];
        reader.read_exact(&mut bytes)?;
        Self::from_bytes(&bytes)
    }
}

/// Write one frame
pub fn write_frame<W: Write>(writer: &mut W, service: ServiceType, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::InvalidFormat(format!("payload of {} bytes too large", payload.len())))?;
    FrameHeader::new(service, len).write(writer)?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame, returning its header and payload
pub fn read_frame<R: Read>(reader: &mut R) -> Result<(FrameHeader, Vec<u8>)> {
    let header = FrameHeader::read(reader)?;
    if header.payload_len as usize > MAX_PAYLOAD_SIZE {
        return format_err(format!(
            "{:?} payload of {} bytes exceeds {MAX_PAYLOAD_SIZE}",
            header.service, header.payload_len
        ));
    }
    let mut payload = vec![0u8; header.payload_len as usize];
    reader.read_exact(&mut payload)?;
    Ok((header, payload))
}

/// Longest prefix of `mime` that fits the mime-type field, cut at a char boundary
pub fn fit_mimetype(mime: &str) -> &str {
    let mut end = mime.len().min(MIMETYPE_SIZE);
    while !mime.is_char_boundary(end) {
        end -= 1;
    }
    &mime[..end]
}

/// Append a QoS block: seven u32 fields then the mime type, zero-padded or
/// truncated to its fixed width
pub fn put_qos(buf: &mut BytesMut, qos: &Qos) {
    let mime = fit_mimetype(&qos.metadata_mimetype).as_bytes();
    buf.put_u32(qos.key_chunk_size);
    buf.put_u32(qos.max_bps);
    buf.put_u32(qos.min_bps);
    buf.put_u32(qos.jitter);
    buf.put_u32(qos.priority);
    buf.put_u32(qos.timeout);
    buf.put_u32(qos.ttl);
    buf.put_slice(mime);
    buf.put_bytes(0, MIMETYPE_SIZE - mime.len());
}

/// Read a QoS block
pub fn get_qos(buf: &mut &[u8]) -> Result<Qos> {
    need(buf, QOS_BLOCK_SIZE, "QoS block")?;
    let key_chunk_size = buf.get_u32();
    let max_bps = buf.get_u32();
    let min_bps = buf.get_u32();
    let jitter = buf.get_u32();
    let priority = buf.get_u32();
    let timeout = buf.get_u32();
    let ttl = buf.get_u32();

    let field = &buf[..MIMETYPE_SIZE];
    let end = field.iter().position(|b| *b == 0).unwrap_or(MIMETYPE_SIZE);
    let metadata_mimetype = std::str::from_utf8(&field[..end])
        .map_err(|_| Error::InvalidFormat("metadata mime type is not UTF-8".into()))?
        .to_string();
    buf.advance(MIMETYPE_SIZE);

    Ok(Qos {
        key_chunk_size,
        max_bps,
        min_bps,
        jitter,
        priority,
        timeout,
        ttl,
        metadata_mimetype,
    })
}

fn put_cstr(buf: &mut BytesMut, value: &str) -> Result<()> {
    if value.as_bytes().contains(&0) {
        return format_err("URI contains an interior NUL byte");
    }
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
    Ok(())
}

fn get_cstr(buf: &mut &[u8]) -> Result<String> {
    let end = buf
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| Error::InvalidFormat("unterminated string".into()))?;
    let value = std::str::from_utf8(&buf[..end])
        .map_err(|_| Error::InvalidFormat("string is not UTF-8".into()))?
        .to_string();
    buf.advance(end + 1);
    Ok(value)
}

fn get_ksid(buf: &mut &[u8]) -> Result<Ksid> {
    need(buf, KSID_SIZE, "KSID")?;
    let ksid = Ksid::from_slice(&buf[..KSID_SIZE])?;
    buf.advance(KSID_SIZE);
    Ok(ksid)
}

fn get_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    need(buf, 4, what)?;
    Ok(buf.get_u32())
}

fn get_status(buf: &mut &[u8]) -> Result<StreamStatus> {
    let code = get_u32(buf, "status")?;
    StreamStatus::from_u32(code).ok_or_else(|| Error::InvalidFormat(format!("unknown status {code}")))
}

fn need(buf: &[u8], len: usize, what: &str) -> Result<()> {
    if buf.remaining() < len {
        return format_err(format!("{what} truncated: need {len} bytes, have {}", buf.remaining()));
    }
    Ok(())
}

/// OPEN_CONNECT request payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenConnectRequest {
    pub source: String,
    pub destination: String,
    pub qos: Qos,
    pub ksid: Ksid,
}

impl OpenConnectRequest {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(
            self.source.len() + self.destination.len() + 2 + QOS_BLOCK_SIZE + KSID_SIZE,
        );
        put_cstr(&mut buf, &self.source)?;
        put_cstr(&mut buf, &self.destination)?;
        put_qos(&mut buf, &self.qos);
        buf.put_slice(self.ksid.as_bytes());
        Ok(buf.to_vec())
    }

    pub fn decode(mut payload: &[u8]) -> Result<Self> {
        let source = get_cstr(&mut payload)?;
        let destination = get_cstr(&mut payload)?;
        let qos = get_qos(&mut payload)?;
        let ksid = get_ksid(&mut payload)?;
        Ok(Self {
            source,
            destination,
            qos,
            ksid,
        })
    }
}

/// OPEN_CONNECT response payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenConnectResponse {
    pub status: StreamStatus,
    /// QoS granted by the server; absent on hard failures
    pub qos: Option<Qos>,
    pub ksid: Option<Ksid>,
}

impl OpenConnectResponse {
    /// Whether the payload carries the QoS block and KSID
    fn has_body(status: StreamStatus) -> bool {
        matches!(
            status,
            StreamStatus::Success | StreamStatus::PeerDisconnected | StreamStatus::QosNotMet
        )
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(4 + QOS_BLOCK_SIZE + KSID_SIZE);
        buf.put_u32(self.status.as_u32());
        if let (Some(qos), Some(ksid)) = (&self.qos, &self.ksid) {
            put_qos(&mut buf, qos);
            buf.put_slice(ksid.as_bytes());
        }
        Ok(buf.to_vec())
    }

    pub fn decode(mut payload: &[u8]) -> Result<Self> {
        let status = get_status(&mut payload)?;
        if !Self::has_body(status) || payload.is_empty() {
            return Ok(Self {
                status,
                qos: None,
                ksid: None,
            });
        }
        let qos = get_qos(&mut payload)?;
        let ksid = get_ksid(&mut payload)?;
        Ok(Self {
            status,
            qos: Some(qos),
            ksid: Some(ksid),
        })
    }
}

/// GET_KEY request payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetKeyRequest {
    pub ksid: Ksid,
    pub index: u32,
    /// Metadata capacity offered by the caller
    pub metadata_size: u32,
}

impl GetKeyRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(KSID_SIZE + 8);
        buf.put_slice(self.ksid.as_bytes());
        buf.put_u32(self.index);
        buf.put_u32(self.metadata_size);
        buf.to_vec()
    }

    pub fn decode(mut payload: &[u8]) -> Result<Self> {
        let ksid = get_ksid(&mut payload)?;
        let index = get_u32(&mut payload, "index")?;
        let metadata_size = get_u32(&mut payload, "metadata size")?;
        Ok(Self {
            ksid,
            index,
            metadata_size,
        })
    }
}

/// GET_KEY response payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetKeyResponse {
    pub status: StreamStatus,
    pub index: u32,
    pub key: Vec<u8>,
    pub metadata: Vec<u8>,
}

impl GetKeyResponse {
    /// A response carrying only a failure status
    pub fn failed(status: StreamStatus) -> Self {
        Self {
            status,
            index: 0,
            key: Vec::new(),
            metadata: Vec::new(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(16 + self.key.len() + self.metadata.len());
        buf.put_u32(self.status.as_u32());
        if self.status == StreamStatus::Success {
            buf.put_u32(self.index);
            buf.put_u32(length(&self.key)?);
            buf.put_slice(&self.key);
            buf.put_u32(length(&self.metadata)?);
            buf.put_slice(&self.metadata);
        }
        Ok(buf.to_vec())
    }

    pub fn decode(mut payload: &[u8]) -> Result<Self> {
        let status = get_status(&mut payload)?;
        if status != StreamStatus::Success {
            return Ok(Self::failed(status));
        }
        let index = get_u32(&mut payload, "index")?;
        let key_len = get_u32(&mut payload, "key length")? as usize;
        need(payload, key_len, "key material")?;
        let key = payload[..key_len].to_vec();
        payload.advance(key_len);
        let metadata_len = get_u32(&mut payload, "metadata length")? as usize;
        need(payload, metadata_len, "metadata")?;
        let metadata = payload[..metadata_len].to_vec();
        Ok(Self {
            status,
            index,
            key,
            metadata,
        })
    }
}

/// CLOSE request payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseRequest {
    pub ksid: Ksid,
}

impl CloseRequest {
    pub fn encode(&self) -> Vec<u8> {
        self.ksid.as_bytes().to_vec()
    }

    pub fn decode(mut payload: &[u8]) -> Result<Self> {
        Ok(Self {
            ksid: get_ksid(&mut payload)?,
        })
    }
}

/// CLOSE response payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseResponse {
    pub status: StreamStatus,
}

impl CloseResponse {
    pub fn encode(&self) -> Vec<u8> {
        self.status.as_u32().to_be_bytes().to_vec()
    }

    pub fn decode(mut payload: &[u8]) -> Result<Self> {
        Ok(Self {
            status: get_status(&mut payload)?,
        })
    }
}

fn length(bytes: &[u8]) -> Result<u32> {
    u32::try_from(bytes.len()).map_err(|_| Error::InvalidFormat("field too large".into()))
}
