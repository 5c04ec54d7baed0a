/*!
Constants for the QKD key delivery interfaces.

This module contains the wire protocol version, sizes of fixed-width
fields, and the defaults used by the simulated and REST backends.
*/

/// Legacy wire protocol version (major, minor, patch)
pub const WIRE_VERSION: (u8, u8, u8) = (1, 0, 1);

/// Default number of concurrent key streams per session table
pub const DEFAULT_MAX_STREAMS: usize = 16;

/// Size constants for the protocol
pub mod sizes {
    /// Size of a key stream identifier in bytes
    pub const KSID_SIZE: usize = 16;

    /// Size of the legacy frame header in bytes
    pub const FRAME_HEADER_SIZE: usize = 8;

    /// Number of 32-bit numeric fields in a QoS block
    pub const QOS_FIELD_COUNT: usize = 7;

    /// Width of the zero-padded metadata mime-type field
    pub const MIMETYPE_SIZE: usize = 256;

    /// Size of an encoded QoS block
    pub const QOS_BLOCK_SIZE: usize = QOS_FIELD_COUNT * 4 + MIMETYPE_SIZE;

    /// Size of a SHA-256 digest
    pub const DIGEST_SIZE: usize = 32;

    /// Largest frame payload accepted from a key stream server
    pub const MAX_PAYLOAD_SIZE: usize = 1 << 20;

    /// Largest key chunk a stream will derive, in bytes
    pub const MAX_KEY_CHUNK_SIZE: u32 = 64 * 1024;
}

/// Simulated backend defaults
pub mod simulated {
    /// Default key size reported by the simulated vault, in bits
    pub const KEY_SIZE_BITS: u32 = 256;

    /// Smallest key size accepted by the simulated vault, in bits
    pub const MIN_KEY_SIZE_BITS: u32 = 64;

    /// Largest key size accepted by the simulated vault, in bits
    pub const MAX_KEY_SIZE_BITS: u32 = 8192;

    /// Keys retained for status reporting
    pub const MAX_KEY_COUNT: u32 = 1024;

    /// Upper bound on `number` in a single key request
    pub const MAX_KEYS_PER_REQUEST: u32 = 128;

    /// Target KME identifier reported by the simulated vault
    pub const KME_ID: &str = "simulated-kme";
}

/// REST backend defaults
pub mod rest {
    /// Key size requested when the caller does not set one, in bits
    pub const DEFAULT_KEY_SIZE_BITS: u32 = 256;

    /// Request timeout in seconds
    pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

    /// API prefix on the KME
    pub const API_PREFIX: &str = "api/v1/keys";
}

/// Legacy wire backend defaults
pub mod legacy {
    /// Default server host
    pub const DEFAULT_SERVER_ADDRESS: &str = "qkd_server";

    /// Default server port
    pub const DEFAULT_SERVER_PORT: u16 = 25575;

    /// Destination URI prefix naming the server to connect to
    pub const SERVER_URI_SCHEME: &str = "server://";

    /// Connect timeout in seconds
    pub const CONNECT_TIMEOUT_SECS: u64 = 5;
}
