//! Stateful key stream interface (ETSI GS QKD 004).

pub mod api;
pub mod legacy;
pub mod session;
pub mod simulated;
pub mod types;
pub mod vault_bridge;
pub mod wire;

pub use self::api::StreamApi;
pub use self::types::{Ksid, MetadataBuffer, OpenResponse, Qos, StreamStatus};
