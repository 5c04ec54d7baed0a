//! Stateless key vault interface (ETSI GS QKD 014).

pub mod api;
pub mod credentials;
pub mod rest;
pub mod simulated;
pub mod transport;
pub mod types;

pub use self::api::VaultApi;
pub use self::types::{Key, KeyContainer, KeyId, KeyIds, KeyRequest, Status, VaultStatus};
