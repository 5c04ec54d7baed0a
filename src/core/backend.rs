/*!
Backend contracts for the two key delivery interfaces.

Each interface has one trait; each backend variant implements the trait
once and is handed to the matching engine at configuration time.
Operations a backend does not provide fall back to the default methods,
which report [`Error::Unsupported`] instead of failing silently.
*/

use std::fmt;

use crate::core::error::{Error, Result};
use crate::stream::types::{Ksid, MetadataBuffer, OpenRequest, OpenResponse};
use crate::vault::types::{KeyContainer, KeyIds, KeyRequest, Status};

/// Which end of an exchange a call is made for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Starts the exchange (master SAE, zero-KSID opener)
    Initiator,
    /// Joins an exchange started by the peer (slave SAE)
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
        }
    }
}

/// Key stream backend (ETSI GS QKD 004 operation set)
pub trait StreamBackend: Send {
    /// Backend identifier
    fn name(&self) -> &str;

    /// Open a key stream, or join the peer's stream when `request.ksid` is set
    fn open_connect(&mut self, request: &OpenRequest<'_>) -> Result<OpenResponse> {
        let _ = request;
        Err(unsupported(self.name(), "OPEN_CONNECT"))
    }

    /// Deliver the key chunk at `index`, filling `metadata` when supplied
    fn get_key(
        &mut self,
        ksid: &Ksid,
        index: u32,
        metadata: Option<&mut MetadataBuffer>,
    ) -> Result<Vec<u8>> {
        let _ = (ksid, index, metadata);
        Err(unsupported(self.name(), "GET_KEY"))
    }

    /// Close a key stream
    fn close(&mut self, ksid: &Ksid) -> Result<()> {
        let _ = ksid;
        Err(unsupported(self.name(), "CLOSE"))
    }
}

/// Key vault backend (ETSI GS QKD 014 operation set)
pub trait VaultBackend: Send {
    /// Backend identifier
    fn name(&self) -> &str;

    /// Capability snapshot of the link to `slave_sae_id`
    fn get_status(&mut self, kme_hostname: &str, slave_sae_id: &str) -> Result<Status> {
        let _ = (kme_hostname, slave_sae_id);
        Err(unsupported(self.name(), "GET_STATUS"))
    }

    /// Fresh keys to share with `slave_sae_id`
    fn get_key(
        &mut self,
        kme_hostname: &str,
        slave_sae_id: &str,
        request: &KeyRequest,
    ) -> Result<KeyContainer> {
        let _ = (kme_hostname, slave_sae_id, request);
        Err(unsupported(self.name(), "GET_KEY"))
    }

    /// Keys previously delivered to `master_sae_id`, selected by ID
    fn get_key_with_ids(
        &mut self,
        kme_hostname: &str,
        master_sae_id: &str,
        key_ids: &KeyIds,
    ) -> Result<KeyContainer> {
        let _ = (kme_hostname, master_sae_id, key_ids);
        Err(unsupported(self.name(), "GET_KEY_WITH_IDS"))
    }
}

impl<B: VaultBackend + ?Sized> VaultBackend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn get_status(&mut self, kme_hostname: &str, slave_sae_id: &str) -> Result<Status> {
        (**self).get_status(kme_hostname, slave_sae_id)
    }

    fn get_key(
        &mut self,
        kme_hostname: &str,
        slave_sae_id: &str,
        request: &KeyRequest,
    ) -> Result<KeyContainer> {
        (**self).get_key(kme_hostname, slave_sae_id, request)
    }

    fn get_key_with_ids(
        &mut self,
        kme_hostname: &str,
        master_sae_id: &str,
        key_ids: &KeyIds,
    ) -> Result<KeyContainer> {
        (**self).get_key_with_ids(kme_hostname, master_sae_id, key_ids)
    }
}

fn unsupported(backend: &str, operation: &'static str) -> Error {
    Error::Unsupported {
        backend: backend.to_string(),
        operation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::types::Qos;

    struct Empty;

    impl StreamBackend for Empty {
        fn name(&self) -> &str {
            "empty"
        }
    }

    impl VaultBackend for Empty {
        fn name(&self) -> &str {
            "empty"
        }
    }

    #[test]
    fn test_missing_operations_are_reported() {
        let mut backend = Empty;
        let qos = Qos::default();
        let request = OpenRequest {
            source: "a",
            destination: "b",
            qos: &qos,
            ksid: Ksid::zero(),
        };
        match StreamBackend::open_connect(&mut backend, &request) {
            Err(Error::Unsupported { backend, operation }) => {
                assert_eq!(backend, "empty");
                assert_eq!(operation, "OPEN_CONNECT");
            }
            other => panic!("Expected Unsupported, got {other:?}"),
        }
        assert!(StreamBackend::close(&mut backend, &Ksid::zero()).is_err());
        assert!(VaultBackend::get_status(&mut backend, "kme", "sae").is_err());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Initiator.to_string(), "initiator");
        assert_eq!(Role::Responder.to_string(), "responder");
    }
}
