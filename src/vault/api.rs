/*!
Vault API entry points.
*/

use log::{debug, warn};

use crate::core::backend::VaultBackend;
use crate::core::error::{Api, Error, Result, decode_err, invalid_arg};
use crate::vault::types::{KeyContainer, KeyIds, KeyRequest, Status};

/// Key vault interface (ETSI GS QKD 014)
pub struct VaultApi {
    backend: Option<Box<dyn VaultBackend>>,
}

impl VaultApi {
    pub fn new(backend: Box<dyn VaultBackend>) -> Self {
        Self { backend: Some(backend) }
    }

    /// Engine with no backend; every call fails with `NoBackend`
    pub fn unconfigured() -> Self {
        Self { backend: None }
    }

    pub fn backend_name(&self) -> Option<&str> {
        self.backend.as_deref().map(|backend| backend.name())
    }

    fn backend(&mut self) -> Result<&mut (dyn VaultBackend + 'static)> {
        self.backend.as_deref_mut().ok_or(Error::NoBackend(Api::Vault))
    }

    /// Status of the link between this SAE's KME and `slave_sae_id`
    pub fn get_status(&mut self, kme_hostname: &str, slave_sae_id: &str) -> Result<Status> {
        require("KME hostname", kme_hostname)?;
        require("slave SAE ID", slave_sae_id)?;
        self.backend()?
            .get_status(kme_hostname, slave_sae_id)
            .inspect_err(|err| warn!("GET_STATUS failed: {err} [{}]", err.vault_status()))
    }

    /// Fetch fresh keys to share with `slave_sae_id`.
    ///
    /// Without a request one key of the backend's default size is fetched.
    /// The container holds exactly the requested number of keys.
    pub fn get_key(
        &mut self,
        kme_hostname: &str,
        slave_sae_id: &str,
        request: Option<&KeyRequest>,
    ) -> Result<KeyContainer> {
        require("KME hostname", kme_hostname)?;
        require("slave SAE ID", slave_sae_id)?;

        let default_request = KeyRequest::new_single();
        let request = request.unwrap_or(&default_request);
        let expected = request.requested_number();
        if expected == 0 {
            return invalid_arg("number of keys must be at least 1");
        }

        let backend = self.backend()?;
        debug!("GET_KEY via {}: {expected} key(s) for {slave_sae_id}", backend.name());
        let container = backend
            .get_key(kme_hostname, slave_sae_id, request)
            .inspect_err(|err| warn!("GET_KEY failed: {err} [{}]", err.vault_status()))?;

        if container.len() != expected as usize {
            return decode_err(format!("requested {expected} keys, received {}", container.len()));
        }
        Ok(container)
    }

    /// Fetch keys `master_sae_id` already obtained, by ID.
    ///
    /// The container is restricted to the requested IDs, in request order.
    pub fn get_key_with_ids(
        &mut self,
        kme_hostname: &str,
        master_sae_id: &str,
        key_ids: &KeyIds,
    ) -> Result<KeyContainer> {
        require("KME hostname", kme_hostname)?;
        require("master SAE ID", master_sae_id)?;
        if key_ids.is_empty() || key_ids.key_ids.iter().any(|id| id.key_id.is_empty()) {
            return invalid_arg("key ID set must be non-empty");
        }

        let backend = self.backend()?;
        debug!("GET_KEY_WITH_IDS via {}: {} key(s) from {master_sae_id}", backend.name(), key_ids.len());
        backend
            .get_key_with_ids(kme_hostname, master_sae_id, key_ids)
            .inspect_err(|err| warn!("GET_KEY_WITH_IDS failed: {err} [{}]", err.vault_status()))?
            .restrict_to(key_ids)
    }
}

fn require(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return invalid_arg(format!("{what} must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::simulated::SimulatedVaultBackend;
    use crate::vault::types::VaultStatus;

    fn api() -> VaultApi {
        VaultApi::new(Box::new(SimulatedVaultBackend::new()))
    }

    #[test]
    fn test_empty_arguments_are_bad_requests() {
        let mut api = api();
        assert_eq!(api.get_status("", "sae").unwrap_err().vault_status(), VaultStatus::BadRequest);
        assert_eq!(api.get_key("kme", "", None).unwrap_err().vault_status(), VaultStatus::BadRequest);
        assert_eq!(
            api.get_key_with_ids("kme", "sae", &KeyIds::default()).unwrap_err().vault_status(),
            VaultStatus::BadRequest
        );
    }

    #[test]
    fn test_unconfigured_engine_is_server_error() {
        let mut api = VaultApi::unconfigured();
        let err = api.get_status("kme", "sae").unwrap_err();
        assert!(matches!(err, Error::NoBackend(Api::Vault)));
        assert_eq!(err.vault_status(), VaultStatus::ServerError);
    }

    #[test]
    fn test_get_key_defaults_to_one() {
        let mut api = api();
        let container = api.get_key("kme", "sae-b", None).unwrap();
        assert_eq!(container.len(), 1);
        assert_eq!(container.keys[0].material().unwrap().len(), 32);
    }

    #[test]
    fn test_get_key_with_ids_orders_by_request() {
        let mut api = api();
        let container = api.get_key("kme", "sae-b", Some(&KeyRequest::new(3, 256))).unwrap();
        let ids: KeyIds = container.keys.iter().rev().map(|key| key.key_id.clone()).collect();

        let fetched = api.get_key_with_ids("kme", "sae-a", &ids).unwrap();
        let order: Vec<_> = fetched.keys.iter().map(|key| key.key_id.as_str()).collect();
        let wanted: Vec<_> = ids.key_ids.iter().map(|id| id.key_id.as_str()).collect();
        assert_eq!(order, wanted);
        assert_eq!(fetched.keys[0].key, container.keys[2].key);
    }
}
