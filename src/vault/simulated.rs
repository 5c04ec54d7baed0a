/*!
In-process vault backend.

Key material is a SHA-256 stream keyed by the key ID, so a second
simulated vault answering GET_KEY_WITH_IDS for the peer returns the same
bytes. A vault remembers the size of the keys it issued; IDs it never
issued are answered at the default size. Lookups by ID never consume
keys, unlike a real KME.
*/

use std::collections::VecDeque;

use log::debug;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::core::backend::VaultBackend;
use crate::core::constants::simulated::{
    KEY_SIZE_BITS, KME_ID, MAX_KEY_COUNT, MAX_KEY_SIZE_BITS, MAX_KEYS_PER_REQUEST, MIN_KEY_SIZE_BITS,
};
use crate::core::error::{Result, invalid_arg};
use crate::vault::types::{Key, KeyContainer, KeyIds, KeyRequest, Status};

#[derive(Debug, Default)]
pub struct SimulatedVaultBackend {
    /// Recently issued keys and their length in bytes, oldest first
    issued: VecDeque<(String, usize)>,
}

impl SimulatedVaultBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored_key_count(&self) -> usize {
        self.issued.len()
    }

    fn remember(&mut self, key_id: &str, len: usize) {
        if self.issued.len() == MAX_KEY_COUNT as usize {
            self.issued.pop_front();
        }
        self.issued.push_back((key_id.to_string(), len));
    }

    /// Length a key was issued at; keys issued elsewhere get the default size
    fn issued_len(&self, key_id: &str) -> usize {
        self.issued
            .iter()
            .find(|(id, _)| id == key_id)
            .map_or(KEY_SIZE_BITS as usize / 8, |(_, len)| *len)
    }
}

/// Material for `key_id`, `len` bytes long
pub fn key_material(key_id: &str, len: usize) -> Vec<u8> {
    let mut material = vec![0u8; len];
    for (counter, block) in material.chunks_mut(32).enumerate() {
        let digest = Sha256::new()
            .chain_update(key_id.as_bytes())
            .chain_update((counter as u32).to_be_bytes())
            .finalize();
        block.copy_from_slice(&digest[..block.len()]);
    }
    material
}

fn check_size(bits: u32) -> Result<usize> {
    if bits % 8 != 0 || !(MIN_KEY_SIZE_BITS..=MAX_KEY_SIZE_BITS).contains(&bits) {
        return invalid_arg(format!(
            "key size {bits} must be a multiple of 8 between {MIN_KEY_SIZE_BITS} and {MAX_KEY_SIZE_BITS} bits"
        ));
    }
    Ok(bits as usize / 8)
}

impl VaultBackend for SimulatedVaultBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    fn get_status(&mut self, kme_hostname: &str, slave_sae_id: &str) -> Result<Status> {
        Ok(Status {
            source_kme_id: Some(kme_hostname.to_string()),
            target_kme_id: Some(KME_ID.to_string()),
            master_sae_id: None,
            slave_sae_id: Some(slave_sae_id.to_string()),
            key_size: KEY_SIZE_BITS,
            stored_key_count: self.issued.len() as u32,
            max_key_count: MAX_KEY_COUNT,
            max_key_per_request: MAX_KEYS_PER_REQUEST,
            max_key_size: MAX_KEY_SIZE_BITS,
            min_key_size: MIN_KEY_SIZE_BITS,
            max_sae_id_count: 0,
            status_extension: None,
        })
    }

    fn get_key(&mut self, _kme_hostname: &str, slave_sae_id: &str, request: &KeyRequest) -> Result<KeyContainer> {
        let number = request.requested_number();
        if number == 0 || number > MAX_KEYS_PER_REQUEST {
            return invalid_arg(format!("number must be between 1 and {MAX_KEYS_PER_REQUEST}, got {number}"));
        }
        let len = check_size(request.size.unwrap_or(KEY_SIZE_BITS))?;

        let keys: Vec<Key> = (0..number)
            .map(|_| {
                let key_id = Uuid::new_v4().to_string();
                let material = key_material(&key_id, len);
                Key::from_material(key_id, &material)
            })
            .collect();
        for key in &keys {
            self.remember(&key.key_id, len);
        }
        debug!("Issued {number} simulated key(s) of {len} bytes for {slave_sae_id}");

        Ok(KeyContainer {
            keys,
            key_container_extension: None,
        })
    }

    fn get_key_with_ids(&mut self, _kme_hostname: &str, _master_sae_id: &str, key_ids: &KeyIds) -> Result<KeyContainer> {
        let keys = key_ids
            .key_ids
            .iter()
            .map(|id| {
                let len = self.issued_len(&id.key_id);
                Key::from_material(id.key_id.clone(), &key_material(&id.key_id, len))
            })
            .collect();
        Ok(KeyContainer {
            keys,
            key_container_extension: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;
    use std::collections::HashSet;

    #[test]
    fn test_status_snapshot() {
        let mut vault = SimulatedVaultBackend::new();
        vault.get_key("kme", "sae-b", &KeyRequest::new(2, 256)).unwrap();
        let status = vault.get_status("kme", "sae-b").unwrap();
        assert_eq!(status.key_size, 256);
        assert_eq!(status.stored_key_count, 2);
        assert_eq!(status.max_key_per_request, MAX_KEYS_PER_REQUEST);
        assert_eq!(status.slave_sae_id.as_deref(), Some("sae-b"));
    }

    #[test]
    fn test_distinct_keys_of_requested_size() {
        let mut vault = SimulatedVaultBackend::new();
        let container = vault.get_key("kme", "sae-b", &KeyRequest::new(5, 512)).unwrap();
        assert_eq!(container.len(), 5);
        let ids: HashSet<_> = container.keys.iter().map(|key| key.key_id.clone()).collect();
        assert_eq!(ids.len(), 5);
        for key in &container.keys {
            assert_eq!(key.material().unwrap().len(), 64);
        }
    }

    #[test]
    fn test_invalid_requests() {
        let mut vault = SimulatedVaultBackend::new();
        assert!(matches!(vault.get_key("kme", "s", &KeyRequest::new(0, 256)), Err(Error::InvalidArgument(_))));
        assert!(vault.get_key("kme", "s", &KeyRequest::new(MAX_KEYS_PER_REQUEST + 1, 256)).is_err());
        assert!(vault.get_key("kme", "s", &KeyRequest::new(1, 100)).is_err());
        assert_eq!(vault.stored_key_count(), 0);
    }

    #[test]
    fn test_lookup_by_id_is_repeatable() {
        let mut master = SimulatedVaultBackend::new();
        let mut slave = SimulatedVaultBackend::new();
        let issued = master.get_key("kme", "sae-b", &KeyRequest::new_single()).unwrap();
        let ids: KeyIds = [issued.keys[0].key_id.clone()].into_iter().collect();

        let first = slave.get_key_with_ids("kme", "sae-a", &ids).unwrap();
        let second = slave.get_key_with_ids("kme", "sae-a", &ids).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.keys[0].key, issued.keys[0].key);
    }

    #[test]
    fn test_lookup_keeps_issued_size() {
        let mut vault = SimulatedVaultBackend::new();
        let issued = vault.get_key("kme", "sae-b", &KeyRequest::new(1, 512)).unwrap();
        let ids: KeyIds = [issued.keys[0].key_id.clone()].into_iter().collect();

        let fetched = vault.get_key_with_ids("kme", "sae-a", &ids).unwrap();
        assert_eq!(fetched.keys[0].material().unwrap().len(), 64);
        assert_eq!(fetched.keys[0].key, issued.keys[0].key);
    }
}
