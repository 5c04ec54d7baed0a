/*!
Key streams backed by a key vault.

The initiator draws one key from the vault; its UUID becomes the KSID
and its material seeds the stream. The responder fetches the same key
by ID. Chunks are then expanded locally with HKDF, and the session
lifecycle is the same as for the simulated stream backend.
*/

use std::sync::Arc;

use log::{debug, info};

use crate::core::backend::{Role, StreamBackend, VaultBackend};
use crate::core::clock::Clock;
use crate::core::error::{Error, Result, qos_err};
use crate::core::constants::sizes::DIGEST_SIZE;
use crate::stream::session::SessionTable;
use crate::stream::types::{Ksid, MetadataBuffer, OpenRequest, OpenResponse};
use crate::vault::types::{KeyContainer, KeyIds, KeyRequest};

/// Largest chunk HKDF-SHA256 can expand from one seed
const MAX_CHUNK_SIZE: u32 = 255 * DIGEST_SIZE as u32;

/// Where the bridge finds its vault and which SAEs it speaks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub kme_hostname: String,
    /// SAE that initiates streams; used when joining one
    pub master_sae_id: String,
    /// SAE the initiator shares keys with
    pub slave_sae_id: String,
}

pub struct VaultStreamBackend<V: VaultBackend> {
    vault: V,
    config: BridgeConfig,
    table: SessionTable,
}

impl<V: VaultBackend> VaultStreamBackend<V> {
    pub fn new(vault: V, config: BridgeConfig, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            vault,
            config,
            table: SessionTable::new(capacity, clock),
        }
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.table
    }

    pub fn vault(&self) -> &V {
        &self.vault
    }
}

fn single_key(container: KeyContainer) -> Result<(Ksid, Vec<u8>)> {
    let key = match container.keys.as_slice() {
        [key] => key,
        keys => return Err(Error::Decode(format!("expected one key, vault returned {}", keys.len()))),
    };
    let ksid = key
        .key_id
        .parse::<Ksid>()
        .map_err(|_| Error::Decode(format!("key ID {} is not a UUID", key.key_id)))?;
    Ok((ksid, key.material()?))
}

impl<V: VaultBackend> StreamBackend for VaultStreamBackend<V> {
    fn name(&self) -> &str {
        "vault-bridge"
    }

    fn open_connect(&mut self, request: &OpenRequest<'_>) -> Result<OpenResponse> {
        let vault = &mut self.vault;
        let config = &self.config;
        let chunk = request.qos.key_chunk_size;

        self.table.open(request, |role, requested| {
            if chunk > MAX_CHUNK_SIZE {
                return qos_err(format!("key chunk of {chunk} bytes exceeds {MAX_CHUNK_SIZE}"));
            }
            let (ksid, seed) = match role {
                Role::Initiator => {
                    let container = vault.get_key(&config.kme_hostname, &config.slave_sae_id, &KeyRequest::new_single())?;
                    single_key(container)?
                }
                Role::Responder => {
                    let ids: KeyIds = [requested.to_string()].into_iter().collect();
                    let container = vault
                        .get_key_with_ids(&config.kme_hostname, &config.master_sae_id, &ids)?
                        .restrict_to(&ids)?;
                    single_key(container)?
                }
            };
            debug!("Seed for key stream {ksid} drawn from {} as {role}", vault.name());
            Ok((ksid, Some(seed)))
        })
        .inspect(|opened| info!("Vault-backed key stream {} ready", opened.ksid))
    }

    fn get_key(&mut self, ksid: &Ksid, index: u32, metadata: Option<&mut MetadataBuffer>) -> Result<Vec<u8>> {
        self.table.get_key(ksid, index, metadata)
    }

    fn close(&mut self, ksid: &Ksid) -> Result<()> {
        self.table.close(ksid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::stream::types::{Qos, StreamStatus};
    use crate::vault::simulated::SimulatedVaultBackend;

    fn config() -> BridgeConfig {
        BridgeConfig {
            kme_hostname: "kme.local".into(),
            master_sae_id: "sae-alice".into(),
            slave_sae_id: "sae-bob".into(),
        }
    }

    #[test]
    fn test_initiator_and_responder_share_chunks() {
        let clock = ManualClock::new(0);
        let mut alice = VaultStreamBackend::new(SimulatedVaultBackend::new(), config(), 4, Arc::new(clock.clone()));
        let mut bob = VaultStreamBackend::new(SimulatedVaultBackend::new(), config(), 4, Arc::new(clock.clone()));
        let qos = Qos::default();

        let opened = alice
            .open_connect(&OpenRequest {
                source: "qkd://alice",
                destination: "qkd://bob",
                qos: &qos,
                ksid: Ksid::zero(),
            })
            .unwrap();
        assert_eq!(opened.status, StreamStatus::PeerDisconnected);

        let joined = bob
            .open_connect(&OpenRequest {
                source: "qkd://bob",
                destination: "qkd://alice",
                qos: &qos,
                ksid: opened.ksid,
            })
            .unwrap();
        assert_eq!(joined.status, StreamStatus::Success);

        clock.advance(500);
        let a = alice.get_key(&opened.ksid, 3, None).unwrap();
        let b = bob.get_key(&opened.ksid, 3, None).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_oversized_chunk_rejected_without_slot() {
        let mut bridge = VaultStreamBackend::new(
            SimulatedVaultBackend::new(),
            config(),
            1,
            Arc::new(ManualClock::new(0)),
        );
        let qos = Qos {
            key_chunk_size: MAX_CHUNK_SIZE + 1,
            ..Qos::default()
        };
        let err = bridge
            .open_connect(&OpenRequest {
                source: "a",
                destination: "b",
                qos: &qos,
                ksid: Ksid::zero(),
            })
            .unwrap_err();
        assert_eq!(err.stream_status(), StreamStatus::QosNotMet);
        assert_eq!(bridge.sessions().active(), 0);
    }
}
