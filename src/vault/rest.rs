/*!
Vault backend for KMEs exposing the ETSI GS QKD 014 REST interface.

Endpoints, relative to `https://{kme}/api/v1/keys/{sae}`:

- `GET  status` with the initiator credentials
- `GET  enc_keys?number=N&size=S` with the initiator credentials
- `POST dec_keys` with the responder credentials

A real KME hands out each key to the responder once; a second
`dec_keys` for the same ID is refused with an HTTP error.
*/

use log::{debug, error};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::core::backend::{Role, VaultBackend};
use crate::core::constants::rest::{API_PREFIX, DEFAULT_KEY_SIZE_BITS};
use crate::core::error::{Error, Result};
use crate::vault::transport::{KmeRequest, KmeTransport, Method};
use crate::vault::types::{KeyContainer, KeyIds, KeyRequest, Status};

/// Request shaping options for the REST backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestOptions {
    /// Key size sent when the caller leaves it unset, in bits
    pub default_key_size: u32,
    /// Add `master_SAE_ID` to each `dec_keys` entry, for KMEs that demand it
    pub include_master_sae_id: bool,
}

impl Default for RestOptions {
    fn default() -> Self {
        Self {
            default_key_size: DEFAULT_KEY_SIZE_BITS,
            include_master_sae_id: false,
        }
    }
}

pub struct RestVaultBackend<T: KmeTransport> {
    transport: T,
    options: RestOptions,
}

impl<T: KmeTransport> RestVaultBackend<T> {
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, RestOptions::default())
    }

    pub fn with_options(transport: T, options: RestOptions) -> Self {
        Self { transport, options }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn call<R: DeserializeOwned>(&self, request: KmeRequest, role: Role) -> Result<R> {
        let response = self.transport.execute(&request, role)?;
        if response.status >= 400 {
            error!("KME answered HTTP {} for {}", response.status, request.url);
            debug!("KME error body: {}", response.body);
            return Err(Error::Http(response.status));
        }
        serde_json::from_str(&response.body)
            .map_err(|err| Error::Decode(format!("unexpected KME response from {}: {err}", request.url)))
    }
}

/// Base URL for keys shared with `sae_id`
pub fn keys_url(kme_hostname: &str, sae_id: &str) -> String {
    let host = kme_hostname.trim_end_matches('/');
    if host.contains("://") {
        format!("{host}/{API_PREFIX}/{sae_id}")
    } else {
        format!("https://{host}/{API_PREFIX}/{sae_id}")
    }
}

impl<T: KmeTransport> VaultBackend for RestVaultBackend<T> {
    fn name(&self) -> &str {
        "etsi014"
    }

    fn get_status(&mut self, kme_hostname: &str, slave_sae_id: &str) -> Result<Status> {
        let request = KmeRequest {
            method: Method::Get,
            url: format!("{}/status", keys_url(kme_hostname, slave_sae_id)),
            body: None,
        };
        self.call(request, Role::Initiator)
    }

    fn get_key(&mut self, kme_hostname: &str, slave_sae_id: &str, request: &KeyRequest) -> Result<KeyContainer> {
        let number = request.requested_number();
        let size = request.size.unwrap_or(self.options.default_key_size);
        let request = KmeRequest {
            method: Method::Get,
            url: format!("{}/enc_keys?number={number}&size={size}", keys_url(kme_hostname, slave_sae_id)),
            body: None,
        };
        self.call(request, Role::Initiator)
    }

    fn get_key_with_ids(&mut self, kme_hostname: &str, master_sae_id: &str, key_ids: &KeyIds) -> Result<KeyContainer> {
        let entries: Vec<Value> = key_ids
            .key_ids
            .iter()
            .map(|id| {
                if self.options.include_master_sae_id {
                    json!({ "key_ID": id.key_id, "master_SAE_ID": master_sae_id })
                } else {
                    json!({ "key_ID": id.key_id })
                }
            })
            .collect();
        let request = KmeRequest {
            method: Method::Post,
            url: format!("{}/dec_keys", keys_url(kme_hostname, master_sae_id)),
            body: Some(json!({ "key_IDs": entries }).to_string()),
        };
        self.call(request, Role::Responder)
    }
}
