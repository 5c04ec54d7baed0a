/*!
ETSI GS QKD 014 data formats.

Field names follow the REST JSON encoding; Rust names are snake case
with the JSON spelling kept through `serde(rename)`.
*/

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{Error, Result};

/// Vault API status codes, numerically equal to the HTTP codes they stand for
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultStatus {
    Ok = 200,
    BadRequest = 400,
    Unauthorized = 401,
    ServerError = 503,
}

impl VaultStatus {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            200 => Some(VaultStatus::Ok),
            400 => Some(VaultStatus::BadRequest),
            401 => Some(VaultStatus::Unauthorized),
            503 => Some(VaultStatus::ServerError),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> u32 {
        *self as u32
    }
}

impl fmt::Display for VaultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VaultStatus::Ok => "OK",
            VaultStatus::BadRequest => "BAD_REQUEST",
            VaultStatus::Unauthorized => "UNAUTHORIZED",
            VaultStatus::ServerError => "SERVER_ERROR",
        };
        write!(f, "{name} ({})", self.as_u32())
    }
}

/// Link capability snapshot returned by GET_STATUS.
///
/// Numeric fields a KME leaves out decode as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Status {
    #[serde(rename = "source_KME_ID", default, skip_serializing_if = "Option::is_none")]
    pub source_kme_id: Option<String>,
    #[serde(rename = "target_KME_ID", default, skip_serializing_if = "Option::is_none")]
    pub target_kme_id: Option<String>,
    #[serde(rename = "master_SAE_ID", default, skip_serializing_if = "Option::is_none")]
    pub master_sae_id: Option<String>,
    #[serde(rename = "slave_SAE_ID", default, skip_serializing_if = "Option::is_none")]
    pub slave_sae_id: Option<String>,
    /// Default key size in bits
    pub key_size: u32,
    pub stored_key_count: u32,
    pub max_key_count: u32,
    pub max_key_per_request: u32,
    /// Largest key size in bits
    pub max_key_size: u32,
    /// Smallest key size in bits
    pub min_key_size: u32,
    #[serde(rename = "max_SAE_ID_count", default)]
    pub max_sae_id_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_extension: Option<Value>,
}

/// Parameters of a GET_KEY call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyRequest {
    /// Number of keys, 1 when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u32>,
    /// Key size in bits, backend default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(rename = "additional_slave_SAE_IDs", default, skip_serializing_if = "Vec::is_empty")]
    pub additional_slave_sae_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension_mandatory: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension_optional: Vec<Value>,
}

impl KeyRequest {
    /// Request `number` keys of `size` bits
    pub fn new(number: u32, size: u32) -> Self {
        Self {
            number: Some(number),
            size: Some(size),
            ..Self::default()
        }
    }

    /// One key of the backend's default size
    pub fn new_single() -> Self {
        Self {
            number: Some(1),
            ..Self::default()
        }
    }

    pub fn requested_number(&self) -> u32 {
        self.number.unwrap_or(1)
    }
}

/// One key: an identifier and base64-encoded material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    #[serde(rename = "key_ID")]
    pub key_id: String,
    #[serde(rename = "key_ID_extension", default, skip_serializing_if = "Option::is_none")]
    pub key_id_extension: Option<Value>,
    /// Base64 of the key bytes
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_extension: Option<Value>,
}

impl Key {
    /// Wrap raw material under `key_id`
    pub fn from_material(key_id: impl Into<String>, material: &[u8]) -> Self {
        Self {
            key_id: key_id.into(),
            key_id_extension: None,
            key: STANDARD.encode(material),
            key_extension: None,
        }
    }

    /// Decoded key bytes
    pub fn material(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.key)
            .map_err(|err| Error::Decode(format!("key {} is not valid base64: {err}", self.key_id)))
    }
}

/// Keys returned by GET_KEY and GET_KEY_WITH_IDS
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyContainer {
    pub keys: Vec<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_container_extension: Option<Value>,
}

impl KeyContainer {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keep exactly the requested keys, in request order.
    ///
    /// Fails if any requested ID is missing from the container.
    pub fn restrict_to(self, key_ids: &KeyIds) -> Result<KeyContainer> {
        let mut keys = Vec::with_capacity(key_ids.len());
        for wanted in &key_ids.key_ids {
            let key = self
                .keys
                .iter()
                .find(|key| key.key_id == wanted.key_id)
                .ok_or_else(|| Error::Decode(format!("key {} missing from response", wanted.key_id)))?;
            keys.push(key.clone());
        }
        Ok(KeyContainer {
            keys,
            key_container_extension: self.key_container_extension,
        })
    }
}

/// One requested key identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyId {
    #[serde(rename = "key_ID")]
    pub key_id: String,
    #[serde(rename = "key_ID_extension", default, skip_serializing_if = "Option::is_none")]
    pub key_id_extension: Option<Value>,
}

impl KeyId {
    pub fn new(key_id: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            key_id_extension: None,
        }
    }
}

/// Identifier set for GET_KEY_WITH_IDS
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyIds {
    #[serde(rename = "key_IDs")]
    pub key_ids: Vec<KeyId>,
    #[serde(rename = "key_IDs_extension", default, skip_serializing_if = "Option::is_none")]
    pub key_ids_extension: Option<Value>,
}

impl KeyIds {
    pub fn len(&self) -> usize {
        self.key_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_ids.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for KeyIds {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            key_ids: iter.into_iter().map(KeyId::new).collect(),
            key_ids_extension: None,
        }
    }
}
