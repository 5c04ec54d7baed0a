/*!
Role-based mTLS credentials for talking to a KME.

The initiator (master SAE) and the responder (slave SAE) each have a
client certificate, private key and CA bundle. Paths are resolved when a
request is made, so rotating files on disk takes effect on the next call.
*/

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::backend::Role;
use crate::core::error::{Error, Result};

/// PEM file locations for one role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSet {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub ca_cert_path: PathBuf,
}

/// PEM contents loaded from a [`CredentialSet`]
#[derive(Clone)]
pub struct LoadedCredentials {
    /// Client certificate followed by its private key
    pub identity_pem: Vec<u8>,
    pub ca_pem: Vec<u8>,
}

impl std::fmt::Debug for LoadedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedCredentials")
            .field("identity_pem", &format_args!("<{} bytes>", self.identity_pem.len()))
            .field("ca_pem", &format_args!("<{} bytes>", self.ca_pem.len()))
            .finish()
    }
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|err| Error::Credentials(format!("cannot read {what} {}: {err}", path.display())))
}

impl CredentialSet {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>, ca_cert_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            ca_cert_path: ca_cert_path.into(),
        }
    }

    /// Read all three files
    pub fn load(&self) -> Result<LoadedCredentials> {
        let mut identity_pem = read_pem(&self.cert_path, "certificate")?;
        if !identity_pem.ends_with(b"\n") {
            identity_pem.push(b'\n');
        }
        identity_pem.extend(read_pem(&self.key_path, "private key")?);
        let ca_pem = read_pem(&self.ca_cert_path, "CA certificate")?;
        Ok(LoadedCredentials { identity_pem, ca_pem })
    }
}

/// Credentials for both roles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialStore {
    pub initiator: Option<CredentialSet>,
    pub responder: Option<CredentialSet>,
}

impl CredentialStore {
    /// Read the `QKD_MASTER_*` and `QKD_SLAVE_*` path variables.
    ///
    /// A role without a complete set of its own falls back to the shared
    /// `QKD_CERT_PATH`, `QKD_KEY_PATH` and `QKD_CA_CERT_PATH`, for KMEs that
    /// issue a single client certificate.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`CredentialStore::from_env`] with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |prefix: &str| -> Option<CredentialSet> {
            let cert = lookup(&format!("QKD_{prefix}CERT_PATH"))?;
            let key = lookup(&format!("QKD_{prefix}KEY_PATH"))?;
            let ca = lookup(&format!("QKD_{prefix}CA_CERT_PATH"))?;
            Some(CredentialSet::new(cert, key, ca))
        };
        let shared = set("");
        Self {
            initiator: set("MASTER_").or_else(|| shared.clone()),
            responder: set("SLAVE_").or(shared),
        }
    }

    /// The credential set used for `role`
    pub fn resolve(&self, role: Role) -> Result<&CredentialSet> {
        let set = match role {
            Role::Initiator => self.initiator.as_ref(),
            Role::Responder => self.responder.as_ref(),
        };
        set.ok_or_else(|| Error::Credentials(format!("no {role} credentials configured")))
    }
}
