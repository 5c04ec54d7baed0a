/*!
Backend selection and construction.

A [`Config`] names one backend per API; [`QkdContext::from_config`]
builds both engines from it once. Selection is fixed for the lifetime of
the context.
*/

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::core::backend::{StreamBackend, VaultBackend};
use crate::core::clock::{Clock, MonotonicClock};
use crate::core::constants::DEFAULT_MAX_STREAMS;
use crate::core::constants::rest::{DEFAULT_KEY_SIZE_BITS, DEFAULT_TIMEOUT_SECS};
use crate::core::error::{Error, Result};
use crate::stream::api::StreamApi;
use crate::stream::legacy::{LegacyServerConfig, LegacyStreamBackend};
use crate::stream::simulated::SimulatedStreamBackend;
use crate::stream::vault_bridge::{BridgeConfig, VaultStreamBackend};
use crate::vault::api::VaultApi;
use crate::vault::credentials::CredentialStore;
use crate::vault::rest::{RestOptions, RestVaultBackend};
use crate::vault::simulated::SimulatedVaultBackend;
use crate::vault::transport::HttpsTransport;

/// Backend family named in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Simulated,
    /// Legacy key stream server; Stream API only
    Legacy,
    /// ETSI GS QKD 014 REST KME
    Etsi014,
    None,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulated" => Ok(BackendKind::Simulated),
            "legacy" | "python_client" => Ok(BackendKind::Legacy),
            "etsi014" | "rest" => Ok(BackendKind::Etsi014),
            "none" | "" => Ok(BackendKind::None),
            other => Err(Error::InvalidArgument(format!("unknown backend {other:?}"))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Simulated => write!(f, "simulated"),
            BackendKind::Legacy => write!(f, "legacy"),
            BackendKind::Etsi014 => write!(f, "etsi014"),
            BackendKind::None => write!(f, "none"),
        }
    }
}

/// REST KME settings shared by the vault backend and the stream bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestConfig {
    pub kme_hostname: String,
    pub master_sae_id: String,
    pub slave_sae_id: String,
    pub credentials: CredentialStore,
    pub include_master_sae_id: bool,
    pub default_key_size: u32,
    pub timeout: Duration,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            kme_hostname: String::new(),
            master_sae_id: String::new(),
            slave_sae_id: String::new(),
            credentials: CredentialStore::default(),
            include_master_sae_id: false,
            default_key_size: DEFAULT_KEY_SIZE_BITS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl RestConfig {
    fn backend(&self) -> RestVaultBackend<HttpsTransport> {
        let transport = HttpsTransport::new(self.credentials.clone()).with_timeout(self.timeout);
        RestVaultBackend::with_options(
            transport,
            RestOptions {
                default_key_size: self.default_key_size,
                include_master_sae_id: self.include_master_sae_id,
            },
        )
    }

    fn bridge(&self) -> BridgeConfig {
        BridgeConfig {
            kme_hostname: self.kme_hostname.clone(),
            master_sae_id: self.master_sae_id.clone(),
            slave_sae_id: self.slave_sae_id.clone(),
        }
    }
}

/// Full library configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub stream_backend: BackendKind,
    pub vault_backend: BackendKind,
    /// Stream session table capacity
    pub max_streams: usize,
    pub legacy: LegacyServerConfig,
    pub rest: RestConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stream_backend: BackendKind::Simulated,
            vault_backend: BackendKind::Simulated,
            max_streams: DEFAULT_MAX_STREAMS,
            legacy: LegacyServerConfig::default(),
            rest: RestConfig::default(),
        }
    }
}

impl Config {
    /// Simulated backends for both APIs
    pub fn simulated() -> Self {
        Self::default()
    }

    pub fn with_stream_backend(mut self, kind: BackendKind) -> Self {
        self.stream_backend = kind;
        self
    }

    pub fn with_vault_backend(mut self, kind: BackendKind) -> Self {
        self.vault_backend = kind;
        self
    }

    pub fn with_max_streams(mut self, max_streams: usize) -> Self {
        self.max_streams = max_streams;
        self
    }

    /// Read configuration from `QKD_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Config::from_env`] with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(kind) = lookup("QKD_BACKEND") {
            let kind = kind.parse()?;
            config.stream_backend = kind;
            config.vault_backend = kind;
        }
        if let Some(kind) = lookup("QKD_STREAM_BACKEND") {
            config.stream_backend = kind.parse()?;
        }
        if let Some(kind) = lookup("QKD_VAULT_BACKEND") {
            config.vault_backend = kind.parse()?;
        }
        if let Some(max) = lookup("QKD_MAX_STREAMS") {
            config.max_streams = parse_number("QKD_MAX_STREAMS", &max)?;
        }

        if let Some(address) = lookup("QKD_SERVER_ADDRESS") {
            config.legacy.address = address;
        }
        if let Some(port) = lookup("QKD_SERVER_PORT") {
            config.legacy.port = parse_number("QKD_SERVER_PORT", &port)?;
        }

        let rest = &mut config.rest;
        if let Some(host) = lookup("QKD_KME_HOSTNAME") {
            rest.kme_hostname = host;
        }
        if let Some(id) = lookup("QKD_MASTER_SAE_ID") {
            rest.master_sae_id = id;
        }
        if let Some(id) = lookup("QKD_SLAVE_SAE_ID") {
            rest.slave_sae_id = id;
        }
        if let Some(flag) = lookup("QKD_INCLUDE_MASTER_SAE_ID") {
            rest.include_master_sae_id = matches!(flag.trim(), "1" | "true" | "TRUE" | "yes");
        }
        rest.credentials = CredentialStore::from_lookup(&lookup);

        Ok(config)
    }
}

fn parse_number<N: FromStr>(name: &str, value: &str) -> Result<N> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("{name} must be a number, got {value:?}")))
}

/// Both engines, built once from a [`Config`]
pub struct QkdContext {
    pub stream: StreamApi,
    pub vault: VaultApi,
}

impl QkdContext {
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Build from `QKD_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(&Config::from_env()?)
    }

    /// Build with a caller-supplied clock for stream sessions
    pub fn with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.max_streams == 0 {
            return Err(Error::InvalidArgument("max_streams must be at least 1".into()));
        }

        let stream: Option<Box<dyn StreamBackend>> = match config.stream_backend {
            BackendKind::Simulated => Some(Box::new(SimulatedStreamBackend::new(config.max_streams, clock))),
            BackendKind::Legacy => Some(Box::new(LegacyStreamBackend::new(config.legacy.clone()))),
            BackendKind::Etsi014 => Some(Box::new(VaultStreamBackend::new(
                config.rest.backend(),
                config.rest.bridge(),
                config.max_streams,
                clock,
            ))),
            BackendKind::None => None,
        };

        let vault: Option<Box<dyn VaultBackend>> = match config.vault_backend {
            BackendKind::Simulated => Some(Box::new(SimulatedVaultBackend::new())),
            BackendKind::Etsi014 => Some(Box::new(config.rest.backend())),
            BackendKind::Legacy => {
                return Err(Error::InvalidArgument(
                    "the legacy backend only serves the stream API".into(),
                ));
            }
            BackendKind::None => None,
        };

        info!(
            "QKD context: stream backend {}, vault backend {}",
            config.stream_backend, config.vault_backend
        );
        Ok(Self {
            stream: stream.map_or_else(StreamApi::unconfigured, StreamApi::new),
            vault: vault.map_or_else(VaultApi::unconfigured, VaultApi::new),
        })
    }
}
