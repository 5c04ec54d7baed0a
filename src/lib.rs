/*!
# QKD ETSI API

Client library giving classical applications access to QKD-derived
symmetric keys through the two standardized key delivery interfaces.

## Overview

- **Stream API** (ETSI GS QKD 004): open a key stream with negotiated
  QoS, pull key chunks by index, close it again
- **Vault API** (ETSI GS QKD 014): fetch batches of identified keys from
  a KME and retrieve the peer's keys by ID

Each API dispatches to one backend chosen when the [`QkdContext`] is
built:

- `simulated`: in-process backends with deterministic key material
- `etsi014`: a REST KME reached over mutual TLS; also usable as a Stream
  backend through the vault bridge
- `legacy`: a TCP key stream server speaking the framed wire protocol

```no_run
use qkd_etsi_api::{Config, Ksid, Qos, QkdContext};

let mut ctx = QkdContext::from_config(&Config::simulated())?;
let opened = ctx.stream.open_connect("qkd://alice", "qkd://bob", &Qos::default(), Ksid::zero())?;
let key = ctx.stream.get_key(&opened.ksid, 0, None)?;
assert_eq!(key.len(), 32);
# Ok::<(), qkd_etsi_api::Error>(())
```
*/

// Shared contracts, errors and configuration
pub mod core;

// Stateful key stream interface
pub mod stream;

// Stateless key vault interface
pub mod vault;

// C bindings
#[cfg(feature = "ffi")]
pub mod ffi;

pub use crate::core::backend::{Role, StreamBackend, VaultBackend};
pub use crate::core::clock::{Clock, ManualClock, MonotonicClock};
pub use crate::core::config::{BackendKind, Config, QkdContext};
pub use crate::core::error::{Api, Error, Result};
pub use crate::stream::{Ksid, MetadataBuffer, OpenResponse, Qos, StreamApi, StreamStatus};
pub use crate::vault::{Key, KeyContainer, KeyId, KeyIds, KeyRequest, Status, VaultApi, VaultStatus};
