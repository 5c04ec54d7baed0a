/*!
Fixed-capacity key stream session table.

This is the state machine behind every stream backend that keeps sessions
in process: admission control on OPEN_CONNECT, rate limiting on GET_KEY
and the two-phase close governed by the stream TTL.

Slots are scanned linearly and allocated first-free, so exhaustion and
reuse are observable in allocation order. The table has no internal
locking; callers sharing it across threads must provide their own.
*/

use std::fmt;
use std::sync::Arc;

use hkdf::Hkdf;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::core::backend::Role;
use crate::core::clock::{Clock, MonotonicClock};
use crate::core::constants::DEFAULT_MAX_STREAMS;
use crate::core::constants::sizes::MAX_KEY_CHUNK_SIZE;
use crate::core::error::{Error, Result};
use crate::stream::types::{Ksid, MetadataBuffer, OpenRequest, OpenResponse, Qos, StreamStatus};

/// Lifecycle state of an allocated session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Open and serving keys
    Open,
    /// CLOSE was called before the TTL elapsed
    PendingClose,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Open => write!(f, "Open"),
            SessionState::PendingClose => write!(f, "PendingClose"),
        }
    }
}

/// One key stream
#[derive(Debug, Clone)]
pub struct Session {
    ksid: Ksid,
    qos: Qos,
    role: Role,
    created_ms: u64,
    last_index: Option<u32>,
    pending_close: bool,
    /// Shared secret the chunks are expanded from; `None` derives from the KSID alone
    seed: Option<Vec<u8>>,
}

impl Session {
    pub fn ksid(&self) -> &Ksid {
        &self.ksid
    }

    pub fn qos(&self) -> &Qos {
        &self.qos
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Highest index served so far
    pub fn last_index(&self) -> Option<u32> {
        self.last_index
    }

    pub fn state(&self) -> SessionState {
        if self.pending_close {
            SessionState::PendingClose
        } else {
            SessionState::Open
        }
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_ms)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.age_ms(now_ms) >= self.qos.ttl_ms()
    }
}

/// Key stream table shared by every caller of one backend
pub struct SessionTable {
    slots: Vec<Option<Session>>,
    clock: Arc<dyn Clock>,
}

impl SessionTable {
    /// Create a table with `capacity` slots driven by `clock`
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: vec![None; capacity],
            clock,
        }
    }

    /// Create a table with the default capacity and a monotonic clock
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MAX_STREAMS, Arc::new(MonotonicClock::new()))
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of allocated slots, pending-close ones included
    pub fn active(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn get(&self, ksid: &Ksid) -> Option<&Session> {
        self.find(ksid).and_then(|idx| self.slots[idx].as_ref())
    }

    /// Free every session whose TTL has elapsed
    pub fn reap_expired(&mut self) -> usize {
        let now = self.clock.now_ms();
        let mut freed = 0;
        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|session| session.is_expired(now)) {
                if let Some(session) = slot.take() {
                    debug!("Key stream {} expired, slot freed", session.ksid);
                }
                freed += 1;
            }
        }
        freed
    }

    /// Admit a new session.
    ///
    /// `source` is called once the request has passed admission control,
    /// with the caller's role and requested KSID; it returns the KSID to
    /// register and an optional seed for key expansion. Nothing is
    /// allocated if it fails.
    pub fn open<F>(&mut self, request: &OpenRequest<'_>, source: F) -> Result<OpenResponse>
    where
        F: FnOnce(Role, Ksid) -> Result<(Ksid, Option<Vec<u8>>)>,
    {
        if let Err(err) = request.qos.validate() {
            warn!("OPEN_CONNECT rejected: {err}");
            return Err(err);
        }

        self.reap_expired();

        let role = if request.ksid.is_zero() {
            Role::Initiator
        } else {
            Role::Responder
        };

        if role == Role::Responder && self.find(&request.ksid).is_some() {
            return Err(Error::KsidInUse(request.ksid));
        }

        let slot = self.free_slot().ok_or_else(|| {
            Error::NoConnection(format!("all {} key stream slots in use", self.capacity()))
        })?;

        let (ksid, seed) = source(role, request.ksid)?;
        if ksid.is_zero() {
            return Err(Error::NoConnection("backend produced an empty KSID".into()));
        }
        if self.find(&ksid).is_some() {
            return Err(Error::KsidInUse(ksid));
        }

        self.slots[slot] = Some(Session {
            ksid,
            qos: request.qos.clone(),
            role,
            created_ms: self.clock.now_ms(),
            last_index: None,
            pending_close: false,
            seed,
        });

        let status = match role {
            Role::Initiator => StreamStatus::PeerDisconnected,
            Role::Responder => StreamStatus::Success,
        };
        info!(
            "Key stream {ksid} opened as {role} ({} -> {}), slot {slot}",
            request.source, request.destination
        );

        Ok(OpenResponse {
            ksid,
            status,
            qos: request.qos.clone(),
        })
    }

    /// Deliver the chunk at `index` if the negotiated rate allows it
    pub fn get_key(
        &mut self,
        ksid: &Ksid,
        index: u32,
        metadata: Option<&mut MetadataBuffer>,
    ) -> Result<Vec<u8>> {
        let now = self.clock.now_ms();
        let idx = self.find(ksid).ok_or(Error::PeerNotConnected(*ksid))?;
        let session = self.slots[idx].as_mut().ok_or(Error::PeerNotConnected(*ksid))?;

        if session.is_expired(now) {
            debug!("GET_KEY on expired key stream {ksid}");
            return Err(Error::PeerNotConnected(*ksid));
        }

        let elapsed = session.age_ms(now);
        let available = session.qos.max_deliverable_index(elapsed);
        if u64::from(index) > available {
            return Err(Error::InsufficientKey { index, available });
        }

        let key = derive_key(
            &session.ksid,
            index,
            session.qos.key_chunk_size as usize,
            session.seed.as_deref(),
        )?;

        if let Some(buffer) = metadata {
            let document = serde_json::json!({ "age": elapsed, "hops": 0 }).to_string();
            buffer.fill(document.as_bytes())?;
        }

        session.last_index = Some(session.last_index.map_or(index, |last| last.max(index)));
        Ok(key)
    }

    /// Close a session: soft before the TTL, hard after it
    pub fn close(&mut self, ksid: &Ksid) -> Result<()> {
        let now = self.clock.now_ms();
        let idx = self.find(ksid).ok_or(Error::PeerNotConnected(*ksid))?;

        let expired = self.slots[idx]
            .as_ref()
            .is_some_and(|session| session.is_expired(now));
        if expired {
            self.slots[idx] = None;
            debug!("Key stream {ksid} closed and freed");
        } else if let Some(session) = self.slots[idx].as_mut() {
            session.pending_close = true;
            debug!("Key stream {ksid} pending close until TTL");
        }
        Ok(())
    }

    fn find(&self, ksid: &Ksid) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|session| &session.ksid == ksid))
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }
}

/// Derive `len` bytes of key material for `index`.
///
/// Without a seed the chunk is SHA-256 in counter mode over the KSID and
/// index; with a seed it is HKDF-SHA256 expanded from the seed, salted by
/// the KSID. Either way both peers compute the same bytes.
pub fn derive_key(ksid: &Ksid, index: u32, len: usize, seed: Option<&[u8]>) -> Result<Vec<u8>> {
    if len > MAX_KEY_CHUNK_SIZE as usize {
        return Err(Error::QosNotMet(format!("key chunk of {len} bytes exceeds {MAX_KEY_CHUNK_SIZE}")));
    }
    let mut key = vec![0u8; len];
    match seed {
        Some(seed) => {
            let hkdf = Hkdf::<Sha256>::new(Some(ksid.as_bytes()), seed);
            hkdf.expand(&index.to_be_bytes(), &mut key)
                .map_err(|_| Error::QosNotMet(format!("key chunk of {len} bytes cannot be expanded")))?;
        }
        None => {
            for (counter, block) in key.chunks_mut(32).enumerate() {
                let digest = Sha256::new()
                    .chain_update(ksid.as_bytes())
                    .chain_update(index.to_be_bytes())
                    .chain_update((counter as u32).to_be_bytes())
                    .finalize();
                block.copy_from_slice(&digest[..block.len()]);
            }
        }
    }
    Ok(key)
}
