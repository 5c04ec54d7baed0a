/*!
Stream API entry points.

`StreamApi` checks arguments, confirms a backend is configured and then
forwards to it. It holds no session state of its own.
*/

use log::{debug, warn};

use crate::core::backend::StreamBackend;
use crate::core::error::{Api, Error, Result, invalid_arg};
use crate::stream::types::{Ksid, MetadataBuffer, OpenRequest, OpenResponse, Qos};

/// Key stream interface (ETSI GS QKD 004)
pub struct StreamApi {
    backend: Option<Box<dyn StreamBackend>>,
}

impl StreamApi {
    /// Engine dispatching to `backend`
    pub fn new(backend: Box<dyn StreamBackend>) -> Self {
        Self { backend: Some(backend) }
    }

    /// Engine with no backend; every call fails with `NoBackend`
    pub fn unconfigured() -> Self {
        Self { backend: None }
    }

    /// Name of the configured backend
    pub fn backend_name(&self) -> Option<&str> {
        self.backend.as_deref().map(|backend| backend.name())
    }

    fn backend(&mut self) -> Result<&mut (dyn StreamBackend + 'static)> {
        self.backend.as_deref_mut().ok_or(Error::NoBackend(Api::Stream))
    }

    /// Open a key stream.
    ///
    /// Pass `Ksid::zero()` to initiate a new stream, or the peer's KSID to
    /// join it.
    pub fn open_connect(&mut self, source: &str, destination: &str, qos: &Qos, ksid: Ksid) -> Result<OpenResponse> {
        if source.is_empty() || destination.is_empty() {
            return invalid_arg("OPEN_CONNECT requires source and destination URIs");
        }
        let backend = self.backend()?;
        debug!("OPEN_CONNECT via {} ({source} -> {destination})", backend.name());

        let request = OpenRequest {
            source,
            destination,
            qos,
            ksid,
        };
        backend.open_connect(&request).inspect_err(|err| {
            warn!("OPEN_CONNECT failed: {err} [{}]", err.stream_status());
        })
    }

    /// Fetch the key chunk at `index`
    pub fn get_key(&mut self, ksid: &Ksid, index: u32, metadata: Option<&mut MetadataBuffer>) -> Result<Vec<u8>> {
        if ksid.is_zero() {
            return Err(Error::PeerNotConnected(*ksid));
        }
        self.backend()?.get_key(ksid, index, metadata)
    }

    /// Close a key stream
    pub fn close(&mut self, ksid: &Ksid) -> Result<()> {
        if ksid.is_zero() {
            return Err(Error::PeerNotConnected(*ksid));
        }
        self.backend()?.close(ksid)
    }
}
