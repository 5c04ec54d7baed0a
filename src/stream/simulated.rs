/*!
In-process stream backend.

Keys are derived from the KSID and index only, so two simulated
contexts (one per peer) hand out identical chunks for the same stream.
*/

use std::sync::Arc;

use crate::core::backend::StreamBackend;
use crate::core::clock::Clock;
use crate::core::error::Result;
use crate::stream::session::SessionTable;
use crate::stream::types::{Ksid, MetadataBuffer, OpenRequest, OpenResponse};

pub struct SimulatedStreamBackend {
    table: SessionTable,
}

impl SimulatedStreamBackend {
    /// Backend with `capacity` stream slots timed by `clock`
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            table: SessionTable::new(capacity, clock),
        }
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.table
    }
}

impl Default for SimulatedStreamBackend {
    fn default() -> Self {
        Self {
            table: SessionTable::with_defaults(),
        }
    }
}

impl StreamBackend for SimulatedStreamBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open_connect(&mut self, request: &OpenRequest<'_>) -> Result<OpenResponse> {
        self.table.open(request, |_, requested| {
            let ksid = if requested.is_zero() { Ksid::generate() } else { requested };
            Ok((ksid, None))
        })
    }

    fn get_key(&mut self, ksid: &Ksid, index: u32, metadata: Option<&mut MetadataBuffer>) -> Result<Vec<u8>> {
        self.table.get_key(ksid, index, metadata)
    }

    fn close(&mut self, ksid: &Ksid) -> Result<()> {
        self.table.close(ksid)
    }
}
