// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Entry point: owns the transport link, the session registry and a weak
// link to the shared memory map service.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::command::CommandChannel;
use crate::config::ClientConfig;
use crate::dma::{self, DmaAllocator};
use crate::error::{Error, Result};
use crate::mmap::{MapLease, MapSlot};
use crate::proto::packet::session_port;
use crate::registry::SessionHandle;
use crate::ring::MapRequest;
use crate::session::{EventCallback, Registry, Session, SessionCore};
use crate::transport::{PacketSink, Transport};

pub struct AsmClient {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    registry: Arc<Registry>,
    mmap: MapSlot,
    alloc: Arc<dyn DmaAllocator>,
}

impl AsmClient {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self::with_allocator(transport, config, dma::default_allocator())
    }

    pub fn with_allocator(transport: Arc<dyn Transport>, config: ClientConfig, alloc: Arc<dyn DmaAllocator>) -> Self {
        let registry = Arc::new(Registry::new(config.max_sessions));
        Self { transport, config, registry, mmap: Arc::new(Mutex::new(Weak::new())), alloc }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open a new session in the lowest free slot. The first session also
    /// opens the shared memory map service.
    pub fn open_session(&self, callback: Option<EventCallback>) -> Result<Session> {
        let mmap = MapLease::acquire(&self.mmap, self.transport.as_ref(), self.config.command_timeout)?;

        let mut core = None;
        let (handle, _) = self.registry.allocate_with(|h| {
            let channel = CommandChannel::new(h.id(), self.config.command_timeout);
            let c = Arc::new(SessionCore::new(h.id(), channel, self.config.default_io_mode, callback));
            let weak = Arc::downgrade(&c);
            core = Some(c);
            Ok(weak)
        })?;
        let core = core.ok_or_else(|| Error::exhausted("session construction failed"))?;

        let sink = Arc::downgrade(&core) as Weak<dyn PacketSink>;
        let endpoint = match self.transport.register(session_port(handle.id()), sink) {
            Ok(ep) => ep,
            Err(e) => {
                if let Err(re) = self.registry.release(handle) {
                    tracing::error!(session = handle.id(), error = %re, "registry release failed");
                }
                return Err(e);
            }
        };
        tracing::debug!(session = handle.id(), port = format_args!("{:#x}", endpoint.port()), "session opened");
        Ok(Session::new(handle, core, endpoint, mmap, Arc::clone(&self.registry), Arc::clone(&self.alloc)))
    }

    /// Number of sessions currently holding the memory map service.
    pub fn mmap_ref_count(&self) -> usize {
        self.mmap.lock().strong_count()
    }

    /// Map memory outside any ring. Rejected when no session holds the
    /// service.
    pub fn map(&self, req: &MapRequest) -> Result<()> {
        MapLease::existing(&self.mmap).ok_or_else(|| Error::invalid("memory map service not open"))?.map(req)
    }

    pub fn unmap(&self, req: &MapRequest) -> Result<()> {
        MapLease::existing(&self.mmap).ok_or_else(|| Error::invalid("memory map service not open"))?.unmap(req)
    }

    pub fn session_count(&self) -> usize {
        self.registry.live_count()
    }

    pub fn is_live(&self, handle: SessionHandle) -> bool {
        self.registry.is_live(handle)
    }
}
