// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Memory map service: the one channel through which every session registers
// its ring memory with the remote processor.
//
// Shared as `Arc<MemoryMapService>`. Each session holds a strong reference;
// the client keeps only a `Weak`, so the service (and its endpoint
// registration) goes away when the last session does. Map and unmap
// requests are serialized by an internal flight lock since they share one
// pending slot.
//
// Sessions hold the service through a `MapLease`. Releasing a lease happens
// under the client's slot lock, so teardown of the last reference (endpoint
// deregistration included) cannot interleave with a new open.

use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::command::CommandChannel;
use crate::error::Result;
use crate::proto::opcode::{
    SESSION_CMD_MEMORY_MAP, SESSION_CMD_MEMORY_MAP_REGIONS, SESSION_CMD_MEMORY_UNMAP,
    SESSION_CMD_MEMORY_UNMAP_REGIONS,
};
use crate::proto::packet::MAP_SERVICE_PORT;
use crate::proto::params;
use crate::ring::MapRequest;
use crate::transport::{Endpoint, PacketSink, Transport};

/// Session id carried in map-service tokens.
pub const MAP_SESSION_ID: u8 = 0;

/// Inbound side of the service; see `dispatch` for the handler.
pub(crate) struct MapSink {
    pub(crate) channel: CommandChannel,
}

pub struct MemoryMapService {
    sink: Arc<MapSink>,
    endpoint: Box<dyn Endpoint>,
    flight: Mutex<()>,
}

impl MemoryMapService {
    /// Register the shared endpoint and return the service.
    pub fn open(transport: &dyn Transport, timeout: std::time::Duration) -> Result<Arc<Self>> {
        let sink = Arc::new(MapSink { channel: CommandChannel::new(MAP_SESSION_ID, timeout) });
        let weak = Arc::downgrade(&sink) as Weak<dyn PacketSink>;
        let endpoint = transport.register(MAP_SERVICE_PORT, weak)?;
        tracing::debug!(port = format_args!("{MAP_SERVICE_PORT:#x}"), "memory map service opened");
        Ok(Arc::new(Self { sink, endpoint, flight: Mutex::new(()) }))
    }

    pub fn port(&self) -> u32 {
        self.endpoint.port()
    }

    /// Register a ring's memory in one message.
    pub fn map(&self, req: &MapRequest) -> Result<()> {
        let (opcode, payload) = match req {
            MapRequest::Regions(regions) => {
                (SESSION_CMD_MEMORY_MAP_REGIONS, params::memory_map_regions(regions))
            }
            MapRequest::Block { base, size } => (SESSION_CMD_MEMORY_MAP, params::memory_map(*base, *size)),
        };
        self.exchange(opcode, payload)
    }

    /// Deregister a ring's memory, mirroring the layout it was mapped with.
    pub fn unmap(&self, req: &MapRequest) -> Result<()> {
        let (opcode, payload) = match req {
            MapRequest::Regions(regions) => {
                let addrs: Vec<_> = regions.iter().map(|&(a, _)| a).collect();
                (SESSION_CMD_MEMORY_UNMAP_REGIONS, params::memory_unmap_regions(&addrs))
            }
            MapRequest::Block { base, .. } => (SESSION_CMD_MEMORY_UNMAP, params::memory_unmap(*base)),
        };
        self.exchange(opcode, payload)
    }

    fn exchange(&self, opcode: u32, payload: Vec<u32>) -> Result<()> {
        let _flight = self.flight.lock();
        self.sink.channel.send_and_wait(self.endpoint.as_ref(), opcode, payload)
    }
}

impl Drop for MemoryMapService {
    fn drop(&mut self) {
        self.sink.channel.shutdown();
        tracing::debug!("memory map service closed");
    }
}

/// The client's weak link to the current service.
pub(crate) type MapSlot = Arc<Mutex<Weak<MemoryMapService>>>;

pub(crate) struct MapLease {
    slot: MapSlot,
    svc: ManuallyDrop<Arc<MemoryMapService>>,
}

impl MapLease {
    /// Take a reference to the live service, opening it if none exists.
    pub(crate) fn acquire(slot: &MapSlot, transport: &dyn Transport, timeout: std::time::Duration) -> Result<Self> {
        let mut current = slot.lock();
        let svc = match current.upgrade() {
            Some(svc) => svc,
            None => {
                let svc = MemoryMapService::open(transport, timeout)?;
                *current = Arc::downgrade(&svc);
                svc
            }
        };
        Ok(Self { slot: Arc::clone(slot), svc: ManuallyDrop::new(svc) })
    }

    /// Take a reference only if some session already holds the service.
    pub(crate) fn existing(slot: &MapSlot) -> Option<Self> {
        let svc = slot.lock().upgrade()?;
        Some(Self { slot: Arc::clone(slot), svc: ManuallyDrop::new(svc) })
    }
}

impl Deref for MapLease {
    type Target = MemoryMapService;

    fn deref(&self) -> &MemoryMapService {
        &self.svc
    }
}

impl Drop for MapLease {
    fn drop(&mut self) {
        let _slot = self.slot.lock();
        // Safety: `svc` is not touched after this.
        unsafe { ManuallyDrop::drop(&mut self.svc) };
    }
}

impl std::fmt::Debug for MemoryMapService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMapService").field("channel", &self.sink.channel).finish()
    }
}
