// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Buffer ring shared between the local client and the remote processor.
//
// Two halves:
// - hot:  slot table (bus address, sizes, ownership bit) plus the local and
//         remote cursors, behind a spin lock. This is all the delivery path
//         ever touches.
// - cold: the DMA regions backing the slots, behind a sleeping mutex. Only
//         sizing and teardown take it; they swap the hot table in and out.
//
// Capacity is a power of two so cursors advance as `(c + 1) & (cap - 1)`.
//
// Every slot carries a lease token. A live `BufferGrant` holds a clone of
// it, and nothing hands a slot back to the local side while that clone
// exists, so at most one grant ever refers to a given buffer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::dma::{DmaAllocator, DmaRegion};
use crate::error::{Error, Result};
use crate::proto::BusAddr;
use crate::spin_lock::SpinLock;

/// Ring direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Data flowing to the remote processor (playback, `write`).
    In = 0,
    /// Data flowing from the remote processor (capture, `read`).
    Out = 1,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::In, Direction::Out];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Raw `used` bit meaning "owned by the local side". The polarity is
    /// inverted between the two directions.
    fn local_bit(self) -> bool {
        match self {
            Direction::In => true,
            Direction::Out => false,
        }
    }
}

/// How the ring's memory is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// One independent region per buffer, mapped as a region list.
    PerBuffer,
    /// One region sliced into equal buffers, mapped as a single block.
    Contiguous,
}

/// What the memory map service must register (or deregister) for a ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapRequest {
    Regions(Vec<(BusAddr, u32)>),
    Block { base: BusAddr, size: u32 },
}

struct Slot {
    addr: BusAddr,
    size: u32,
    actual_size: u32,
    used: bool,
    region: Arc<DmaRegion>,
    offset: usize,
    lease: Arc<()>,
}

impl Slot {
    fn is_granted(&self) -> bool {
        Arc::strong_count(&self.lease) > 1
    }
}

struct HotRing {
    direction: Direction,
    slots: Vec<Slot>,
    local: usize,
    remote: usize,
    pledged: usize,
}

impl HotRing {
    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    fn is_local(&self, idx: usize) -> bool {
        self.slots[idx].used == self.direction.local_bit()
    }

    fn set_local(&mut self, idx: usize, local: bool) {
        let bit = self.direction.local_bit();
        self.slots[idx].used = if local { bit } else { !bit };
    }

    /// Hand back a pledged slot that never reached the remote side. The
    /// most recent acquisition rewinds the local cursor; any other counts
    /// as relinquished and advances the remote cursor.
    fn give_back(&mut self, idx: usize) {
        self.set_local(idx, true);
        self.pledged -= 1;
        if idx == (self.local + self.mask()) & self.mask() {
            self.local = idx;
        } else {
            self.remote = (self.remote + 1) & self.mask();
        }
    }
}

struct RingMemory {
    layout: Layout,
    regions: Vec<Arc<DmaRegion>>,
    buf_size: u32,
}

impl RingMemory {
    fn map_request(&self) -> MapRequest {
        match self.layout {
            Layout::PerBuffer => MapRequest::Regions(
                self.regions.iter().map(|r| (r.bus_addr(), self.buf_size)).collect(),
            ),
            Layout::Contiguous => {
                let r = &self.regions[0];
                MapRequest::Block { base: r.bus_addr(), size: r.len() as u32 }
            }
        }
    }
}

/// A buffer handed to the local side by [`BufferRing::acquire_local`].
///
/// The slot is pledged from the moment the grant exists and the grant is
/// the only way to reach its memory. While it lives, neither a completion
/// nor a flush can hand the slot back to the local side.
///
/// Submitting the grant (`write`/`read` on the session) consumes it. To
/// return an unused grant call [`BufferRing::unacquire`]; simply dropping
/// it leaves the slot pledged until the remote side returns it or a flush.
pub struct BufferGrant {
    direction: Direction,
    index: usize,
    addr: BusAddr,
    size: u32,
    actual_size: u32,
    region: Arc<DmaRegion>,
    offset: usize,
    lease: Arc<()>,
}

impl BufferGrant {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn bus_addr(&self) -> BusAddr {
        self.addr
    }

    /// Allocated size of the buffer.
    pub fn capacity(&self) -> u32 {
        self.size
    }

    /// Valid data length (bytes the remote side filled, for reads).
    pub fn actual_size(&self) -> u32 {
        self.actual_size
    }

    /// The valid portion of the buffer.
    pub fn data(&self) -> &[u8] {
        let len = self.actual_size.min(self.size) as usize;
        // Safety: slot memory is exclusively ours while the grant lives.
        unsafe { std::slice::from_raw_parts(self.region.as_ptr().add(self.offset), len) }
    }

    /// The whole buffer, for filling.
    pub fn data_mut(&mut self) -> &mut [u8] {
        // Safety: as above.
        unsafe {
            std::slice::from_raw_parts_mut(self.region.as_ptr().add(self.offset), self.size as usize)
        }
    }
}

impl std::fmt::Debug for BufferGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferGrant")
            .field("direction", &self.direction)
            .field("index", &self.index)
            .field("addr", &self.addr)
            .field("size", &self.size)
            .field("actual_size", &self.actual_size)
            .finish()
    }
}

/// A grant given up for submission: enough to undo the pledge if the
/// message never leaves.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Detached {
    pub(crate) index: usize,
    pub(crate) addr: BusAddr,
    epoch: u64,
}

/// One direction's ring of DMA buffers.
pub struct BufferRing {
    direction: Direction,
    cold: Mutex<Option<RingMemory>>,
    hot: SpinLock<Option<HotRing>>,
    // Bumped under the hot lock by reset and release.
    epoch: AtomicU64,
}

impl BufferRing {
    pub fn new(direction: Direction) -> Self {
        Self { direction, cold: Mutex::new(None), hot: SpinLock::new(None), epoch: AtomicU64::new(0) }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_allocated(&self) -> bool {
        self.hot.lock().is_some()
    }

    /// Number of slots, 0 when unsized.
    pub fn capacity(&self) -> usize {
        self.hot.lock().as_ref().map_or(0, |h| h.slots.len())
    }

    /// `(local, remote)` cursors.
    pub fn cursors(&self) -> Option<(usize, usize)> {
        self.hot.lock().as_ref().map(|h| (h.local, h.remote))
    }

    /// Size the ring with `count` buffers of `buf_size` bytes and register
    /// the memory through `map`. Returns `Ok(false)` without touching
    /// anything when the ring is already sized.
    ///
    /// If `map` fails the memory is discarded and the ring stays unsized.
    pub fn allocate<F>(
        &self,
        alloc: &dyn DmaAllocator,
        buf_size: usize,
        count: usize,
        layout: Layout,
        map: F,
    ) -> Result<bool>
    where
        F: FnOnce(&MapRequest) -> Result<()>,
    {
        if count == 0 || !count.is_power_of_two() {
            return Err(Error::invalid(format!("ring capacity {count} is not a power of two")));
        }
        if buf_size == 0 || buf_size.checked_mul(count).map_or(true, |t| t > u32::MAX as usize) {
            return Err(Error::invalid(format!("buffer size {buf_size} x {count} out of range")));
        }

        let mut cold = self.cold.lock();
        if cold.is_some() {
            tracing::debug!(direction = ?self.direction, "ring already allocated");
            return Ok(false);
        }

        let regions: Vec<Arc<DmaRegion>> = match layout {
            Layout::PerBuffer => (0..count)
                .map(|_| alloc.alloc(buf_size).map(Arc::new))
                .collect::<Result<_>>()?,
            Layout::Contiguous => vec![Arc::new(alloc.alloc(buf_size * count)?)],
        };

        let slots = (0..count)
            .map(|i| {
                let (region, offset) = match layout {
                    Layout::PerBuffer => (Arc::clone(&regions[i]), 0),
                    Layout::Contiguous => (Arc::clone(&regions[0]), i * buf_size),
                };
                Slot {
                    addr: region.bus_addr().offset(offset as u32),
                    size: buf_size as u32,
                    actual_size: buf_size as u32,
                    used: self.direction.local_bit(),
                    region,
                    offset,
                    lease: Arc::new(()),
                }
            })
            .collect::<Vec<_>>();

        for (i, s) in slots.iter().enumerate() {
            tracing::debug!(direction = ?self.direction, index = i, addr = %s.addr, size = s.size, "ring slot");
        }

        let memory = RingMemory { layout, regions, buf_size: buf_size as u32 };
        map(&memory.map_request())?;

        *self.hot.lock() = Some(HotRing { direction: self.direction, slots, local: 0, remote: 0, pledged: 0 });
        *cold = Some(memory);
        Ok(true)
    }

    /// Unregister the memory through `unmap`, then discard every buffer.
    /// Unmap failures are logged and teardown continues. Returns `false`
    /// when there was nothing to release.
    ///
    /// Outstanding grants keep their own slot memory alive.
    pub fn release_all<F>(&self, unmap: F) -> bool
    where
        F: FnOnce(&MapRequest) -> Result<()>,
    {
        let mut cold = self.cold.lock();
        let Some(memory) = cold.take() else {
            return false;
        };
        if let Err(e) = unmap(&memory.map_request()) {
            tracing::error!(direction = ?self.direction, error = %e, "unmap failed, releasing ring anyway");
        }
        {
            let mut hot = self.hot.lock();
            *hot = None;
            self.epoch.fetch_add(1, Ordering::Relaxed);
        }
        drop(memory);
        true
    }

    /// Take the buffer at the local cursor if the local side owns it,
    /// pledging it to the remote side and advancing the local cursor.
    /// `None` means no buffer is available right now.
    pub fn acquire_local(&self) -> Option<BufferGrant> {
        let mut hot = self.hot.lock();
        let ring = hot.as_mut()?;
        let idx = ring.local;
        if !ring.is_local(idx) {
            return None;
        }
        ring.set_local(idx, false);
        ring.local = (ring.local + 1) & ring.mask();
        ring.pledged += 1;
        let s = &ring.slots[idx];
        Some(BufferGrant {
            direction: self.direction,
            index: idx,
            addr: s.addr,
            size: s.size,
            actual_size: s.actual_size,
            region: Arc::clone(&s.region),
            offset: s.offset,
            lease: Arc::clone(&s.lease),
        })
    }

    /// Give back a grant that was never submitted. Returns `false` when the
    /// grant does not belong to this ring's current buffers.
    pub fn unacquire(&self, grant: BufferGrant) -> bool {
        let mut hot = self.hot.lock();
        let Some(ring) = hot.as_mut() else {
            return false;
        };
        let idx = grant.index;
        let ours = grant.direction == self.direction
            && idx < ring.slots.len()
            && Arc::ptr_eq(&ring.slots[idx].lease, &grant.lease);
        if !ours {
            return false;
        }
        drop(grant);
        ring.give_back(idx);
        true
    }

    /// Give up local access to a grant that is about to be sent.
    pub(crate) fn detach(&self, grant: BufferGrant) -> Detached {
        let hot = self.hot.lock();
        let d = Detached { index: grant.index, addr: grant.addr, epoch: self.epoch.load(Ordering::Relaxed) };
        drop(grant);
        drop(hot);
        d
    }

    /// Undo a detach whose message was never sent. Refused once the ring
    /// has been reset or released since, or the slot has moved on.
    pub(crate) fn reclaim(&self, d: &Detached) -> bool {
        let mut hot = self.hot.lock();
        if self.epoch.load(Ordering::Relaxed) != d.epoch {
            return false;
        }
        let Some(ring) = hot.as_mut() else {
            return false;
        };
        let reclaimable = d.index < ring.slots.len()
            && ring.slots[d.index].addr == d.addr
            && !ring.is_local(d.index)
            && !ring.slots[d.index].is_granted();
        if reclaimable {
            ring.give_back(d.index);
        }
        reclaimable
    }

    /// The remote side relinquished the buffer at `index`.
    ///
    /// On any mismatch the ring is left untouched.
    pub fn remote_return(&self, index: usize, addr: BusAddr, actual_size: u32) -> Result<()> {
        let mut hot = self.hot.lock();
        let ring = hot
            .as_mut()
            .ok_or_else(|| Error::invalid(format!("{:?} ring is not allocated", self.direction)))?;
        if index >= ring.slots.len() {
            return Err(Error::ProtocolMismatch {
                expected: ring.mask() as u64,
                received: index as u64,
            });
        }
        let expected = ring.slots[index].addr;
        if expected != addr {
            return Err(Error::ProtocolMismatch { expected: expected.0 as u64, received: addr.0 as u64 });
        }
        // already returned, or still held locally and never sent
        if ring.is_local(index) || ring.slots[index].is_granted() {
            return Err(Error::ProtocolMismatch { expected: ring.remote as u64, received: index as u64 });
        }
        let slot = &mut ring.slots[index];
        slot.actual_size = actual_size.min(slot.size);
        ring.set_local(index, true);
        ring.pledged -= 1;
        ring.remote = (ring.remote + 1) & ring.mask();
        Ok(())
    }

    /// Whether some buffer is currently pledged to the remote side.
    pub fn has_remote_work(&self) -> bool {
        self.hot.lock().as_ref().is_some_and(|r| r.pledged > 0)
    }

    /// Resolve a bus address to its slot index.
    pub fn index_of(&self, addr: BusAddr) -> Option<usize> {
        let hot = self.hot.lock();
        hot.as_ref()?.slots.iter().position(|s| s.addr == addr)
    }

    /// Whether the slot at `index` is owned locally.
    pub fn is_local(&self, index: usize) -> Option<bool> {
        let hot = self.hot.lock();
        let r = hot.as_ref()?;
        (index < r.slots.len()).then(|| r.is_local(index))
    }

    /// Indices of slots still pledged to the remote side.
    pub fn outstanding(&self) -> Vec<usize> {
        let hot = self.hot.lock();
        match hot.as_ref() {
            Some(r) => (0..r.slots.len()).filter(|&i| !r.is_local(i)).collect(),
            None => Vec::new(),
        }
    }

    /// Return every slot to the local side and rewind both cursors. Slots
    /// with a live grant stay pledged to their holder.
    pub fn reset(&self) {
        let _cold = self.cold.lock();
        let mut hot = self.hot.lock();
        self.epoch.fetch_add(1, Ordering::Relaxed);
        if let Some(r) = hot.as_mut() {
            let mut held = 0;
            for i in 0..r.slots.len() {
                if r.slots[i].is_granted() {
                    held += 1;
                    continue;
                }
                r.set_local(i, true);
                r.slots[i].actual_size = r.slots[i].size;
            }
            r.local = 0;
            r.remote = 0;
            r.pledged = held;
        }
    }
}
