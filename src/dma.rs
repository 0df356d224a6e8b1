// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Physical memory collaborator. Ring buffers need memory that the remote
// processor can address by a stable bus address; where that memory comes
// from is platform business behind `DmaAllocator`.
//
// HeapAllocator: global allocator, synthetic bus addresses.
// MmapAllocator: page-aligned anonymous mappings, locked when permitted
//                 (unix only), synthetic bus addresses.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::{Error, Result};
use crate::proto::BusAddr;

/// Alignment of every synthetic bus address.
pub const BUS_ALIGN: u32 = 0x1000;

/// First synthetic bus address handed out.
const BUS_BASE: u64 = 0x1000_0000;

/// Monotonic bus address space shared by the synthetic allocators.
#[derive(Debug)]
struct BusSpace {
    next: AtomicU64,
}

impl BusSpace {
    const fn new() -> Self {
        Self { next: AtomicU64::new(BUS_BASE) }
    }

    fn reserve(&self, len: usize) -> Result<BusAddr> {
        let span = (len as u64 + BUS_ALIGN as u64 - 1) & !(BUS_ALIGN as u64 - 1);
        let addr = self.next.fetch_add(span, Ordering::Relaxed);
        if addr + span > u32::MAX as u64 {
            return Err(Error::exhausted("bus address space exhausted"));
        }
        Ok(BusAddr(addr as u32))
    }
}

enum Backing {
    Heap { len: usize },
    #[cfg(unix)]
    Mmap { map_len: usize },
}

/// One DMA-able region: host memory plus the bus address the remote side
/// uses for it. Freed on drop.
pub struct DmaRegion {
    addr: BusAddr,
    len: usize,
    ptr: NonNull<u8>,
    backing: Backing,
}

// Safety: the region is plain memory; concurrent access to disjoint slots is
// arbitrated by ring ownership flags.
unsafe impl Send for DmaRegion {}
unsafe impl Sync for DmaRegion {}

impl DmaRegion {
    pub fn bus_addr(&self) -> BusAddr {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl std::fmt::Debug for DmaRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaRegion").field("addr", &self.addr).field("len", &self.len).finish()
    }
}

impl Drop for DmaRegion {
    fn drop(&mut self) {
        match self.backing {
            Backing::Heap { len } => unsafe {
                let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), len);
                drop(Box::from_raw(slice));
            },
            #[cfg(unix)]
            Backing::Mmap { map_len } => unsafe {
                libc::munlock(self.ptr.as_ptr() as *const libc::c_void, map_len);
                libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, map_len);
            },
        }
    }
}

/// Source of DMA-able memory.
pub trait DmaAllocator: Send + Sync {
    /// Allocate `len` zeroed bytes.
    fn alloc(&self, len: usize) -> Result<DmaRegion>;
}

// ---------------------------------------------------------------------------
// HeapAllocator
// ---------------------------------------------------------------------------

/// Allocator backed by the global heap, with an optional byte budget.
#[derive(Debug)]
pub struct HeapAllocator {
    space: BusSpace,
    limit: Option<usize>,
    in_use: AtomicUsize,
}

impl HeapAllocator {
    pub fn new() -> Self {
        Self { space: BusSpace::new(), limit: None, in_use: AtomicUsize::new(0) }
    }

    /// Fail allocations once `bytes` have been handed out in total.
    pub fn with_limit(bytes: usize) -> Self {
        Self { limit: Some(bytes), ..Self::new() }
    }
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaAllocator for HeapAllocator {
    fn alloc(&self, len: usize) -> Result<DmaRegion> {
        if len == 0 {
            return Err(Error::invalid("zero-length DMA allocation"));
        }
        let limit = self.limit.unwrap_or(usize::MAX);
        if let Err(used) = self.in_use.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
            used.checked_add(len).filter(|&next| next <= limit)
        }) {
            return Err(Error::exhausted(format!("heap DMA budget exceeded ({used} bytes used, {len} requested)")));
        }
        let addr = match self.space.reserve(len) {
            Ok(addr) => addr,
            Err(e) => {
                self.in_use.fetch_sub(len, Ordering::Relaxed);
                return Err(e);
            }
        };
        let raw = Box::into_raw(vec![0u8; len].into_boxed_slice()) as *mut u8;
        let ptr = NonNull::new(raw).ok_or_else(|| Error::exhausted("heap allocation failed"))?;
        Ok(DmaRegion { addr, len, ptr, backing: Backing::Heap { len } })
    }
}

// ---------------------------------------------------------------------------
// MmapAllocator
// ---------------------------------------------------------------------------

/// Page-aligned anonymous mappings, locked into RAM when the process is
/// allowed to (`mlock` failure is not an error).
#[cfg(unix)]
#[derive(Debug)]
pub struct MmapAllocator {
    space: BusSpace,
}

#[cfg(unix)]
impl MmapAllocator {
    pub fn new() -> Self {
        Self { space: BusSpace::new() }
    }
}

#[cfg(unix)]
impl Default for MmapAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
impl DmaAllocator for MmapAllocator {
    fn alloc(&self, len: usize) -> Result<DmaRegion> {
        if len == 0 {
            return Err(Error::invalid("zero-length DMA allocation"));
        }
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let page = if page > 0 { page as usize } else { BUS_ALIGN as usize };
        let map_len = (len + page - 1) & !(page - 1);

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(Error::exhausted(format!(
                "mmap of {map_len} bytes failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        if unsafe { libc::mlock(base, map_len) } != 0 {
            tracing::debug!(map_len, "mlock refused, DMA region stays pageable");
        }
        let ptr = NonNull::new(base as *mut u8).ok_or_else(|| Error::exhausted("mmap returned null"))?;
        let addr = match self.space.reserve(len) {
            Ok(a) => a,
            Err(e) => {
                unsafe { libc::munmap(base, map_len) };
                return Err(e);
            }
        };
        Ok(DmaRegion { addr, len, ptr, backing: Backing::Mmap { map_len } })
    }
}

/// The allocator a client uses when none is supplied.
pub fn default_allocator() -> std::sync::Arc<dyn DmaAllocator> {
    #[cfg(unix)]
    {
        std::sync::Arc::new(MmapAllocator::new())
    }
    #[cfg(not(unix))]
    {
        std::sync::Arc::new(HeapAllocator::new())
    }
}
