// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// One open logical stream to the remote processor.
//
// A `Session` owns its registry slot, its endpoint on the transport, two
// buffer rings and a command channel, plus a lease on the shared memory map
// service. Dropping it unmaps ring memory first, then deregisters the
// endpoint, releases the map lease and finally frees the registry slot.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::command::CommandChannel;
use crate::config::IoMode;
use crate::dma::DmaAllocator;
use crate::error::{Error, Result};
use crate::mmap::MapLease;
use crate::proto::opcode::*;
use crate::proto::{
    params, BasicResult, BusAddr, EncoderConfig, EqualizerConfig, Format, MediaFormat, Packet,
    PpParam, ReadDone, WriteDone,
};
use crate::registry::{SessionHandle, SessionRegistry};
use crate::ring::{BufferGrant, BufferRing, Direction, Layout};
use crate::transport::Endpoint;

/// Notification delivered to a session's callback from the delivery path.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    /// Acknowledgement of a command (tracked or not).
    CommandResult(BasicResult),
    /// A write buffer came back. `index` is the ring slot in sync mode.
    WriteDone { index: Option<usize>, token: u32, done: WriteDone },
    /// A read buffer came back filled.
    ReadDone { index: Option<usize>, token: u32, done: ReadDone },
    /// End of stream reached on the remote side (event or command response).
    Eos(&'a Packet),
    /// Response to a parameter query.
    ParamResponse(&'a Packet),
    /// The remote side overflowed its transmit path.
    TxOverflow(&'a Packet),
}

/// Callback invoked for every accepted inbound message. Captures whatever
/// context the caller needs.
pub type EventCallback = Arc<dyn Fn(u8, &Event<'_>) + Send + Sync>;

/// Explicit buffer description for asynchronous io mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AioParams {
    pub paddr: BusAddr,
    pub len: u32,
    pub uid: u32,
    pub timestamp: u64,
    pub flags: u32,
}

/// State shared between the session and the delivery path.
pub(crate) struct SessionCore {
    pub(crate) id: u8,
    pub(crate) rings: [BufferRing; 2],
    pub(crate) channel: CommandChannel,
    pub(crate) callback: Option<EventCallback>,
    io_mode: AtomicU8,
}

impl SessionCore {
    pub(crate) fn new(id: u8, channel: CommandChannel, io_mode: IoMode, callback: Option<EventCallback>) -> Self {
        Self {
            id,
            rings: [BufferRing::new(Direction::In), BufferRing::new(Direction::Out)],
            channel,
            callback,
            io_mode: AtomicU8::new(io_mode as u8),
        }
    }

    pub(crate) fn ring(&self, dir: Direction) -> &BufferRing {
        &self.rings[dir.index()]
    }

    pub(crate) fn io_mode(&self) -> IoMode {
        match self.io_mode.load(Ordering::Acquire) {
            x if x == IoMode::Async as u8 => IoMode::Async,
            _ => IoMode::Sync,
        }
    }

    pub(crate) fn notify(&self, event: &Event<'_>) {
        if let Some(cb) = &self.callback {
            cb(self.id, event);
        }
    }
}

pub(crate) type Registry = SessionRegistry<std::sync::Weak<SessionCore>>;

/// Registry slot held by a session; freed last, after the endpoint is gone,
/// so a recycled id never meets a still-registered port.
struct SlotGuard {
    registry: Arc<Registry>,
    handle: SessionHandle,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Err(e) = self.registry.release(self.handle) {
            tracing::error!(session = self.handle.id(), error = %e, "registry release failed");
        }
    }
}

// Field order is teardown order.
pub struct Session {
    core: Arc<SessionCore>,
    endpoint: Box<dyn Endpoint>,
    mmap: MapLease,
    slot: SlotGuard,
    alloc: Arc<dyn DmaAllocator>,
}

fn split_ts(ts: u64) -> (u32, u32) {
    ((ts >> 32) as u32, ts as u32)
}

impl Session {
    pub(crate) fn new(
        handle: SessionHandle,
        core: Arc<SessionCore>,
        endpoint: Box<dyn Endpoint>,
        mmap: MapLease,
        registry: Arc<Registry>,
        alloc: Arc<dyn DmaAllocator>,
    ) -> Self {
        Self { core, endpoint, mmap, slot: SlotGuard { registry, handle }, alloc }
    }

    pub fn id(&self) -> u8 {
        self.core.id
    }

    pub fn handle(&self) -> SessionHandle {
        self.slot.handle
    }

    pub fn port(&self) -> u32 {
        self.endpoint.port()
    }

    pub fn io_mode(&self) -> IoMode {
        self.core.io_mode()
    }

    pub fn set_io_mode(&self, mode: IoMode) {
        tracing::debug!(session = self.core.id, ?mode, "io mode");
        self.core.io_mode.store(mode as u8, Ordering::Release);
    }

    pub fn ring(&self, dir: Direction) -> &BufferRing {
        self.core.ring(dir)
    }

    fn cmd(&self, opcode: u32, payload: Vec<u32>) -> Result<()> {
        self.core.channel.send_and_wait(self.endpoint.as_ref(), opcode, payload)
    }

    fn cmd_nowait(&self, opcode: u32, payload: Vec<u32>) -> Result<()> {
        self.core.channel.send_nowait(self.endpoint.as_ref(), opcode, payload)
    }

    fn require_mode(&self, mode: IoMode, what: &str) -> Result<()> {
        if self.io_mode() != mode {
            return Err(Error::invalid(format!("{what} not available in {:?} io mode", self.io_mode())));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stream lifecycle
    // -----------------------------------------------------------------------

    pub fn open_read(&self, format: Format) -> Result<()> {
        self.cmd(STREAM_CMD_OPEN_READ, params::open_read(format)?)
    }

    pub fn open_write(&self, format: Format) -> Result<()> {
        self.cmd(STREAM_CMD_OPEN_WRITE, params::open_write(format)?)
    }

    pub fn open_read_write(&self, read: Format, write: Format) -> Result<()> {
        self.cmd(STREAM_CMD_OPEN_READWRITE, params::open_read_write(read, write)?)
    }

    pub fn set_encoder_config(&self, cfg: &EncoderConfig) -> Result<()> {
        self.cmd(STREAM_CMD_SET_ENCDEC_PARAM, cfg.to_words())
    }

    pub fn set_media_format(&self, fmt: &MediaFormat) -> Result<()> {
        self.cmd(DATA_CMD_MEDIA_FORMAT_UPDATE, fmt.to_words())
    }

    pub fn run(&self, flags: u32, timestamp: u64) -> Result<()> {
        let (msw, lsw) = split_ts(timestamp);
        self.cmd(SESSION_CMD_RUN, params::run(flags, msw, lsw))
    }

    pub fn run_nowait(&self, flags: u32, timestamp: u64) -> Result<()> {
        let (msw, lsw) = split_ts(timestamp);
        self.cmd_nowait(SESSION_CMD_RUN, params::run(flags, msw, lsw))
    }

    pub fn pause(&self) -> Result<()> {
        self.cmd(SESSION_CMD_PAUSE, Vec::new())
    }

    pub fn pause_nowait(&self) -> Result<()> {
        self.cmd_nowait(SESSION_CMD_PAUSE, Vec::new())
    }

    /// Discard queued data on the remote side. On success both rings are
    /// handed back to the local side with their cursors rewound, except
    /// for buffers whose grant the caller still holds.
    pub fn flush(&self) -> Result<()> {
        self.cmd(STREAM_CMD_FLUSH, Vec::new())?;
        for ring in &self.core.rings {
            ring.reset();
        }
        Ok(())
    }

    pub fn eos(&self) -> Result<()> {
        self.cmd(DATA_CMD_EOS, Vec::new())
    }

    pub fn eos_nowait(&self) -> Result<()> {
        self.cmd_nowait(DATA_CMD_EOS, Vec::new())
    }

    /// Close the stream. Buffers the remote side never returned are logged.
    pub fn close(&self) -> Result<()> {
        self.cmd(STREAM_CMD_CLOSE, Vec::new())?;
        for ring in &self.core.rings {
            for idx in ring.outstanding() {
                tracing::info!(session = self.core.id, direction = ?ring.direction(), index = idx, "buffer not returned");
            }
        }
        Ok(())
    }

    pub fn reg_tx_overflow(&self, enable: bool) -> Result<()> {
        self.cmd(SESSION_CMD_REGISTER_FOR_TX_OVERFLOW_EVENTS, params::reg_tx_overflow(enable))
    }

    // -----------------------------------------------------------------------
    // Post-processing
    // -----------------------------------------------------------------------

    pub fn set_pp_param(&self, param: &PpParam) -> Result<()> {
        self.cmd(STREAM_CMD_SET_PP_PARAMS, param.to_words()?)
    }

    pub fn set_mute(&self, mute: bool) -> Result<()> {
        self.set_pp_param(&PpParam::Mute(mute))
    }

    pub fn set_lr_gain(&self, left: u16, right: u16) -> Result<()> {
        self.set_pp_param(&PpParam::LrGain { left, right })
    }

    pub fn set_volume(&self, gain: u16) -> Result<()> {
        self.set_pp_param(&PpParam::MasterGain(gain))
    }

    pub fn set_equalizer(&self, eq: &EqualizerConfig) -> Result<()> {
        self.set_pp_param(&PpParam::Equalizer(eq.clone()))
    }

    // -----------------------------------------------------------------------
    // Buffer rings
    // -----------------------------------------------------------------------

    /// Allocate `count` independent buffers of `buf_size` bytes for `dir`
    /// and map them. A no-op in async io mode or when already allocated.
    pub fn buf_alloc(&self, dir: Direction, buf_size: usize, count: usize) -> Result<()> {
        self.alloc_ring(dir, buf_size, count, Layout::PerBuffer)
    }

    /// Like [`buf_alloc`](Self::buf_alloc) but slices one contiguous region.
    pub fn buf_alloc_contiguous(&self, dir: Direction, buf_size: usize, count: usize) -> Result<()> {
        self.alloc_ring(dir, buf_size, count, Layout::Contiguous)
    }

    fn alloc_ring(&self, dir: Direction, buf_size: usize, count: usize, layout: Layout) -> Result<()> {
        if self.io_mode() == IoMode::Async {
            tracing::debug!(session = self.core.id, ?dir, "async io mode, ring allocation skipped");
            return Ok(());
        }
        let mmap = &self.mmap;
        let fresh = self.core.ring(dir).allocate(self.alloc.as_ref(), buf_size, count, layout, |req| mmap.map(req))?;
        if fresh {
            tracing::debug!(session = self.core.id, ?dir, buf_size, count, ?layout, "ring allocated");
        }
        Ok(())
    }

    /// Unmap and discard the ring for `dir`.
    pub fn buf_free(&self, dir: Direction) {
        let mmap = &self.mmap;
        if self.core.ring(dir).release_all(|req| mmap.unmap(req)) {
            tracing::debug!(session = self.core.id, ?dir, "ring freed");
        }
    }

    /// Take the next locally owned buffer of `dir`.
    pub fn acquire_local(&self, dir: Direction) -> Result<BufferGrant> {
        self.core.ring(dir).acquire_local().ok_or(Error::NotReady)
    }

    pub fn has_remote_work(&self, dir: Direction) -> bool {
        self.core.ring(dir).has_remote_work()
    }

    // -----------------------------------------------------------------------
    // Data path
    // -----------------------------------------------------------------------

    /// Hand a filled input buffer to the remote side. `len` bytes of it are
    /// valid. `flags == 0xFF00` sends it without a timestamp.
    ///
    /// A rejected or unsent grant is handed back to its ring.
    pub fn write(&self, grant: BufferGrant, len: u32, timestamp: u64, flags: u32) -> Result<()> {
        let checked = self.require_mode(IoMode::Sync, "ring write").and_then(|()| {
            if grant.direction() != Direction::In {
                return Err(Error::invalid("write needs a buffer from the input ring"));
            }
            if len > grant.capacity() {
                return Err(Error::invalid(format!("write of {len} bytes exceeds buffer of {}", grant.capacity())));
            }
            Ok(())
        });
        if let Err(e) = checked {
            self.give_back(grant);
            return Err(e);
        }
        let (msw, lsw) = split_ts(timestamp);
        let payload = params::write(grant.bus_addr(), len, grant.index() as u32, msw, lsw, flags);
        self.submit(grant, DATA_CMD_WRITE, payload)
    }

    /// Hand an empty output buffer to the remote side to be filled.
    pub fn read(&self, grant: BufferGrant) -> Result<()> {
        let checked = self.require_mode(IoMode::Sync, "ring read").and_then(|()| {
            if grant.direction() != Direction::Out {
                return Err(Error::invalid("read needs a buffer from the output ring"));
            }
            Ok(())
        });
        if let Err(e) = checked {
            self.give_back(grant);
            return Err(e);
        }
        let payload = params::read(grant.bus_addr(), grant.capacity(), grant.index() as u32);
        self.submit(grant, DATA_CMD_READ, payload)
    }

    /// Return an unused grant to its ring.
    pub fn give_back(&self, grant: BufferGrant) {
        let (dir, index) = (grant.direction(), grant.index());
        if !self.core.ring(dir).unacquire(grant) {
            tracing::warn!(session = self.core.id, ?dir, index, "grant does not belong to this session");
        }
    }

    fn submit(&self, grant: BufferGrant, opcode: u32, payload: Vec<u32>) -> Result<()> {
        let ring = self.core.ring(grant.direction());
        // The grant must be gone before the remote side can answer.
        let sent = ring.detach(grant);
        let res = self.core.channel.send_data(self.endpoint.as_ref(), opcode, sent.index as u32, payload);
        if let Err(e) = &res {
            let reclaimed = ring.reclaim(&sent);
            tracing::warn!(session = self.core.id, index = sent.index, reclaimed, error = %e, "send failed");
        }
        res
    }

    /// Write a caller-managed buffer (async io mode). Token is `uid`.
    pub fn async_write(&self, p: &AioParams) -> Result<()> {
        self.require_mode(IoMode::Async, "async write")?;
        let (msw, lsw) = split_ts(p.timestamp);
        let payload = params::write(p.paddr, p.len, p.uid, msw, lsw, p.flags);
        self.core.channel.send_data(self.endpoint.as_ref(), DATA_CMD_WRITE, p.uid, payload)
    }

    /// Read into a caller-managed buffer (async io mode). Token is the
    /// buffer address.
    pub fn async_read(&self, p: &AioParams) -> Result<()> {
        self.require_mode(IoMode::Async, "async read")?;
        let payload = params::read(p.paddr, p.len, p.uid);
        self.core.channel.send_data(self.endpoint.as_ref(), DATA_CMD_READ, p.paddr.0, payload)
    }

    /// Release everything. Equivalent to dropping the session.
    pub fn free(self) {}
}

impl Drop for Session {
    fn drop(&mut self) {
        for dir in Direction::ALL {
            self.buf_free(dir);
        }
        self.core.channel.shutdown();
        tracing::debug!(session = self.core.id, "session freed");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.core.id)
            .field("io_mode", &self.io_mode())
            .finish()
    }
}
