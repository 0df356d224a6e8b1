// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Session/command/buffer protocol for driving a remote audio signal
// processor over an opcoded message transport: stream sessions, command
// acknowledgement with bounded waits, shared DMA buffer rings and the
// memory map service that registers them.

mod error;
pub use error::{Error, Result};

mod config;
pub use config::{ClientConfig, IoMode, DEFAULT_COMMAND_TIMEOUT, DEFAULT_MAX_SESSIONS, MAX_SESSIONS_LIMIT};

mod spin_lock;
pub use spin_lock::{SpinGuard, SpinLock};

mod waiter;
pub use waiter::Waiter;

pub mod dma;
pub use dma::{DmaAllocator, DmaRegion, HeapAllocator};

pub mod transport;
pub use transport::{Endpoint, MemTransport, PacketSink, Transport};

pub mod proto;

mod registry;
pub use registry::{SessionHandle, SessionRegistry};

mod ring;
pub use ring::{BufferGrant, BufferRing, Direction, Layout, MapRequest};

mod command;
pub use command::{AckOutcome, CommandChannel};

mod mmap;
pub use mmap::{MemoryMapService, MAP_SESSION_ID};

mod dispatch;

mod session;
pub use session::{AioParams, Event, EventCallback, Session};

mod client;
pub use client::AsmClient;
