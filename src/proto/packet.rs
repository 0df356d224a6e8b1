// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Packet shape exchanged with the remote stream manager: a fixed header
// (token + opcode) and a payload of 32-bit words.

use std::fmt;

use super::opcode;

/// Port id of the shared memory-map endpoint.
pub const MAP_SERVICE_PORT: u32 = 0xFFFF_FFFF;

/// Port id of a session endpoint.
pub const fn session_port(session_id: u8) -> u32 {
    ((session_id as u32) << 8) | 0x0001
}

/// Wire identifier of a DMA buffer.
///
/// Opaque at the protocol boundary; the ring resolves it to a slot index
/// explicitly rather than treating equality as the only correlation path.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BusAddr(pub u32);

impl BusAddr {
    pub fn offset(self, bytes: u32) -> Self {
        BusAddr(self.0.wrapping_add(bytes))
    }
}

impl fmt::Debug for BusAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BusAddr({:#010x})", self.0)
    }
}

impl fmt::Display for BusAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Token layout
// ---------------------------------------------------------------------------

/// Bits of a command token that carry the session id.
pub const TOKEN_SESSION_MASK: u32 = 0xFF;
/// Shift of the request sequence inside a command token.
pub const TOKEN_SEQ_SHIFT: u32 = 8;
/// Largest request sequence that fits in a token.
pub const TOKEN_SEQ_MAX: u32 = 0x00FF_FFFF;

/// Pack a command token: request sequence in the upper 24 bits, session id
/// in the low 8.
pub const fn command_token(session_id: u8, seq: u32) -> u32 {
    ((seq & TOKEN_SEQ_MAX) << TOKEN_SEQ_SHIFT) | session_id as u32
}

pub const fn token_session(token: u32) -> u8 {
    (token & TOKEN_SESSION_MASK) as u8
}

pub const fn token_seq(token: u32) -> u32 {
    token >> TOKEN_SEQ_SHIFT
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// One message in either direction.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    /// Correlation value (see the token layout above for commands).
    pub token: u32,
    /// Selects the handling branch on the receiving side.
    pub opcode: u32,
    /// Opcode-specific body.
    pub payload: Vec<u32>,
}

impl Packet {
    pub fn new(opcode: u32, token: u32, payload: Vec<u32>) -> Self {
        Self { token, opcode, payload }
    }

    /// Word `i` of the payload, or 0 when the payload is shorter.
    pub fn word(&self, i: usize) -> u32 {
        self.payload.get(i).copied().unwrap_or(0)
    }

    /// Size in bytes including the 2-word header.
    pub fn wire_size(&self) -> usize {
        (2 + self.payload.len()) * 4
    }

    /// Generic acknowledgement of `acked` with `status`.
    pub fn basic_result(token: u32, acked: u32, status: u32) -> Self {
        Self::new(opcode::BASIC_RSP_RESULT, token, vec![acked, status])
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("opcode", &format_args!("{:#010x}", self.opcode))
            .field("token", &format_args!("{:#x}", self.token))
            .field("words", &self.payload.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Inbound payload views
// ---------------------------------------------------------------------------

/// Body of a [`opcode::BASIC_RSP_RESULT`] packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicResult {
    pub opcode: u32,
    pub status: u32,
}

impl BasicResult {
    pub fn parse(pkt: &Packet) -> Option<Self> {
        if pkt.opcode != opcode::BASIC_RSP_RESULT || pkt.payload.len() < 2 {
            return None;
        }
        Some(Self { opcode: pkt.payload[0], status: pkt.payload[1] })
    }
}

/// Body of a write-done event. The token carries the ring index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteDone {
    pub buf_addr: BusAddr,
    pub status: u32,
}

impl WriteDone {
    pub fn parse(pkt: &Packet) -> Option<Self> {
        if pkt.opcode != opcode::DATA_EVENT_WRITE_DONE || pkt.payload.is_empty() {
            return None;
        }
        Some(Self { buf_addr: BusAddr(pkt.payload[0]), status: pkt.word(1) })
    }

    pub fn to_packet(&self, token: u32) -> Packet {
        Packet::new(opcode::DATA_EVENT_WRITE_DONE, token, vec![self.buf_addr.0, self.status])
    }
}

const RD_STATUS: usize = 0;
const RD_BUFFER: usize = 1;
const RD_SIZE: usize = 2;
const RD_OFFSET: usize = 3;
const RD_MSW_TS: usize = 4;
const RD_LSW_TS: usize = 5;
const RD_FLAGS: usize = 6;
const RD_NUMFRAMES: usize = 7;
const RD_ID: usize = 8;
const RD_WORDS: usize = 9;

/// Body of a read-done event. The token carries the ring index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadDone {
    pub status: u32,
    pub buf_addr: BusAddr,
    pub size: u32,
    pub offset: u32,
    pub msw_ts: u32,
    pub lsw_ts: u32,
    pub flags: u32,
    pub num_frames: u32,
    pub id: u32,
}

impl ReadDone {
    pub fn parse(pkt: &Packet) -> Option<Self> {
        if pkt.opcode != opcode::DATA_EVENT_READ_DONE || pkt.payload.len() < RD_WORDS {
            return None;
        }
        let w = &pkt.payload;
        Some(Self {
            status: w[RD_STATUS],
            buf_addr: BusAddr(w[RD_BUFFER]),
            size: w[RD_SIZE],
            offset: w[RD_OFFSET],
            msw_ts: w[RD_MSW_TS],
            lsw_ts: w[RD_LSW_TS],
            flags: w[RD_FLAGS],
            num_frames: w[RD_NUMFRAMES],
            id: w[RD_ID],
        })
    }

    pub fn to_packet(&self, token: u32) -> Packet {
        let mut w = vec![0u32; RD_WORDS];
        w[RD_STATUS] = self.status;
        w[RD_BUFFER] = self.buf_addr.0;
        w[RD_SIZE] = self.size;
        w[RD_OFFSET] = self.offset;
        w[RD_MSW_TS] = self.msw_ts;
        w[RD_LSW_TS] = self.lsw_ts;
        w[RD_FLAGS] = self.flags;
        w[RD_NUMFRAMES] = self.num_frames;
        w[RD_ID] = self.id;
        Packet::new(opcode::DATA_EVENT_READ_DONE, token, w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_token_packs_session_and_seq() {
        let t = command_token(3, 0x1234);
        assert_eq!(token_session(t), 3);
        assert_eq!(token_seq(t), 0x1234);
        assert_eq!(command_token(8, 0), 8);
    }

    #[test]
    fn command_token_wraps_seq() {
        let t = command_token(1, TOKEN_SEQ_MAX + 2);
        assert_eq!(token_seq(t), 1);
        assert_eq!(token_session(t), 1);
    }

    #[test]
    fn short_read_done_is_rejected() {
        let pkt = Packet::new(opcode::DATA_EVENT_READ_DONE, 0, vec![0, 0x1000]);
        assert!(ReadDone::parse(&pkt).is_none());
    }

    #[test]
    fn read_done_fields_land_in_place() {
        let rd = ReadDone { buf_addr: BusAddr(0x4000), size: 320, id: 7, ..Default::default() };
        let pkt = rd.to_packet(2);
        assert_eq!(pkt.word(1), 0x4000);
        assert_eq!(pkt.word(2), 320);
        assert_eq!(ReadDone::parse(&pkt), Some(rd));
    }

    #[test]
    fn session_ports() {
        assert_eq!(session_port(1), 0x0101);
        assert_eq!(session_port(8), 0x0801);
    }
}
