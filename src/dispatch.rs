// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Inbound message handling for sessions and for the memory map service.
//
// Runs on the transport's delivery path. Nothing here sleeps: command
// completion goes through atomics, ring updates through the ring's spin
// lock. Anything that does not match local state is logged and dropped.

use crate::command::AckOutcome;
use crate::config::IoMode;
use crate::mmap::MapSink;
use crate::proto::opcode::{self, *};
use crate::proto::packet::token_session;
use crate::proto::{BasicResult, Packet, ReadDone, WriteDone};
use crate::ring::Direction;
use crate::session::{Event, SessionCore};
use crate::transport::PacketSink;

impl PacketSink for SessionCore {
    fn deliver(&self, pkt: &Packet) {
        tracing::debug!(
            session = self.id,
            opcode = format_args!("{:#010x}", pkt.opcode),
            token = format_args!("{:#x}", pkt.token),
            "inbound"
        );
        match pkt.opcode {
            BASIC_RSP_RESULT => self.on_result(pkt),
            DATA_EVENT_WRITE_DONE => self.on_write_done(pkt),
            DATA_EVENT_READ_DONE => self.on_read_done(pkt),
            DATA_EVENT_EOS | DATA_CMDRSP_EOS => self.notify(&Event::Eos(pkt)),
            STREAM_CMDRSP_GET_ENCDEC_PARAM | STREAM_CMDRSP_GET_PP_PARAMS => {
                self.notify(&Event::ParamResponse(pkt))
            }
            SESSION_EVENT_TX_OVERFLOW => {
                tracing::error!(session = self.id, "tx overflow");
                self.notify(&Event::TxOverflow(pkt));
            }
            other => {
                tracing::warn!(session = self.id, opcode = format_args!("{other:#010x}"), "unhandled opcode dropped");
            }
        }
    }
}

impl SessionCore {
    fn on_result(&self, pkt: &Packet) {
        let Some(ack) = BasicResult::parse(pkt) else {
            tracing::warn!(session = self.id, words = pkt.payload.len(), "short result dropped");
            return;
        };
        if token_session(pkt.token) != self.id {
            tracing::warn!(
                session = self.id,
                token_session = token_session(pkt.token),
                "result addressed to another session ignored"
            );
            return;
        }
        if !opcode::is_session_tracked(ack.opcode) {
            tracing::debug!(session = self.id, acked = format_args!("{:#010x}", ack.opcode), "result not expected, dropped");
            return;
        }
        match self.channel.complete(pkt.token, ack) {
            AckOutcome::Completed => {}
            AckOutcome::Unsolicited => {
                tracing::debug!(session = self.id, acked = format_args!("{:#010x}", ack.opcode), "ack with no waiter");
            }
            AckOutcome::OpcodeMismatch { expected } => {
                tracing::warn!(
                    session = self.id,
                    expected = format_args!("{expected:#010x}"),
                    acked = format_args!("{:#010x}", ack.opcode),
                    "ack for unexpected opcode ignored"
                );
                return;
            }
        }
        self.notify(&Event::CommandResult(ack));
    }

    fn on_write_done(&self, pkt: &Packet) {
        let Some(done) = WriteDone::parse(pkt) else {
            tracing::warn!(session = self.id, "short write-done dropped");
            return;
        };
        let index = match self.io_mode() {
            IoMode::Async => None,
            IoMode::Sync => match self.return_buffer(Direction::In, pkt.token, done.buf_addr, 0) {
                Some(i) => Some(i),
                None => return,
            },
        };
        self.notify(&Event::WriteDone { index, token: pkt.token, done });
    }

    fn on_read_done(&self, pkt: &Packet) {
        let Some(done) = ReadDone::parse(pkt) else {
            tracing::warn!(session = self.id, words = pkt.payload.len(), "short read-done dropped");
            return;
        };
        let index = match self.io_mode() {
            IoMode::Async => None,
            IoMode::Sync => match self.return_buffer(Direction::Out, pkt.token, done.buf_addr, done.size) {
                Some(i) => Some(i),
                None => return,
            },
        };
        self.notify(&Event::ReadDone { index, token: pkt.token, done });
    }

    fn return_buffer(&self, dir: Direction, token: u32, addr: crate::proto::BusAddr, size: u32) -> Option<usize> {
        let ring = self.ring(dir);
        let index = token as usize;
        match ring.remote_return(index, addr, size) {
            Ok(()) => Some(index),
            Err(e) => {
                tracing::warn!(
                    session = self.id,
                    ?dir,
                    index,
                    addr = %addr,
                    owner = ?ring.index_of(addr),
                    error = %e,
                    "buffer completion dropped"
                );
                None
            }
        }
    }
}

impl PacketSink for MapSink {
    fn deliver(&self, pkt: &Packet) {
        let Some(ack) = BasicResult::parse(pkt) else {
            tracing::debug!(opcode = format_args!("{:#010x}", pkt.opcode), "map service ignored message");
            return;
        };
        if !opcode::is_map_tracked(ack.opcode) {
            tracing::debug!(acked = format_args!("{:#010x}", ack.opcode), "map service ignored result");
            return;
        }
        if token_session(pkt.token) != self.channel.session_id() {
            tracing::warn!(token = format_args!("{:#x}", pkt.token), "map result with foreign token ignored");
            return;
        }
        match self.channel.complete(pkt.token, ack) {
            AckOutcome::Completed => {
                tracing::debug!(acked = format_args!("{:#010x}", ack.opcode), status = ack.status, "map result");
            }
            other => {
                tracing::warn!(acked = format_args!("{:#010x}", ack.opcode), outcome = ?other, "stale map result ignored");
            }
        }
    }
}
