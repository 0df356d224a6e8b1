// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Command/acknowledgement channel: one in-flight tracked command per owner
// (a session, or the memory map service).
//
// State lives in atomics so the delivery path never sleeps:
//   pending : request sequence currently awaited, 0 when idle
//   result  : (sequence << 32) | status of the last accepted ack
//
// Every tracked command gets a fresh 24-bit sequence in the upper bits of
// its token. An acknowledgement only completes the wait whose sequence it
// carries; acks for retired (timed out) or untracked sends are ignored.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::proto::packet::{command_token, token_seq, TOKEN_SEQ_MAX};
use crate::proto::{BasicResult, Packet};
use crate::transport::Endpoint;
use crate::waiter::Waiter;

const IDLE: u32 = 0;

/// Outcome of offering an acknowledgement to the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The ack completed the outstanding wait.
    Completed,
    /// Nothing was waiting for this sequence.
    Unsolicited,
    /// The sequence matched but the acked opcode did not.
    OpcodeMismatch { expected: u32 },
}

pub struct CommandChannel {
    session_id: u8,
    timeout: Duration,
    next_seq: AtomicU32,
    pending: AtomicU32,
    pending_opcode: AtomicU32,
    result: AtomicU64,
    waiter: Waiter,
}

impl CommandChannel {
    pub fn new(session_id: u8, timeout: Duration) -> Self {
        Self {
            session_id,
            timeout,
            next_seq: AtomicU32::new(1),
            pending: AtomicU32::new(IDLE),
            pending_opcode: AtomicU32::new(0),
            result: AtomicU64::new(0),
            waiter: Waiter::new(),
        }
    }

    pub fn session_id(&self) -> u8 {
        self.session_id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether a tracked command is awaiting its acknowledgement.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) != IDLE
    }

    fn alloc_seq(&self) -> u32 {
        loop {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) & TOKEN_SEQ_MAX;
            if seq != IDLE {
                return seq;
            }
        }
    }

    /// Send a tracked command and block until it is acknowledged or the
    /// channel timeout elapses.
    pub fn send_and_wait(&self, ep: &dyn Endpoint, opcode: u32, payload: Vec<u32>) -> Result<()> {
        let seq = self.alloc_seq();
        if self.pending.compare_exchange(IDLE, seq, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(Error::invalid(format!(
                "opcode {opcode:#010x} issued while another command is pending"
            )));
        }
        self.pending_opcode.store(opcode, Ordering::Release);

        let pkt = Packet::new(opcode, command_token(self.session_id, seq), payload);
        tracing::debug!(session = self.session_id, opcode = format_args!("{opcode:#010x}"), seq, "command");
        if let Err(e) = ep.send(&pkt) {
            self.pending.store(IDLE, Ordering::Release);
            return Err(e);
        }

        let acked = self.waiter.wait_if(
            || self.pending.load(Ordering::Acquire) == seq,
            Some(self.timeout),
        );
        if !acked && self.pending.compare_exchange(seq, IDLE, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            tracing::error!(session = self.session_id, opcode = format_args!("{opcode:#010x}"), seq, "command timed out");
            return Err(Error::Timeout { opcode });
        }

        let result = self.result.load(Ordering::Acquire);
        let (rseq, status) = ((result >> 32) as u32, result as u32);
        if rseq != seq {
            // woken by quit rather than by our ack
            self.pending.store(IDLE, Ordering::Release);
            return Err(Error::Timeout { opcode });
        }
        if status != 0 {
            tracing::error!(session = self.session_id, opcode = format_args!("{opcode:#010x}"), status, "command rejected");
            return Err(Error::RemoteRejected { opcode, status });
        }
        Ok(())
    }

    /// Send a command without tracking it. Its acknowledgement, if any, is
    /// observed only through the owner's callback.
    pub fn send_nowait(&self, ep: &dyn Endpoint, opcode: u32, payload: Vec<u32>) -> Result<()> {
        let token = command_token(self.session_id, self.alloc_seq());
        tracing::debug!(session = self.session_id, opcode = format_args!("{opcode:#010x}"), "command (no wait)");
        ep.send(&Packet::new(opcode, token, payload))
    }

    /// Send a data command whose token is chosen by the caller.
    pub fn send_data(&self, ep: &dyn Endpoint, opcode: u32, token: u32, payload: Vec<u32>) -> Result<()> {
        tracing::debug!(session = self.session_id, opcode = format_args!("{opcode:#010x}"), token, "data");
        ep.send(&Packet::new(opcode, token, payload))
    }

    /// Offer an acknowledgement from the delivery path.
    pub fn complete(&self, token: u32, ack: BasicResult) -> AckOutcome {
        let seq = token_seq(token);
        if seq == IDLE || self.pending.load(Ordering::Acquire) != seq {
            return AckOutcome::Unsolicited;
        }
        let expected = self.pending_opcode.load(Ordering::Acquire);
        if ack.opcode != expected {
            return AckOutcome::OpcodeMismatch { expected };
        }
        self.result.store(((seq as u64) << 32) | ack.status as u64, Ordering::Release);
        if self.pending.compare_exchange(seq, IDLE, Ordering::AcqRel, Ordering::Acquire).is_err() {
            // lost the race against the timeout path
            return AckOutcome::Unsolicited;
        }
        self.waiter.broadcast();
        AckOutcome::Completed
    }

    /// Abandon any wait in progress; it returns `Timeout`.
    pub fn shutdown(&self) {
        self.waiter.quit_waiting();
    }
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("session_id", &self.session_id)
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_skips_zero_on_wrap() {
        let ch = CommandChannel::new(1, Duration::from_millis(10));
        ch.next_seq.store(TOKEN_SEQ_MAX, Ordering::Relaxed);
        assert_eq!(ch.alloc_seq(), TOKEN_SEQ_MAX);
        assert_eq!(ch.alloc_seq(), 1);
    }

    #[test]
    fn idle_channel_ignores_acks() {
        let ch = CommandChannel::new(3, Duration::from_millis(10));
        let ack = BasicResult { opcode: 0x10BD2, status: 0 };
        assert_eq!(ch.complete(command_token(3, 7), ack), AckOutcome::Unsolicited);
        assert!(!ch.is_pending());
    }
}
