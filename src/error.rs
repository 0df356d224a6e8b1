// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error taxonomy shared by every layer of the stream protocol.

use thiserror::Error;

/// Errors returned synchronously to callers of the stream protocol.
///
/// Anomalies that are only observed on the delivery path (a completion for
/// the wrong buffer, an acknowledgement addressed to another session) never
/// surface here; they are logged and the update is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Bad direction, unknown format, closed handle, wrong io mode.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No free session slot, or a buffer allocation failed.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The ring has no locally owned buffer right now. Flow control, not a fault.
    #[error("no buffer available")]
    NotReady,

    /// An inbound address or token did not match local state.
    #[error("protocol mismatch: expected {expected:#x}, received {received:#x}")]
    ProtocolMismatch { expected: u64, received: u64 },

    /// No acknowledgement arrived within the bound.
    #[error("timed out waiting for acknowledgement of opcode {opcode:#010x}")]
    Timeout { opcode: u32 },

    /// The remote processor acknowledged with a failure status.
    #[error("opcode {opcode:#010x} rejected by remote (status {status:#x})")]
    RemoteRejected { opcode: u32, status: u32 },

    /// The underlying message transport refused the packet.
    #[error("transport: {0}")]
    Transport(String),

    /// The handle refers to a session slot that has since been recycled.
    #[error("stale session handle")]
    StaleHandle,
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
