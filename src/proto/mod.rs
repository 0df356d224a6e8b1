// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Wire layer: opcodes, packet shape, payload builders.

pub mod opcode;
pub mod packet;
pub mod params;

pub use opcode::Format;
pub use packet::{BasicResult, BusAddr, Packet, ReadDone, WriteDone};
pub use params::{EncoderConfig, EqBand, EqualizerConfig, MediaFormat, PpParam, WmaConfig};
