// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Opcodes, format identifiers and parameter ids understood by the remote
// audio stream manager.

// ---------------------------------------------------------------------------
// Generic response
// ---------------------------------------------------------------------------

/// Generic acknowledgement. `payload[0]` echoes the acknowledged opcode,
/// `payload[1]` carries the status (0 = success).
pub const BASIC_RSP_RESULT: u32 = 0x0001_10E8;

// ---------------------------------------------------------------------------
// Stream / session commands
// ---------------------------------------------------------------------------

pub const STREAM_CMD_OPEN_READ: u32 = 0x0001_0BCB;
pub const STREAM_CMD_OPEN_WRITE: u32 = 0x0001_0BCA;
pub const STREAM_CMD_OPEN_READWRITE: u32 = 0x0001_0BCC;
pub const STREAM_CMD_CLOSE: u32 = 0x0001_0BCD;
pub const STREAM_CMD_FLUSH: u32 = 0x0001_0BCE;
pub const STREAM_CMD_SET_ENCDEC_PARAM: u32 = 0x0001_0C10;
pub const STREAM_CMD_SET_PP_PARAMS: u32 = 0x0001_0C1E;

pub const SESSION_CMD_RUN: u32 = 0x0001_0BD2;
pub const SESSION_CMD_PAUSE: u32 = 0x0001_0BD3;
pub const SESSION_CMD_REGISTER_FOR_TX_OVERFLOW_EVENTS: u32 = 0x0001_0BD5;

pub const DATA_CMD_READ: u32 = 0x0001_0BD8;
pub const DATA_CMD_WRITE: u32 = 0x0001_0BD9;
pub const DATA_CMD_EOS: u32 = 0x0001_0BDB;
pub const DATA_CMD_MEDIA_FORMAT_UPDATE: u32 = 0x0001_0BDC;

// ---------------------------------------------------------------------------
// Memory map commands (shared map service only)
// ---------------------------------------------------------------------------

pub const SESSION_CMD_MEMORY_MAP: u32 = 0x0001_0C32;
pub const SESSION_CMD_MEMORY_UNMAP: u32 = 0x0001_0C33;
pub const SESSION_CMD_MEMORY_MAP_REGIONS: u32 = 0x0001_0C45;
pub const SESSION_CMD_MEMORY_UNMAP_REGIONS: u32 = 0x0001_0C46;

// ---------------------------------------------------------------------------
// Events and command responses from the remote side
// ---------------------------------------------------------------------------

pub const DATA_EVENT_EOS: u32 = 0x0001_0BDD;
pub const DATA_EVENT_WRITE_DONE: u32 = 0x0001_0BDF;
pub const DATA_EVENT_READ_DONE: u32 = 0x0001_0BE0;
pub const DATA_CMDRSP_EOS: u32 = 0x0001_0C1C;
pub const STREAM_CMDRSP_GET_ENCDEC_PARAM: u32 = 0x0001_0C12;
pub const STREAM_CMDRSP_GET_PP_PARAMS: u32 = 0x0001_0C21;
pub const SESSION_EVENT_TX_OVERFLOW: u32 = 0x0001_0C18;

/// Opcodes whose acknowledgement clears a session's pending slot.
pub fn is_session_tracked(opcode: u32) -> bool {
    matches!(
        opcode,
        SESSION_CMD_PAUSE
            | DATA_CMD_EOS
            | STREAM_CMD_CLOSE
            | STREAM_CMD_FLUSH
            | SESSION_CMD_RUN
            | SESSION_CMD_REGISTER_FOR_TX_OVERFLOW_EVENTS
            | STREAM_CMD_OPEN_READ
            | STREAM_CMD_OPEN_WRITE
            | STREAM_CMD_OPEN_READWRITE
            | DATA_CMD_MEDIA_FORMAT_UPDATE
            | STREAM_CMD_SET_ENCDEC_PARAM
            | STREAM_CMD_SET_PP_PARAMS
    )
}

/// Opcodes whose acknowledgement clears the map service's pending slot.
pub fn is_map_tracked(opcode: u32) -> bool {
    matches!(
        opcode,
        SESSION_CMD_MEMORY_MAP
            | SESSION_CMD_MEMORY_UNMAP
            | SESSION_CMD_MEMORY_MAP_REGIONS
            | SESSION_CMD_MEMORY_UNMAP_REGIONS
    )
}

// ---------------------------------------------------------------------------
// Media formats on the wire
// ---------------------------------------------------------------------------

pub const LINEAR_PCM: u32 = 0x0001_0BE5;
pub const MPEG4_AAC: u32 = 0x0001_0BE9;
pub const AMRNB_FS: u32 = 0x0001_0BEB;
pub const V13K_FS: u32 = 0x0001_0BED;
pub const EVRC_FS: u32 = 0x0001_0BEE;
pub const WMA_V10PRO: u32 = 0x0001_0BF9;
pub const WMA_V9: u32 = 0x0001_0BFA;

/// Client-facing stream format selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    LinearPcm,
    Mpeg4Aac,
    Qcelp13k,
    Evrc,
    AmrNb,
    WmaV9,
    WmaV10Pro,
}

impl Format {
    /// Wire identifier of this format.
    pub fn wire_id(self) -> u32 {
        match self {
            Format::LinearPcm => LINEAR_PCM,
            Format::Mpeg4Aac => MPEG4_AAC,
            Format::Qcelp13k => V13K_FS,
            Format::Evrc => EVRC_FS,
            Format::AmrNb => AMRNB_FS,
            Format::WmaV9 => WMA_V9,
            Format::WmaV10Pro => WMA_V10PRO,
        }
    }

    pub fn from_wire(id: u32) -> Option<Self> {
        Some(match id {
            LINEAR_PCM => Format::LinearPcm,
            MPEG4_AAC => Format::Mpeg4Aac,
            V13K_FS => Format::Qcelp13k,
            EVRC_FS => Format::Evrc,
            AMRNB_FS => Format::AmrNb,
            WMA_V9 => Format::WmaV9,
            WMA_V10PRO => Format::WmaV10Pro,
            _ => return None,
        })
    }

    /// Formats the remote encoder can produce on a read stream.
    pub fn readable(self) -> bool {
        matches!(
            self,
            Format::LinearPcm | Format::Mpeg4Aac | Format::Qcelp13k | Format::Evrc | Format::AmrNb
        )
    }

    /// Formats accepted on a write-only stream.
    pub fn writable(self) -> bool {
        matches!(
            self,
            Format::LinearPcm | Format::Mpeg4Aac | Format::WmaV9 | Format::WmaV10Pro
        )
    }

    /// Formats accepted on the write half of a read-write stream.
    pub fn loopback_writable(self) -> bool {
        matches!(self, Format::LinearPcm | Format::WmaV9 | Format::WmaV10Pro)
    }
}

// ---------------------------------------------------------------------------
// Stream open flags, endpoints, topologies
// ---------------------------------------------------------------------------

pub const STREAM_PRIORITY_NORMAL: u32 = 0x0000;
pub const STREAM_PRIORITY_HIGH: u32 = 0x0001;
pub const BUFFER_META_ENABLE: u32 = 0x0010;

pub const END_POINT_DEVICE_MATRIX: u32 = 0;
pub const DEFAULT_POPP_TOPOLOGY: u32 = 0x0001_0BE4;

// ---------------------------------------------------------------------------
// Parameter blocks
// ---------------------------------------------------------------------------

pub const ENCDEC_CFG_BLK_ID: u32 = 0x0001_0C2C;

pub const VOLUME_CONTROL_MODULE_ID: u32 = 0x0001_0BFE;
pub const MASTER_GAIN_PARAM_ID: u32 = 0x0001_0BFF;
pub const L_R_CHANNEL_GAIN_PARAM_ID: u32 = 0x0001_0C00;
pub const MUTE_CONFIG_PARAM_ID: u32 = 0x0001_0C01;
pub const EQUALIZER_MODULE_ID: u32 = 0x0001_0C27;
pub const EQUALIZER_PARAM_ID: u32 = 0x0001_0C28;

/// Write flag value meaning "no timestamp".
pub const WRITE_FLAGS_NO_TIMESTAMP: u32 = 0xFF00;

/// Translate caller write flags into the wire `uflags` word.
pub fn write_uflags(flags: u32) -> u32 {
    if flags == WRITE_FLAGS_NO_TIMESTAMP {
        flags & 0x8000_00FF
    } else {
        0x8000_0000 | flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_timestamp_flag_clears_valid_bit() {
        assert_eq!(write_uflags(WRITE_FLAGS_NO_TIMESTAMP), 0);
        assert_eq!(write_uflags(0), 0x8000_0000);
        assert_eq!(write_uflags(0x3), 0x8000_0003);
    }

    #[test]
    fn format_direction_tables() {
        assert!(Format::AmrNb.readable());
        assert!(!Format::AmrNb.writable());
        assert!(Format::WmaV9.writable());
        assert!(!Format::Mpeg4Aac.loopback_writable());
        assert_eq!(Format::from_wire(Format::Evrc.wire_id()), Some(Format::Evrc));
        assert_eq!(Format::from_wire(0xdead), None);
    }
}
