// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Payload builders for every outbound command. Each builder returns the
// payload words; the session stamps header fields (opcode, token).

use super::opcode::*;
use super::packet::BusAddr;
use crate::error::{Error, Result};

#[inline]
fn pack16(lo: u16, hi: u16) -> u32 {
    lo as u32 | ((hi as u32) << 16)
}

// ---------------------------------------------------------------------------
// Stream open
// ---------------------------------------------------------------------------

pub fn open_read(format: Format) -> Result<Vec<u32>> {
    if !format.readable() {
        return Err(Error::invalid(format!("{format:?} cannot be opened for read")));
    }
    let mode = match format {
        Format::LinearPcm => STREAM_PRIORITY_HIGH,
        _ => BUFFER_META_ENABLE | STREAM_PRIORITY_HIGH,
    };
    Ok(vec![mode, END_POINT_DEVICE_MATRIX, DEFAULT_POPP_TOPOLOGY, format.wire_id()])
}

pub fn open_write(format: Format) -> Result<Vec<u32>> {
    if !format.writable() {
        return Err(Error::invalid(format!("{format:?} cannot be opened for write")));
    }
    // mode, sink endpoint, stream handle, post-proc topology, format
    Ok(vec![
        STREAM_PRIORITY_HIGH,
        END_POINT_DEVICE_MATRIX,
        0,
        DEFAULT_POPP_TOPOLOGY,
        format.wire_id(),
    ])
}

pub fn open_read_write(read: Format, write: Format) -> Result<Vec<u32>> {
    if !write.loopback_writable() {
        return Err(Error::invalid(format!("{write:?} not accepted as read-write input")));
    }
    if !read.readable() {
        return Err(Error::invalid(format!("{read:?} not accepted as read-write output")));
    }
    Ok(vec![
        BUFFER_META_ENABLE | STREAM_PRIORITY_NORMAL,
        DEFAULT_POPP_TOPOLOGY,
        write.wire_id(),
        read.wire_id(),
    ])
}

// ---------------------------------------------------------------------------
// Session control and data
// ---------------------------------------------------------------------------

pub fn run(flags: u32, msw_ts: u32, lsw_ts: u32) -> Vec<u32> {
    vec![flags, msw_ts, lsw_ts]
}

pub fn reg_tx_overflow(enable: bool) -> Vec<u32> {
    vec![enable as u32]
}

pub fn write(buf: BusAddr, len: u32, uid: u32, msw_ts: u32, lsw_ts: u32, flags: u32) -> Vec<u32> {
    vec![buf.0, len, uid, msw_ts, lsw_ts, write_uflags(flags)]
}

pub fn read(buf: BusAddr, size: u32, uid: u32) -> Vec<u32> {
    vec![buf.0, size, uid]
}

// ---------------------------------------------------------------------------
// Memory map
// ---------------------------------------------------------------------------

/// Mempool the regions live in (0 = external bus memory).
pub const MEMPOOL_EBI: u32 = 0;

/// One contiguous region of `size` bytes.
pub fn memory_map(base: BusAddr, size: u32) -> Vec<u32> {
    vec![base.0, size, MEMPOOL_EBI, 0]
}

pub fn memory_unmap(base: BusAddr) -> Vec<u32> {
    vec![base.0]
}

/// All `(address, size)` pairs of one ring in a single message.
pub fn memory_map_regions(regions: &[(BusAddr, u32)]) -> Vec<u32> {
    let mut w = Vec::with_capacity(2 + regions.len() * 2);
    w.push(MEMPOOL_EBI);
    w.push(regions.len() as u32 & 0xFF);
    for &(addr, size) in regions {
        w.push(addr.0);
        w.push(size);
    }
    w
}

pub fn memory_unmap_regions(addrs: &[BusAddr]) -> Vec<u32> {
    let mut w = Vec::with_capacity(1 + addrs.len());
    w.push(addrs.len() as u32 & 0xFF);
    w.extend(addrs.iter().map(|a| a.0));
    w
}

// ---------------------------------------------------------------------------
// Encoder configuration (read streams)
// ---------------------------------------------------------------------------

/// Codec-specific encoder block sent with `SET_ENCDEC_PARAM`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderConfig {
    Aac {
        frames_per_buf: u32,
        sample_rate: u32,
        channels: u32,
        bit_rate: u32,
        mode: u32,
        format: u32,
    },
    /// 16-bit signed interleaved PCM, one frame per buffer.
    Pcm { sample_rate: u32, channels: u32 },
    Qcelp13k {
        frames_per_buf: u32,
        min_rate: u16,
        max_rate: u16,
        reduced_rate_level: u16,
        rate_modulation_cmd: u16,
    },
    Evrc {
        frames_per_buf: u32,
        min_rate: u16,
        max_rate: u16,
        rate_modulation_cmd: u16,
    },
    AmrNb {
        frames_per_buf: u32,
        band_mode: u16,
        dtx_enable: u16,
    },
}

impl EncoderConfig {
    pub fn format(&self) -> Format {
        match self {
            EncoderConfig::Aac { .. } => Format::Mpeg4Aac,
            EncoderConfig::Pcm { .. } => Format::LinearPcm,
            EncoderConfig::Qcelp13k { .. } => Format::Qcelp13k,
            EncoderConfig::Evrc { .. } => Format::Evrc,
            EncoderConfig::AmrNb { .. } => Format::AmrNb,
        }
    }

    fn frames_per_buf(&self) -> u32 {
        match *self {
            EncoderConfig::Pcm { .. } => 1,
            EncoderConfig::Aac { frames_per_buf, .. }
            | EncoderConfig::Qcelp13k { frames_per_buf, .. }
            | EncoderConfig::Evrc { frames_per_buf, .. }
            | EncoderConfig::AmrNb { frames_per_buf, .. } => frames_per_buf,
        }
    }

    fn cfg_words(&self) -> Vec<u32> {
        match *self {
            EncoderConfig::Aac { sample_rate, channels, bit_rate, mode, format, .. } => {
                vec![bit_rate, mode, format, channels, sample_rate]
            }
            EncoderConfig::Pcm { sample_rate, channels } => pcm_cfg(sample_rate, channels),
            EncoderConfig::Qcelp13k {
                min_rate,
                max_rate,
                reduced_rate_level,
                rate_modulation_cmd,
                ..
            } => vec![
                pack16(min_rate, max_rate),
                pack16(reduced_rate_level, rate_modulation_cmd),
            ],
            EncoderConfig::Evrc { min_rate, max_rate, rate_modulation_cmd, .. } => {
                vec![pack16(min_rate, max_rate), pack16(rate_modulation_cmd, 0)]
            }
            EncoderConfig::AmrNb { band_mode, dtx_enable, .. } => {
                vec![pack16(band_mode, dtx_enable)]
            }
        }
    }

    /// Payload of `STREAM_CMD_SET_ENCDEC_PARAM`.
    pub fn to_words(&self) -> Vec<u32> {
        let cfg = self.cfg_words();
        let cfg_size = (cfg.len() * 4) as u32;
        // encode block: frames_per_buf, format_id, cfg_size, cfg...
        let blk_size = 12 + cfg_size;
        let mut w = Vec::with_capacity(5 + cfg.len());
        w.push(ENCDEC_CFG_BLK_ID);
        w.push(blk_size);
        w.push(self.frames_per_buf());
        w.push(self.format().wire_id());
        w.push(cfg_size);
        w.extend(cfg);
        w
    }
}

fn pcm_cfg(sample_rate: u32, channels: u32) -> Vec<u32> {
    // ch_cfg, bits_per_sample, sample_rate, is_signed, interleaved
    vec![channels, 16, sample_rate, 1, 1]
}

// ---------------------------------------------------------------------------
// Media format (write streams)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WmaConfig {
    pub format_tag: u16,
    pub ch_cfg: u16,
    pub sample_rate: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub valid_bits_per_sample: u16,
    pub ch_mask: u32,
    pub encode_opt: u16,
    /// Only meaningful for WMA v10 Pro.
    pub adv_encode_opt: u16,
    /// Only meaningful for WMA v10 Pro.
    pub adv_encode_opt2: u32,
}

/// Media format block sent with `DATA_CMD_MEDIA_FORMAT_UPDATE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaFormat {
    Pcm { sample_rate: u32, channels: u32 },
    WmaV9(WmaConfig),
    WmaV10Pro(WmaConfig),
}

impl MediaFormat {
    pub fn format(&self) -> Format {
        match self {
            MediaFormat::Pcm { .. } => Format::LinearPcm,
            MediaFormat::WmaV9(_) => Format::WmaV9,
            MediaFormat::WmaV10Pro(_) => Format::WmaV10Pro,
        }
    }

    pub fn to_words(&self) -> Vec<u32> {
        let cfg = match self {
            MediaFormat::Pcm { sample_rate, channels } => pcm_cfg(*sample_rate, *channels),
            MediaFormat::WmaV9(c) => wma_words(c, false),
            MediaFormat::WmaV10Pro(c) => wma_words(c, true),
        };
        let mut w = Vec::with_capacity(2 + cfg.len());
        w.push(self.format().wire_id());
        w.push((cfg.len() * 4) as u32);
        w.extend(cfg);
        w
    }
}

fn wma_words(c: &WmaConfig, pro: bool) -> Vec<u32> {
    let (adv, adv2) = if pro { (c.adv_encode_opt, c.adv_encode_opt2) } else { (0, 0) };
    vec![
        pack16(c.format_tag, c.ch_cfg),
        c.sample_rate,
        c.avg_bytes_per_sec,
        pack16(c.block_align, c.valid_bits_per_sample),
        c.ch_mask,
        pack16(c.encode_opt, adv),
        adv2,
        // drc peak ref/target, average ref/target
        0,
        0,
        0,
        0,
    ]
}

// ---------------------------------------------------------------------------
// Post-processing parameters
// ---------------------------------------------------------------------------

/// Most bands an equalizer command may carry.
pub const EQ_MAX_BANDS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EqBand {
    pub band_idx: u32,
    pub filter_type: u32,
    pub center_freq_hz: u32,
    pub filter_gain: i32,
    pub q_factor: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EqualizerConfig {
    pub enable: bool,
    pub bands: Vec<EqBand>,
}

/// One post-processing parameter set, routed through `SET_PP_PARAMS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PpParam {
    Mute(bool),
    LrGain { left: u16, right: u16 },
    MasterGain(u16),
    Equalizer(EqualizerConfig),
}

impl PpParam {
    fn ids(&self) -> (u32, u32) {
        match self {
            PpParam::Mute(_) => (VOLUME_CONTROL_MODULE_ID, MUTE_CONFIG_PARAM_ID),
            PpParam::LrGain { .. } => (VOLUME_CONTROL_MODULE_ID, L_R_CHANNEL_GAIN_PARAM_ID),
            PpParam::MasterGain(_) => (VOLUME_CONTROL_MODULE_ID, MASTER_GAIN_PARAM_ID),
            PpParam::Equalizer(_) => (EQUALIZER_MODULE_ID, EQUALIZER_PARAM_ID),
        }
    }

    fn body(&self) -> Result<Vec<u32>> {
        Ok(match self {
            PpParam::Mute(on) => vec![*on as u32],
            PpParam::LrGain { left, right } => vec![pack16(*left, *right)],
            PpParam::MasterGain(g) => vec![pack16(*g, 0)],
            PpParam::Equalizer(eq) => {
                if eq.bands.len() > EQ_MAX_BANDS {
                    return Err(Error::invalid(format!(
                        "equalizer has {} bands, at most {EQ_MAX_BANDS} supported",
                        eq.bands.len()
                    )));
                }
                // fixed-size band table, unused bands zeroed
                let mut w = Vec::with_capacity(2 + EQ_MAX_BANDS * 5);
                w.push(eq.enable as u32);
                w.push(eq.bands.len() as u32);
                for i in 0..EQ_MAX_BANDS {
                    let b = eq.bands.get(i).copied().unwrap_or_default();
                    w.extend([
                        b.band_idx,
                        b.filter_type,
                        b.center_freq_hz,
                        b.filter_gain as u32,
                        b.q_factor as u32,
                    ]);
                }
                w
            }
        })
    }

    /// Payload of `STREAM_CMD_SET_PP_PARAMS`: in-band data pointer (0),
    /// data size, then module id, param id, param size, reserved, body.
    pub fn to_words(&self) -> Result<Vec<u32>> {
        let body = self.body()?;
        let (module_id, param_id) = self.ids();
        let param_size = (body.len() * 4) as u32;
        let mut w = Vec::with_capacity(6 + body.len());
        w.push(0);
        w.push(12 + param_size);
        w.push(module_id);
        w.push(param_id);
        w.push(param_size);
        w.push(0);
        w.extend(body);
        Ok(w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_rejects_wrong_direction() {
        assert!(open_read(Format::WmaV9).is_err());
        assert!(open_write(Format::AmrNb).is_err());
        assert!(open_read_write(Format::LinearPcm, Format::Mpeg4Aac).is_err());
        assert!(open_read_write(Format::AmrNb, Format::WmaV10Pro).is_ok());
    }

    #[test]
    fn compressed_read_requests_meta() {
        let w = open_read(Format::Evrc).unwrap();
        assert_eq!(w[0] & BUFFER_META_ENABLE, BUFFER_META_ENABLE);
        let w = open_read(Format::LinearPcm).unwrap();
        assert_eq!(w[0] & BUFFER_META_ENABLE, 0);
    }

    #[test]
    fn map_regions_lists_every_buffer() {
        let w = memory_map_regions(&[(BusAddr(0x1000), 256), (BusAddr(0x2000), 256)]);
        assert_eq!(w, vec![MEMPOOL_EBI, 2, 0x1000, 256, 0x2000, 256]);
        assert_eq!(memory_unmap_regions(&[BusAddr(0x1000)]), vec![1, 0x1000]);
    }

    #[test]
    fn pcm_encoder_block_is_one_frame() {
        let w = EncoderConfig::Pcm { sample_rate: 48000, channels: 2 }.to_words();
        assert_eq!(w[0], ENCDEC_CFG_BLK_ID);
        assert_eq!(w[2], 1);
        assert_eq!(w[3], LINEAR_PCM);
        assert_eq!(&w[5..], &[2, 16, 48000, 1, 1]);
    }

    #[test]
    fn equalizer_band_limit() {
        let eq = EqualizerConfig { enable: true, bands: vec![EqBand::default(); EQ_MAX_BANDS + 1] };
        assert!(PpParam::Equalizer(eq).to_words().is_err());
    }

    #[test]
    fn pp_header_names_module_and_param() {
        let w = PpParam::Mute(true).to_words().unwrap();
        assert_eq!(w[2], VOLUME_CONTROL_MODULE_ID);
        assert_eq!(w[3], MUTE_CONFIG_PARAM_ID);
        assert_eq!(w[4], 4);
        assert_eq!(w[6], 1);
    }
}
