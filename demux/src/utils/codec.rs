//! Codec configuration records carried inside container payloads.
//!
//! FLV delivers AAC and H.264 configuration in-band; these helpers turn them
//! into the fields of a [`Format`](crate::output::Format).

use anyhow::{bail, ensure, Result};

use super::bitstream_io::BsIoSliceReader;
use super::errors::CodecError;

const AAC_SAMPLING_FREQUENCIES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

const AAC_OBJECT_TYPE_ESCAPE: u8 = 31;
const AAC_OBJECT_TYPE_SBR: u8 = 5;
const AAC_OBJECT_TYPE_PS: u8 = 29;

/// Decoded AudioSpecificConfig (ISO/IEC 14496-3 1.6.2.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AacConfig {
    pub object_type: u8,
    pub sample_rate: u32,
    pub channel_count: u32,
    pub codecs: String,
}

pub fn parse_audio_specific_config(data: &[u8]) -> Result<AacConfig> {
    let mut reader = BsIoSliceReader::from_slice(data);

    let mut object_type = read_aac_object_type(&mut reader)?;
    let mut sample_rate = read_aac_sampling_frequency(&mut reader)?;
    let channel_configuration: u8 = reader.get_n(4)?;

    if object_type == AAC_OBJECT_TYPE_SBR || object_type == AAC_OBJECT_TYPE_PS {
        // Explicit SBR signalling carries the output rate and the core object type.
        sample_rate = read_aac_sampling_frequency(&mut reader)?;
        object_type = read_aac_object_type(&mut reader)?;
    }

    let channel_count = match channel_configuration {
        1..=6 => channel_configuration as u32,
        7 | 12 | 14 => 8,
        11 => 7,
        _ => bail!(CodecError::InvalidAudioSpecificConfig(
            "unsupported channel configuration"
        )),
    };

    Ok(AacConfig {
        object_type,
        sample_rate,
        channel_count,
        codecs: format!("mp4a.40.{object_type}"),
    })
}

fn read_aac_object_type(reader: &mut BsIoSliceReader) -> Result<u8> {
    let object_type: u8 = reader.get_n(5)?;
    if object_type == AAC_OBJECT_TYPE_ESCAPE {
        let extension: u8 = reader.get_n(6)?;
        return Ok(32 + extension);
    }
    Ok(object_type)
}

fn read_aac_sampling_frequency(reader: &mut BsIoSliceReader) -> Result<u32> {
    let index: u8 = reader.get_n(4)?;
    if index == 0xF {
        return Ok(reader.get_n(24)?);
    }

    AAC_SAMPLING_FREQUENCIES
        .get(index as usize)
        .copied()
        .ok_or_else(|| CodecError::InvalidAudioSpecificConfig("reserved sampling frequency").into())
}

/// Parsed AVCDecoderConfigurationRecord (ISO/IEC 14496-15 5.2.4.1).
#[derive(Debug, Clone, PartialEq)]
pub struct AvcConfig {
    pub nal_unit_length_field_length: usize,
    /// SPS and PPS NAL units, each prefixed with an Annex-B start code.
    pub initialization_data: Vec<Vec<u8>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub pixel_width_height_ratio: f32,
    pub codecs: Option<String>,
}

pub const NAL_START_CODE: [u8; 4] = [0, 0, 0, 1];

pub fn parse_avc_config(data: &[u8]) -> Result<AvcConfig> {
    ensure!(data.len() >= 6, CodecError::InvalidAvcConfig);

    let nal_unit_length_field_length = (data[4] & 0x3) as usize + 1;

    let mut offset = 5;
    let mut initialization_data = Vec::new();

    let sps_count = data[offset] & 0x1F;
    offset += 1;
    for _ in 0..sps_count {
        initialization_data.push(read_parameter_set(data, &mut offset)?);
    }

    let pps_count = *data.get(offset).ok_or(CodecError::InvalidAvcConfig)?;
    offset += 1;
    for _ in 0..pps_count {
        initialization_data.push(read_parameter_set(data, &mut offset)?);
    }

    let mut config = AvcConfig {
        nal_unit_length_field_length,
        initialization_data,
        width: None,
        height: None,
        pixel_width_height_ratio: 1.0,
        codecs: None,
    };

    if sps_count > 0 {
        let sps = &config.initialization_data[0][NAL_START_CODE.len()..];
        let parsed = parse_sps(sps)?;
        config.width = Some(parsed.width);
        config.height = Some(parsed.height);
        config.pixel_width_height_ratio = parsed.pixel_width_height_ratio;
        config.codecs = Some(format!(
            "avc1.{:02X}{:02X}{:02X}",
            parsed.profile_idc, parsed.constraint_flags, parsed.level_idc
        ));
    }

    Ok(config)
}

fn read_parameter_set(data: &[u8], offset: &mut usize) -> Result<Vec<u8>> {
    let header = data
        .get(*offset..*offset + 2)
        .ok_or(CodecError::InvalidAvcConfig)?;
    let length = u16::from_be_bytes([header[0], header[1]]) as usize;
    *offset += 2;

    let unit = data
        .get(*offset..*offset + length)
        .ok_or(CodecError::InvalidAvcConfig)?;
    *offset += length;

    let mut prefixed = Vec::with_capacity(NAL_START_CODE.len() + length);
    prefixed.extend_from_slice(&NAL_START_CODE);
    prefixed.extend_from_slice(unit);
    Ok(prefixed)
}

/// Fields of a sequence parameter set needed to describe the video track.
#[derive(Debug, Clone, PartialEq)]
pub struct SpsData {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub width: u32,
    pub height: u32,
    pub pixel_width_height_ratio: f32,
}

const ASPECT_RATIO_IDC_EXTENDED_SAR: u8 = 255;

const ASPECT_RATIOS: [(u32, u32); 17] = [
    (1, 1),
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
    (4, 3),
    (3, 2),
    (2, 1),
];

/// Removes emulation prevention bytes (`00 00 03` becomes `00 00`).
pub fn unescape_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &byte in data {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    out
}

/// Parses an SPS NAL unit, including its one-byte NAL header.
pub fn parse_sps(nal_unit: &[u8]) -> Result<SpsData> {
    ensure!(nal_unit.len() > 4, CodecError::InvalidSps);
    let rbsp = unescape_rbsp(&nal_unit[1..]);
    let mut reader = BsIoSliceReader::from_slice(&rbsp);

    let profile_idc: u8 = reader.get_n(8)?;
    let constraint_flags: u8 = reader.get_n(8)?;
    let level_idc: u8 = reader.get_n(8)?;
    reader.get_ue()?; // seq_parameter_set_id

    let mut chroma_format_idc = 1;
    let mut separate_colour_plane = false;
    if matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    ) {
        chroma_format_idc = reader.get_ue()?;
        if chroma_format_idc == 3 {
            separate_colour_plane = reader.get()?;
        }
        reader.get_ue()?; // bit_depth_luma_minus8
        reader.get_ue()?; // bit_depth_chroma_minus8
        reader.skip_n(1)?; // qpprime_y_zero_transform_bypass_flag
        if reader.get()? {
            let list_count = if chroma_format_idc != 3 { 8 } else { 12 };
            for i in 0..list_count {
                if reader.get()? {
                    skip_scaling_list(&mut reader, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    reader.get_ue()?; // log2_max_frame_num_minus4
    match reader.get_ue()? {
        0 => {
            reader.get_ue()?; // log2_max_pic_order_cnt_lsb_minus4
        }
        1 => {
            reader.skip_n(1)?; // delta_pic_order_always_zero_flag
            reader.get_se()?; // offset_for_non_ref_pic
            reader.get_se()?; // offset_for_top_to_bottom_field
            let cycle = reader.get_ue()?;
            for _ in 0..cycle {
                reader.get_se()?;
            }
        }
        _ => {}
    }
    reader.get_ue()?; // max_num_ref_frames
    reader.skip_n(1)?; // gaps_in_frame_num_value_allowed_flag

    let pic_width_in_mbs = reader.get_ue()? + 1;
    let pic_height_in_map_units = reader.get_ue()? + 1;
    let frame_mbs_only = reader.get()?;
    let field_factor = if frame_mbs_only { 1 } else { 2 };
    if !frame_mbs_only {
        reader.skip_n(1)?; // mb_adaptive_frame_field_flag
    }
    reader.skip_n(1)?; // direct_8x8_inference_flag

    let mut width = pic_width_in_mbs * 16;
    let mut height = pic_height_in_map_units * field_factor * 16;
    if reader.get()? {
        let crop_left = reader.get_ue()?;
        let crop_right = reader.get_ue()?;
        let crop_top = reader.get_ue()?;
        let crop_bottom = reader.get_ue()?;

        let chroma_array_type = if separate_colour_plane {
            0
        } else {
            chroma_format_idc
        };
        let (crop_unit_x, crop_unit_y) = match chroma_array_type {
            0 => (1, field_factor),
            1 => (2, 2 * field_factor),
            2 => (2, field_factor),
            _ => (1, field_factor),
        };
        width = width.saturating_sub((crop_left + crop_right) * crop_unit_x);
        height = height.saturating_sub((crop_top + crop_bottom) * crop_unit_y);
    }

    let mut pixel_width_height_ratio = 1.0;
    if reader.get()? && reader.get()? {
        // vui_parameters_present_flag, aspect_ratio_info_present_flag
        let aspect_ratio_idc: u8 = reader.get_n(8)?;
        let (sar_width, sar_height) = if aspect_ratio_idc == ASPECT_RATIO_IDC_EXTENDED_SAR {
            (reader.get_n::<u32>(16)?, reader.get_n::<u32>(16)?)
        } else {
            ASPECT_RATIOS
                .get(aspect_ratio_idc as usize)
                .copied()
                .unwrap_or_else(|| {
                    log::warn!("Unexpected aspect_ratio_idc value: {aspect_ratio_idc}");
                    (1, 1)
                })
        };
        if sar_height != 0 {
            pixel_width_height_ratio = sar_width as f32 / sar_height as f32;
        }
    }

    Ok(SpsData {
        profile_idc,
        constraint_flags,
        level_idc,
        width,
        height,
        pixel_width_height_ratio,
    })
}

fn skip_scaling_list(reader: &mut BsIoSliceReader, size: usize) -> Result<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta_scale = reader.get_se()?;
            next_scale = (last_scale + delta_scale + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aac_lc_stereo() -> Result<()> {
        // AOT 2, 44.1 kHz (index 4), 2 channels.
        let config = parse_audio_specific_config(&[0x12, 0x10])?;
        assert_eq!(config.object_type, 2);
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.channel_count, 2);
        assert_eq!(config.codecs, "mp4a.40.2");
        Ok(())
    }

    #[test]
    fn aac_reserved_frequency_fails() {
        // AOT 2, frequency index 13.
        let err = parse_audio_specific_config(&[0x16, 0x90]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CodecError>(),
            Some(CodecError::InvalidAudioSpecificConfig(_))
        ));
    }

    #[test]
    fn emulation_prevention_is_removed() {
        assert_eq!(
            unescape_rbsp(&[0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00, 0x03]),
            vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x03]
        );
    }

    #[test]
    fn baseline_sps_dimensions() -> Result<()> {
        // Baseline 320x240: profile 66, level 13, 20x15 macroblocks.
        let sps = [0x67, 0x42, 0xC0, 0x0D, 0xF4, 0x0A, 0x0F, 0xC8];
        let parsed = parse_sps(&sps)?;
        assert_eq!(parsed.profile_idc, 66);
        assert_eq!(parsed.level_idc, 13);
        assert_eq!((parsed.width, parsed.height), (320, 240));
        assert_eq!(parsed.pixel_width_height_ratio, 1.0);
        Ok(())
    }

    #[test]
    fn avc_record_prefixes_parameter_sets() -> Result<()> {
        let sps = [0x67, 0x42, 0xC0, 0x0D, 0xF4, 0x0A, 0x0F, 0xC8];
        let pps = [0x68, 0xCE, 0x3C, 0x80];
        let mut record = vec![0x01, 0x42, 0xC0, 0x0D, 0xFF, 0xE1, 0x00, sps.len() as u8];
        record.extend_from_slice(&sps);
        record.extend_from_slice(&[0x01, 0x00, pps.len() as u8]);
        record.extend_from_slice(&pps);

        let config = parse_avc_config(&record)?;
        assert_eq!(config.nal_unit_length_field_length, 4);
        assert_eq!(config.initialization_data.len(), 2);
        assert_eq!(config.initialization_data[1][..4], NAL_START_CODE);
        assert_eq!(config.codecs.as_deref(), Some("avc1.42C00D"));
        assert_eq!(config.width, Some(320));
        Ok(())
    }
}
