use anyhow::{ensure, Result};

use super::reader::SetupData;
use crate::output::{mime, Format};
use crate::utils::errors::OggError;

pub const OPUS_SAMPLE_RATE: u32 = 48_000;

const OPUS_ID_SIGNATURE: &[u8; 8] = b"OpusHead";
const OPUS_TAGS_PREFIX: &[u8; 4] = b"Opus";
const OPUS_ID_HEADER_SIZE: usize = 19;

const DEFAULT_SEEK_PRE_ROLL_SAMPLES: u64 = 3840;

/// Opus in Ogg (RFC 7845).
#[derive(Debug, Default)]
pub struct OpusReader {
    header_read: bool,
}

impl OpusReader {
    pub fn verify_bitstream_type(data: &[u8]) -> bool {
        data.starts_with(OPUS_ID_SIGNATURE)
    }

    pub(super) fn reset(&mut self, header_data: bool) {
        if header_data {
            self.header_read = false;
        }
    }

    pub(super) fn read_headers(&mut self, packet: &[u8], setup: &mut SetupData) -> Result<bool> {
        if self.header_read {
            return Ok(packet.starts_with(OPUS_TAGS_PREFIX));
        }

        ensure!(
            packet.len() >= OPUS_ID_HEADER_SIZE && Self::verify_bitstream_type(packet),
            OggError::InvalidHeader("Opus identification")
        );
        let pre_skip = u16::from_le_bytes([packet[10], packet[11]]);
        setup.format = Some(Format {
            channel_count: Some(packet[9] as u32),
            sample_rate: Some(OPUS_SAMPLE_RATE),
            encoder_delay: pre_skip as u32,
            initialization_data: build_initialization_data(packet, pre_skip),
            ..Format::new(mime::AUDIO_OPUS)
        });
        self.header_read = true;
        Ok(true)
    }

    /// Duration of `packet` in 48 kHz granules.
    pub(super) fn prepare_payload(&self, packet: &[u8]) -> Option<i64> {
        let duration_us = packet_duration_us(packet)?;
        Some(OPUS_SAMPLE_RATE as i64 * duration_us / 1_000_000)
    }
}

fn samples_to_nanos(samples: u64) -> u64 {
    samples * 1_000_000_000 / OPUS_SAMPLE_RATE as u64
}

/// The identification header, the pre-skip and the seek pre-roll, the latter
/// two as little-endian nanosecond counts.
fn build_initialization_data(header: &[u8], pre_skip: u16) -> Vec<Vec<u8>> {
    vec![
        header.to_vec(),
        samples_to_nanos(pre_skip as u64).to_le_bytes().to_vec(),
        samples_to_nanos(DEFAULT_SEEK_PRE_ROLL_SAMPLES).to_le_bytes().to_vec(),
    ]
}

/// Duration of an Opus packet from its TOC byte (RFC 6716 3.1).
pub fn packet_duration_us(packet: &[u8]) -> Option<i64> {
    let toc = *packet.first()?;
    let frames = match toc & 0x3 {
        0 => 1,
        1 | 2 => 2,
        _ => (*packet.get(1)? & 0x3F) as i64,
    };

    let config = toc >> 3;
    let length = (config & 0x3) as i64;
    let frame_duration_us = if config >= 16 {
        2500 << length
    } else if config >= 12 {
        10000 << (length & 0x1)
    } else if length == 3 {
        60000
    } else {
        10000 << length
    };
    Some(frames * frame_duration_us)
}
