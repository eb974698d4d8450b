use anyhow::{ensure, Result};

use super::reader::SetupData;
use crate::output::{mime, Format};
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::OggError;

const MAPPING_SIGNATURE: &[u8; 5] = b"\x7FFLAC";
const AUDIO_PACKET_TYPE: u8 = 0xFF;

/// Offset of STREAMINFO in the mapping header: signature, version, header
/// count, `fLaC` and the metadata block header.
const STREAM_INFO_OFFSET: usize = 17;
const STREAM_INFO_SIZE: usize = 34;
const NATIVE_HEADER_OFFSET: usize = 9;
const FRAME_HEADER_SAMPLE_NUMBER_OFFSET: usize = 4;

/// FLAC STREAMINFO metadata block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlacStreamInfo {
    pub min_block_size: u32,
    pub max_block_size: u32,
    pub min_frame_size: u32,
    pub max_frame_size: u32,
    pub sample_rate: u32,
    pub channels: u32,
    pub bits_per_sample: u32,
    pub total_samples: u64,
}

impl FlacStreamInfo {
    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure!(data.len() >= STREAM_INFO_SIZE, OggError::InvalidHeader("FLAC STREAMINFO"));
        let mut reader = BsIoSliceReader::from_slice(data);

        Ok(Self {
            min_block_size: reader.get_n(16)?,
            max_block_size: reader.get_n(16)?,
            min_frame_size: reader.get_n(24)?,
            max_frame_size: reader.get_n(24)?,
            sample_rate: reader.get_n(20)?,
            channels: reader.get_n::<u32>(3)? + 1,
            bits_per_sample: reader.get_n::<u32>(5)? + 1,
            total_samples: reader.get_n(36)?,
        })
    }

    pub fn duration_us(&self) -> Option<i64> {
        (self.total_samples > 0 && self.sample_rate > 0)
            .then(|| (self.total_samples as i128 * 1_000_000 / self.sample_rate as i128) as i64)
    }
}

/// FLAC in Ogg.
#[derive(Debug, Default)]
pub struct FlacReader {
    stream_info: Option<FlacStreamInfo>,
}

impl FlacReader {
    pub fn verify_bitstream_type(data: &[u8]) -> bool {
        data.starts_with(MAPPING_SIGNATURE)
    }

    pub(super) fn reset(&mut self, header_data: bool) {
        if header_data {
            self.stream_info = None;
        }
    }

    pub(super) fn read_headers(&mut self, packet: &[u8], setup: &mut SetupData) -> Result<bool> {
        if self.stream_info.is_none() {
            ensure!(
                packet.len() >= STREAM_INFO_OFFSET + STREAM_INFO_SIZE,
                OggError::InvalidHeader("FLAC mapping")
            );
            let stream_info = FlacStreamInfo::parse(&packet[STREAM_INFO_OFFSET..])?;

            // Native FLAC header with STREAMINFO marked as the last metadata block.
            let mut metadata = packet[NATIVE_HEADER_OFFSET..].to_vec();
            metadata[4] = 0x80;

            setup.format = Some(Format {
                max_input_size: (stream_info.max_frame_size > 0)
                    .then_some(stream_info.max_frame_size as usize),
                channel_count: Some(stream_info.channels),
                sample_rate: Some(stream_info.sample_rate),
                initialization_data: vec![metadata],
                ..Format::new(mime::AUDIO_FLAC)
            });
            log::debug!("FLAC stream info: {stream_info:?}");
            self.stream_info = Some(stream_info);
            return Ok(true);
        }

        // Further metadata blocks are headers; the first frame ends them.
        Ok(!is_audio_packet(packet))
    }

    pub(super) fn prepare_payload(&self, packet: &[u8]) -> Option<i64> {
        if !is_audio_packet(packet) {
            return None;
        }
        frame_block_size(packet).map(i64::from)
    }
}

fn is_audio_packet(packet: &[u8]) -> bool {
    packet.first() == Some(&AUDIO_PACKET_TYPE)
}

/// Samples in the FLAC frame starting `packet`, from its block size code.
fn frame_block_size(packet: &[u8]) -> Option<u32> {
    let block_size_key = *packet.get(2)? >> 4;
    match block_size_key {
        1 => Some(192),
        2..=5 => Some(576 << (block_size_key - 2)),
        6 | 7 => {
            // The block size follows the UTF-8 coded frame or sample number.
            let number_length = utf8_coded_length(*packet.get(FRAME_HEADER_SAMPLE_NUMBER_OFFSET)?)?;
            let at = FRAME_HEADER_SAMPLE_NUMBER_OFFSET + number_length;
            if block_size_key == 6 {
                Some(*packet.get(at)? as u32 + 1)
            } else {
                let bytes = packet.get(at..at + 2)?;
                Some(u16::from_be_bytes([bytes[0], bytes[1]]) as u32 + 1)
            }
        }
        8..=15 => Some(256 << (block_size_key - 8)),
        _ => None,
    }
}

/// Length in bytes of the UTF-8 style coded number starting with `first`.
fn utf8_coded_length(first: u8) -> Option<usize> {
    match first.leading_ones() {
        0 => Some(1),
        1 => None,
        n @ 2..=7 => Some(n as usize),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A mapping header for 44.1 kHz stereo 16-bit audio.
    pub(crate) fn mapping_header() -> Vec<u8> {
        let mut header = MAPPING_SIGNATURE.to_vec();
        header.extend_from_slice(&[1, 0, 0, 1]);
        header.extend_from_slice(b"fLaC");
        header.extend_from_slice(&[0x00, 0x00, 0x00, 0x22]);
        // Block sizes 4096/4096, frame sizes 14/3000.
        header.extend_from_slice(&[0x10, 0x00, 0x10, 0x00, 0x00, 0x00, 0x0E, 0x00, 0x0B, 0xB8]);
        // 44100 Hz, 2 channels, 16 bits, 441000 samples.
        header.extend_from_slice(&[0x0A, 0xC4, 0x42, 0xF0, 0x00, 0x06, 0xBA, 0xA8]);
        header.extend_from_slice(&[0; 16]);
        header
    }

    #[test]
    fn stream_info_fields() -> Result<()> {
        let header = mapping_header();
        let info = FlacStreamInfo::parse(&header[STREAM_INFO_OFFSET..])?;
        assert_eq!(info.max_block_size, 4096);
        assert_eq!(info.max_frame_size, 3000);
        assert_eq!(info.sample_rate, 44100);
        assert_eq!(info.channels, 2);
        assert_eq!(info.bits_per_sample, 16);
        assert_eq!(info.total_samples, 441_000);
        assert_eq!(info.duration_us(), Some(10_000_000));
        Ok(())
    }

    #[test]
    fn headers_and_block_sizes() -> Result<()> {
        let mut reader = FlacReader::default();
        let mut setup = SetupData::default();
        assert!(reader.read_headers(&mapping_header(), &mut setup)?);
        // VORBIS_COMMENT block.
        assert!(reader.read_headers(&[0x84, 0, 0, 0], &mut setup)?);
        assert!(!reader.read_headers(&[0xFF, 0xF8, 0xC9, 0x18, 0x00], &mut setup)?);

        let format = setup.format.expect("format");
        assert_eq!(format.initialization_data[0][..5], *b"fLaC\x80");
        assert_eq!(format.max_input_size, Some(3000));

        assert_eq!(reader.prepare_payload(&[0xFF, 0xF8, 0xC9, 0x18, 0x00]), Some(4096));
        assert_eq!(reader.prepare_payload(&[0xFF, 0xF8, 0x19, 0x18, 0x00]), Some(192));
        assert_eq!(reader.prepare_payload(&[0xFF, 0xF8, 0x59, 0x18, 0x00]), Some(4608));
        // Key 6 after a two byte coded number.
        assert_eq!(reader.prepare_payload(&[0xFF, 0xF8, 0x69, 0x18, 0xC2, 0x80, 0x3F]), Some(64));
        // Key 7 after a one byte coded number.
        assert_eq!(reader.prepare_payload(&[0xFF, 0xF8, 0x79, 0x18, 0x05, 0x01, 0x00]), Some(257));
        assert_eq!(reader.prepare_payload(&[0x84, 0, 0]), None);
        Ok(())
    }
}
