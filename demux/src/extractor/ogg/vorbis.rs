use anyhow::{bail, ensure, Result};

use super::reader::SetupData;
use crate::output::{mime, Format};
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::OggError;

const PACKET_TYPE_IDENTIFICATION: u8 = 0x01;
const PACKET_TYPE_COMMENT: u8 = 0x03;
const PACKET_TYPE_SETUP: u8 = 0x05;

const VORBIS_SIGNATURE: &[u8; 6] = b"vorbis";
const MAX_MODE_COUNT: usize = 64;
const MIN_MODE_SCAN_BITS: u64 = 97;

/// Vorbis identification header (Vorbis I 4.2.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VorbisIdHeader {
    pub version: u32,
    pub channels: u8,
    pub sample_rate: u32,
    pub bitrate_maximum: i32,
    pub bitrate_nominal: i32,
    pub bitrate_minimum: i32,
    pub block_size_0: u32,
    pub block_size_1: u32,
    pub framing_flag: bool,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VorbisComments {
    pub vendor: String,
    pub comments: Vec<String>,
}

#[derive(Debug)]
struct VorbisSetup {
    id_header: VorbisIdHeader,
    /// Block flag of every mode.
    mode_block_flags: Vec<bool>,
    mode_bits: u32,
}

#[derive(Debug, Default)]
pub struct VorbisReader {
    id_header: Option<VorbisIdHeader>,
    comments: Option<VorbisComments>,
    setup: Option<VorbisSetup>,
    previous_packet_block_size: u32,
    seen_first_audio_packet: bool,
}

impl VorbisReader {
    pub fn verify_bitstream_type(data: &[u8]) -> bool {
        verify_capture_pattern(PACKET_TYPE_IDENTIFICATION, data)
    }

    pub(super) fn reset(&mut self, header_data: bool) {
        if header_data {
            self.id_header = None;
            self.comments = None;
            self.setup = None;
        }
        self.previous_packet_block_size = 0;
        self.seen_first_audio_packet = false;
    }

    pub(super) fn on_seek_end(&mut self, current_granule: i64) {
        self.seen_first_audio_packet = current_granule != 0;
        self.previous_packet_block_size = self
            .setup
            .as_ref()
            .map_or(0, |setup| setup.id_header.block_size_0);
    }

    pub(super) fn read_headers(&mut self, packet: &[u8], setup: &mut SetupData) -> Result<bool> {
        if self.setup.is_some() {
            return Ok(false);
        }

        let Some(id_header) = self.id_header.as_ref() else {
            self.id_header = Some(read_id_header(packet)?);
            return Ok(true);
        };

        if self.comments.is_none() {
            let comments = read_comment_header(packet)?;
            log::debug!(
                "Vorbis vendor {:?}, {} comments",
                comments.vendor,
                comments.comments.len()
            );
            self.comments = Some(comments);
            return Ok(true);
        }

        ensure!(
            verify_capture_pattern(PACKET_TYPE_SETUP, packet),
            OggError::InvalidHeader("Vorbis setup")
        );
        let mode_block_flags = read_mode_block_flags(packet)?;
        let mode_bits = ilog(mode_block_flags.len() as u32 - 1);

        setup.format = Some(Format {
            average_bitrate: positive(id_header.bitrate_nominal),
            peak_bitrate: positive(id_header.bitrate_maximum),
            channel_count: Some(id_header.channels as u32),
            sample_rate: Some(id_header.sample_rate),
            initialization_data: vec![id_header.data.clone(), packet.to_vec()],
            ..Format::new(mime::AUDIO_VORBIS)
        });
        self.setup = Some(VorbisSetup {
            id_header: id_header.clone(),
            mode_block_flags,
            mode_bits,
        });
        Ok(true)
    }

    /// Samples in the audio packet, appended to the packet as a little-endian
    /// `u32` for the decoder. `None` for non-audio packets.
    pub(super) fn prepare_payload(&mut self, packet: &mut Vec<u8>) -> Option<i64> {
        let first = *packet.first()?;
        if first & 0x01 == 1 {
            return None;
        }
        let setup = self.setup.as_ref()?;

        let mode = ((first >> 1) as u32 & ((1u32 << setup.mode_bits) - 1)) as usize;
        let block_size = match setup.mode_block_flags.get(mode) {
            Some(true) => setup.id_header.block_size_1,
            _ => setup.id_header.block_size_0,
        };
        let samples = if self.seen_first_audio_packet {
            (block_size + self.previous_packet_block_size) / 4
        } else {
            0
        };

        packet.extend_from_slice(&samples.to_le_bytes());
        self.seen_first_audio_packet = true;
        self.previous_packet_block_size = block_size;
        Some(samples as i64)
    }
}

fn positive(value: i32) -> Option<u32> {
    (value > 0).then_some(value as u32)
}

/// Number of bits needed to represent `value`.
fn ilog(value: u32) -> u32 {
    u32::BITS - value.leading_zeros()
}

fn verify_capture_pattern(header_type: u8, data: &[u8]) -> bool {
    data.len() >= 7 && data[0] == header_type && &data[1..7] == VORBIS_SIGNATURE
}

fn le_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

pub fn read_id_header(packet: &[u8]) -> Result<VorbisIdHeader> {
    ensure!(
        packet.len() >= 30 && verify_capture_pattern(PACKET_TYPE_IDENTIFICATION, packet),
        OggError::InvalidHeader("Vorbis identification")
    );

    let block_sizes = packet[28];
    Ok(VorbisIdHeader {
        version: le_u32(packet, 7),
        channels: packet[11],
        sample_rate: le_u32(packet, 12),
        bitrate_maximum: le_u32(packet, 16) as i32,
        bitrate_nominal: le_u32(packet, 20) as i32,
        bitrate_minimum: le_u32(packet, 24) as i32,
        block_size_0: 1 << (block_sizes & 0x0F),
        block_size_1: 1 << ((block_sizes >> 4) & 0x0F),
        framing_flag: packet[29] & 0x01 != 0,
        data: packet.to_vec(),
    })
}

pub fn read_comment_header(packet: &[u8]) -> Result<VorbisComments> {
    ensure!(
        verify_capture_pattern(PACKET_TYPE_COMMENT, packet),
        OggError::InvalidHeader("Vorbis comment")
    );

    let mut offset = 7;
    let read_string = |offset: &mut usize| -> Result<String> {
        let length = packet
            .get(*offset..*offset + 4)
            .map(|_| le_u32(packet, *offset) as usize)
            .ok_or(OggError::InvalidHeader("Vorbis comment"))?;
        *offset += 4;
        let bytes = packet
            .get(*offset..*offset + length)
            .ok_or(OggError::InvalidHeader("Vorbis comment"))?;
        *offset += length;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    };

    let vendor = read_string(&mut offset)?;
    let count = packet
        .get(offset..offset + 4)
        .map(|_| le_u32(packet, offset))
        .ok_or(OggError::InvalidHeader("Vorbis comment"))?;
    offset += 4;

    let mut comments = Vec::with_capacity(count.min(256) as usize);
    for _ in 0..count {
        comments.push(read_string(&mut offset)?);
    }
    Ok(VorbisComments { vendor, comments })
}

/// Recovers the block flag of each mode by reading the setup header
/// backwards from its framing bit.
///
/// The mode table sits at the end of the setup header, so its entries can be
/// found without decoding the codebooks, floors and residues before it.
/// Each mode read backwards is a mapping (8 bits, at most 63), a transform
/// type (16 bits, zero), a window type (16 bits, zero) and the block flag.
pub fn read_mode_block_flags(setup_header: &[u8]) -> Result<Vec<bool>> {
    let reversed: Vec<u8> = setup_header.iter().rev().copied().collect();
    let mut reader = BsIoSliceReader::from_slice(&reversed);

    let mut framing_bits = None;
    while reader.available()? > MIN_MODE_SCAN_BITS {
        if reader.get()? {
            framing_bits = Some(reader.position()?);
            break;
        }
    }
    let Some(framing_bits) = framing_bits else {
        bail!(OggError::MissingVorbisModes);
    };

    let mut mode_count = 0;
    let mut last_mode_count = None;
    while reader.available()? >= MIN_MODE_SCAN_BITS {
        let mapping: u32 = reader.get_n(8)?;
        if mapping > 63 || reader.get_n::<u32>(16)? != 0 || reader.get_n::<u32>(16)? != 0 {
            break;
        }
        reader.skip_n(1)?;
        mode_count += 1;
        if mode_count > MAX_MODE_COUNT {
            break;
        }

        let declared: u32 = reader.get_n(6)?;
        reader.seek(-6)?;
        if declared as usize + 1 == mode_count {
            last_mode_count = Some(mode_count);
        }
    }
    let Some(mode_count) = last_mode_count else {
        bail!(OggError::MissingVorbisModes);
    };
    if mode_count > 2 {
        log::debug!("Vorbis mode scan found {mode_count} modes");
    }

    let mut reader = BsIoSliceReader::from_slice(&reversed);
    reader.skip_n(framing_bits as u32)?;
    let mut flags = vec![false; mode_count];
    for flag in flags.iter_mut().rev() {
        reader.skip_n(40)?;
        *flag = reader.get()?;
    }
    Ok(flags)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn id_header(channels: u8, sample_rate: u32) -> Vec<u8> {
        let mut header = vec![PACKET_TYPE_IDENTIFICATION];
        header.extend_from_slice(VORBIS_SIGNATURE);
        header.extend_from_slice(&0u32.to_le_bytes());
        header.push(channels);
        header.extend_from_slice(&sample_rate.to_le_bytes());
        header.extend_from_slice(&0i32.to_le_bytes());
        header.extend_from_slice(&128_000i32.to_le_bytes());
        header.extend_from_slice(&0i32.to_le_bytes());
        header.push(0xB8); // 256 and 2048 sample blocks
        header.push(0x01);
        header
    }

    pub(crate) fn comment_header() -> Vec<u8> {
        let mut header = vec![PACKET_TYPE_COMMENT];
        header.extend_from_slice(VORBIS_SIGNATURE);
        header.extend_from_slice(&4u32.to_le_bytes());
        header.extend_from_slice(b"test");
        header.extend_from_slice(&1u32.to_le_bytes());
        header.extend_from_slice(&9u32.to_le_bytes());
        header.extend_from_slice(b"TITLE=abc");
        header.push(0x01);
        header
    }

    /// Packs Vorbis bit fields LSB first.
    struct LsbWriter {
        data: Vec<u8>,
        bits: usize,
    }

    impl LsbWriter {
        fn write(&mut self, value: u32, count: usize) {
            for i in 0..count {
                if self.bits % 8 == 0 {
                    self.data.push(0);
                }
                if (value >> i) & 1 == 1 {
                    let last = self.data.len() - 1;
                    self.data[last] |= 1 << (self.bits % 8);
                }
                self.bits += 1;
            }
        }
    }

    /// A setup header whose mode table holds `block_flags`, preceded by
    /// filler standing in for codebooks, floors and residues.
    pub(crate) fn setup_header(block_flags: &[bool]) -> Vec<u8> {
        let mut writer = LsbWriter {
            data: vec![PACKET_TYPE_SETUP],
            bits: 8,
        };
        for &byte in VORBIS_SIGNATURE {
            writer.write(byte as u32, 8);
        }
        for _ in 0..16 {
            writer.write(0xA5, 8);
        }

        writer.write(block_flags.len() as u32 - 1, 6);
        for (i, &flag) in block_flags.iter().enumerate() {
            writer.write(flag as u32, 1);
            writer.write(0, 16);
            writer.write(0, 16);
            writer.write(i as u32 % 2, 8);
        }
        writer.write(1, 1);
        writer.data
    }

    #[test]
    fn mode_flags_from_setup_header() -> Result<()> {
        assert_eq!(read_mode_block_flags(&setup_header(&[false, true]))?, vec![false, true]);
        assert_eq!(
            read_mode_block_flags(&setup_header(&[true, false, false, true]))?,
            vec![true, false, false, true]
        );
        Ok(())
    }

    #[test]
    fn headers_and_packet_durations() -> Result<()> {
        let mut reader = VorbisReader::default();
        let mut setup = SetupData::default();

        assert!(reader.read_headers(&id_header(2, 44100), &mut setup)?);
        assert!(reader.read_headers(&comment_header(), &mut setup)?);
        assert!(reader.read_headers(&setup_header(&[false, true]), &mut setup)?);
        assert!(!reader.read_headers(&[0x00], &mut setup)?);

        let format = setup.format.expect("format");
        assert_eq!(format.sample_rate, Some(44100));
        assert_eq!(format.average_bitrate, Some(128_000));
        assert_eq!(format.peak_bitrate, None);
        assert_eq!(reader.comments.as_ref().map(|c| c.comments.len()), Some(1));

        // Mode 0 (short), then mode 1 (long), then mode 0.
        let mut packet = vec![0x00, 0xAA];
        assert_eq!(reader.prepare_payload(&mut packet), Some(0));
        assert_eq!(packet, vec![0x00, 0xAA, 0, 0, 0, 0]);
        assert_eq!(reader.prepare_payload(&mut vec![0x02]), Some((2048 + 256) / 4));
        assert_eq!(reader.prepare_payload(&mut vec![0x00]), Some((256 + 2048) / 4));
        assert_eq!(reader.prepare_payload(&mut vec![0x01]), None);
        Ok(())
    }
}
