use crate::output::mime;
use crate::utils::bitstream_io::BsIoSliceReader;

/// Frame size is at most 2881 bytes (layer II, 8 kHz, 160 kbps, padded).
pub const MAX_FRAME_SIZE_BYTES: usize = 4096;

/// Bits that must be equal in the headers of two frames of one stream:
/// sync word, version, layer and sample rate.
const HEADER_MATCH_MASK: u32 = 0xFFFE_0C00;

const SYNC_WORD: u16 = 0x7FF;

const VERSION_2_5: u8 = 0;
const VERSION_2: u8 = 2;
const VERSION_1: u8 = 3;

const LAYER_3: u8 = 1;
const LAYER_2: u8 = 2;
const LAYER_1: u8 = 3;

const SAMPLING_RATE_V1: [u32; 3] = [44100, 48000, 32000];

const BITRATE_V1_L1: [u32; 14] = [
    32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448,
];
const BITRATE_V2_L1: [u32; 14] = [
    32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256,
];
const BITRATE_V1_L2: [u32; 14] = [
    32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384,
];
const BITRATE_V1_L3: [u32; 14] = [
    32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];
const BITRATE_V2: [u32; 14] = [
    8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160,
];

/// Fields of an MPEG audio frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpegAudioHeader {
    /// 3 for MPEG-1, 2 for MPEG-2, 0 for MPEG-2.5.
    pub version: u8,
    /// Layer number, 1 to 3.
    pub layer: u8,
    pub mime_type: &'static str,
    pub frame_size: usize,
    pub sample_rate: u32,
    pub channels: u32,
    /// Bits per second.
    pub bitrate: u32,
    pub samples_per_frame: u32,
}

#[derive(Debug)]
struct RawHeader {
    version: u8,
    layer: u8,
    bitrate_index: u8,
    sample_rate_index: u8,
    padding: bool,
    channel_mode: u8,
}

fn read_raw(header: u32) -> Option<RawHeader> {
    let bytes = header.to_be_bytes();
    let mut reader = BsIoSliceReader::from_slice(&bytes);

    let sync: u16 = reader.get_n(11).ok()?;
    if sync != SYNC_WORD {
        return None;
    }
    let version = reader.get_n(2).ok()?;
    let layer = reader.get_n(2).ok()?;
    reader.skip_n(1).ok()?; // protection
    let bitrate_index = reader.get_n(4).ok()?;
    let sample_rate_index = reader.get_n(2).ok()?;
    let padding = reader.get().ok()?;
    reader.skip_n(1).ok()?; // private
    let channel_mode = reader.get_n(2).ok()?;

    // Reserved version and layer, free format and bad bitrate, reserved rate.
    if version == 1 || layer == 0 || bitrate_index == 0 || bitrate_index == 0xF || sample_rate_index == 3 {
        return None;
    }

    Some(RawHeader {
        version,
        layer,
        bitrate_index,
        sample_rate_index,
        padding,
        channel_mode,
    })
}

/// Whether two frame headers belong to the same stream.
pub fn headers_match(a: u32, b: u32) -> bool {
    a & HEADER_MATCH_MASK == b & HEADER_MATCH_MASK
}

/// Size of the frame starting with `header`, or `None` if it is not a valid
/// frame header.
pub fn frame_size(header: u32) -> Option<usize> {
    MpegAudioHeader::parse(header).map(|h| h.frame_size)
}

impl MpegAudioHeader {
    pub fn parse(header: u32) -> Option<Self> {
        let raw = read_raw(header)?;

        let mut sample_rate = SAMPLING_RATE_V1[raw.sample_rate_index as usize];
        match raw.version {
            VERSION_2 => sample_rate /= 2,
            VERSION_2_5 => sample_rate /= 4,
            _ => {}
        }

        let index = raw.bitrate_index as usize - 1;
        let is_v1 = raw.version == VERSION_1;
        let bitrate_kbps = match (raw.layer, is_v1) {
            (LAYER_1, true) => BITRATE_V1_L1[index],
            (LAYER_1, false) => BITRATE_V2_L1[index],
            (LAYER_2, true) => BITRATE_V1_L2[index],
            (LAYER_3, true) => BITRATE_V1_L3[index],
            _ => BITRATE_V2[index],
        };
        let bitrate = bitrate_kbps * 1000;
        let padding = raw.padding as u32;

        let (frame_size, samples_per_frame, mime_type) = if raw.layer == LAYER_1 {
            ((12 * bitrate / sample_rate + padding) * 4, 384, mime::AUDIO_MPEG_L1)
        } else {
            let coefficient = if is_v1 || raw.layer == LAYER_2 { 144 } else { 72 };
            let samples_per_frame = if raw.layer == LAYER_2 || is_v1 { 1152 } else { 576 };
            let mime_type = if raw.layer == LAYER_2 {
                mime::AUDIO_MPEG_L2
            } else {
                mime::AUDIO_MPEG
            };
            (coefficient * bitrate / sample_rate + padding, samples_per_frame, mime_type)
        };

        Some(Self {
            version: raw.version,
            layer: 4 - raw.layer,
            mime_type,
            frame_size: frame_size as usize,
            sample_rate,
            channels: if raw.channel_mode == 3 { 1 } else { 2 },
            bitrate,
            samples_per_frame,
        })
    }

    pub fn is_mpeg1(&self) -> bool {
        self.version == VERSION_1
    }

    /// Offset of a Xing or Info tag within the first frame.
    pub fn xing_offset(&self) -> usize {
        match (self.is_mpeg1(), self.channels) {
            (true, 1) => 21,
            (true, _) => 36,
            (false, 1) => 13,
            (false, _) => 21,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// MPEG-1 layer III, 128 kbps, 44.1 kHz, stereo.
    pub(crate) const MPEG1_L3_128K: u32 = 0xFFFB_9000;

    #[test]
    fn mpeg1_layer3() {
        let header = MpegAudioHeader::parse(MPEG1_L3_128K).expect("valid header");
        assert_eq!(header.mime_type, mime::AUDIO_MPEG);
        assert_eq!(header.bitrate, 128_000);
        assert_eq!(header.sample_rate, 44100);
        assert_eq!(header.channels, 2);
        assert_eq!(header.frame_size, 417);
        assert_eq!(header.samples_per_frame, 1152);
        assert_eq!(header.layer, 3);
        assert_eq!(header.xing_offset(), 36);

        // Padding bit.
        assert_eq!(frame_size(MPEG1_L3_128K | 0x200), Some(418));
    }

    #[test]
    fn other_versions_and_layers() {
        // MPEG-2 layer III, 64 kbps, 22.05 kHz, mono.
        let header = MpegAudioHeader::parse(0xFFF3_80C0).expect("valid header");
        assert_eq!(header.sample_rate, 22050);
        assert_eq!(header.bitrate, 64_000);
        assert_eq!(header.channels, 1);
        assert_eq!(header.samples_per_frame, 576);
        assert_eq!(header.frame_size, 72 * 64_000 / 22050);
        assert_eq!(header.xing_offset(), 13);

        // MPEG-1 layer I, 32 kbps, 32 kHz.
        let header = MpegAudioHeader::parse(0xFFFF_1800).expect("valid header");
        assert_eq!(header.mime_type, mime::AUDIO_MPEG_L1);
        assert_eq!(header.frame_size, 48);
        assert_eq!(header.samples_per_frame, 384);

        // MPEG-1 layer II, 384 kbps, 48 kHz.
        let header = MpegAudioHeader::parse(0xFFFD_E400).expect("valid header");
        assert_eq!(header.mime_type, mime::AUDIO_MPEG_L2);
        assert_eq!(header.frame_size, 1152);
    }

    #[test]
    fn rejects_invalid_headers() {
        assert_eq!(frame_size(0x0000_0000), None);
        // Free format bitrate.
        assert_eq!(frame_size(0xFFFB_0000), None);
        // Reserved sample rate.
        assert_eq!(frame_size(0xFFFB_9C00), None);
        // Reserved version.
        assert_eq!(frame_size(0xFFEB_9000), None);

        assert!(headers_match(MPEG1_L3_128K, MPEG1_L3_128K | 0x200 | 0xF000));
        assert!(!headers_match(MPEG1_L3_128K, 0xFFFB_9400));
    }
}
