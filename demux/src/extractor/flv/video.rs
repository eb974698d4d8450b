use anyhow::{bail, ensure, Result};

use crate::output::{mime, Format, SampleFlags, TrackHandle, TrackOutput};
use crate::utils::codec::{parse_avc_config, NAL_START_CODE};
use crate::utils::errors::{CodecError, FlvError};

const VIDEO_CODEC_AVC: u8 = 7;

const VIDEO_FRAME_KEYFRAME: u8 = 1;
const VIDEO_FRAME_VIDEO_INFO: u8 = 5;

const AVC_PACKET_TYPE_SEQUENCE_HEADER: u8 = 0;
const AVC_PACKET_TYPE_AVC_NALU: u8 = 1;

/// Reads the payload of FLV video tags carrying H.264.
#[derive(Debug)]
pub(super) struct VideoTagReader {
    pub(super) track: TrackHandle,
    nal_unit_length_field_length: usize,
    has_output_format: bool,
    has_output_keyframe: bool,
    frame_type: u8,
    sample: Vec<u8>,
}

impl VideoTagReader {
    pub(super) fn new(track: TrackHandle) -> Self {
        Self {
            track,
            nal_unit_length_field_length: 0,
            has_output_format: false,
            has_output_keyframe: false,
            frame_type: 0,
            sample: Vec::new(),
        }
    }

    pub(super) fn seek(&mut self) {
        self.has_output_keyframe = false;
    }

    /// Returns whether a sample was written.
    pub(super) fn consume(
        &mut self,
        data: &[u8],
        time_us: i64,
        output: &mut dyn TrackOutput,
    ) -> Result<bool> {
        let Some((&header, payload)) = data.split_first() else {
            return Ok(false);
        };

        let codec = header & 0x0F;
        if codec != VIDEO_CODEC_AVC {
            bail!(CodecError::UnsupportedFormat(format!("FLV video codec {codec}")));
        }
        self.frame_type = (header >> 4) & 0x0F;
        if self.frame_type == VIDEO_FRAME_VIDEO_INFO {
            return Ok(false);
        }

        self.parse_payload(payload, time_us, output)
    }

    fn parse_payload(
        &mut self,
        payload: &[u8],
        time_us: i64,
        output: &mut dyn TrackOutput,
    ) -> Result<bool> {
        ensure!(payload.len() >= 4, FlvError::TagTooShort(payload.len()));
        let packet_type = payload[0];
        // Signed 24-bit composition time offset in milliseconds.
        let composition_time_ms = i32::from_be_bytes([payload[1], payload[2], payload[3], 0]) >> 8;
        let time_us = time_us + composition_time_ms as i64 * 1000;
        let payload = &payload[4..];

        if packet_type == AVC_PACKET_TYPE_SEQUENCE_HEADER && !self.has_output_format {
            let config = parse_avc_config(payload)?;
            self.nal_unit_length_field_length = config.nal_unit_length_field_length;
            output.format(&Format {
                codecs: config.codecs,
                width: config.width,
                height: config.height,
                pixel_width_height_ratio: Some(config.pixel_width_height_ratio),
                initialization_data: config.initialization_data,
                ..Format::new(mime::VIDEO_H264)
            });
            self.has_output_format = true;
            return Ok(false);
        }

        if packet_type != AVC_PACKET_TYPE_AVC_NALU || !self.has_output_format {
            return Ok(false);
        }

        let is_keyframe = self.frame_type == VIDEO_FRAME_KEYFRAME;
        if !self.has_output_keyframe && !is_keyframe {
            return Ok(false);
        }

        self.to_annex_b(payload)?;
        output.sample_data(&self.sample);
        let flags = if is_keyframe {
            SampleFlags::KEY_FRAME
        } else {
            SampleFlags::NONE
        };
        output.sample_metadata(time_us, flags, self.sample.len(), 0, None);
        self.has_output_keyframe = true;
        Ok(true)
    }

    /// Replaces NAL unit length prefixes with start codes.
    fn to_annex_b(&mut self, mut payload: &[u8]) -> Result<()> {
        let length_size = self.nal_unit_length_field_length;
        self.sample.clear();

        while !payload.is_empty() {
            ensure!(payload.len() >= length_size, FlvError::TagTooShort(payload.len()));
            let (length, rest) = payload.split_at(length_size);
            let length = length
                .iter()
                .fold(0usize, |acc, &byte| (acc << 8) | byte as usize);
            ensure!(rest.len() >= length, FlvError::TagTooShort(rest.len()));

            self.sample.extend_from_slice(&NAL_START_CODE);
            self.sample.extend_from_slice(&rest[..length]);
            payload = &rest[length..];
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{ExtractorOutput, MediaType, SampleCollector};

    const SPS: [u8; 8] = [0x67, 0x42, 0xC0, 0x0D, 0xF4, 0x0A, 0x0F, 0xC8];

    fn sequence_header() -> Vec<u8> {
        let mut tag = vec![0x17, AVC_PACKET_TYPE_SEQUENCE_HEADER, 0, 0, 0];
        tag.extend_from_slice(&[0x01, 0x42, 0xC0, 0x0D, 0xFF, 0xE1, 0x00, SPS.len() as u8]);
        tag.extend_from_slice(&SPS);
        tag.extend_from_slice(&[0x01, 0x00, 0x02, 0x68, 0xCE]);
        tag
    }

    #[test]
    fn frames_before_keyframe_are_dropped() -> Result<()> {
        let mut collector = SampleCollector::new();
        let handle = collector.track(9, MediaType::Video);
        let mut reader = VideoTagReader::new(handle);

        assert!(!reader.consume(&sequence_header(), 0, collector.track_output(handle))?);

        let inter = [0x27, 1, 0, 0, 0, 0, 0, 0, 1, 0x41];
        assert!(!reader.consume(&inter, 0, collector.track_output(handle))?);

        // Keyframe with a composition offset of -1 ms and two NAL units.
        let key = [0x17, 1, 0xFF, 0xFF, 0xFF, 0, 0, 0, 1, 0x65, 0, 0, 0, 2, 0x06, 0x07];
        assert!(reader.consume(&key, 40_000, collector.track_output(handle))?);
        assert!(reader.consume(&inter, 80_000, collector.track_output(handle))?);

        let track = &collector.tracks[0];
        assert_eq!(track.format.as_ref().and_then(|f| f.width), Some(320));
        assert_eq!(track.samples.len(), 2);
        assert_eq!(track.samples[0].time_us, 39_000);
        assert_eq!(track.samples[0].flags, SampleFlags::KEY_FRAME);
        assert_eq!(
            track.samples[0].data,
            vec![0, 0, 0, 1, 0x65, 0, 0, 0, 1, 0x06, 0x07]
        );
        assert_eq!(track.samples[1].flags, SampleFlags::NONE);
        Ok(())
    }
}
