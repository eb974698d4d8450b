use anyhow::{bail, Result};

use crate::output::{mime, Format, SampleFlags, TrackHandle, TrackOutput};
use crate::utils::codec::parse_audio_specific_config;
use crate::utils::errors::CodecError;

const AUDIO_FORMAT_MP3: u8 = 2;
const AUDIO_FORMAT_ALAW: u8 = 7;
const AUDIO_FORMAT_ULAW: u8 = 8;
const AUDIO_FORMAT_AAC: u8 = 10;

const AAC_PACKET_TYPE_SEQUENCE_HEADER: u8 = 0;
const AAC_PACKET_TYPE_AAC_RAW: u8 = 1;

const AUDIO_SAMPLING_RATES: [u32; 4] = [5512, 11025, 22050, 44100];

/// Reads the payload of FLV audio tags.
#[derive(Debug)]
pub(super) struct AudioTagReader {
    pub(super) track: TrackHandle,
    has_parsed_audio_data_header: bool,
    has_output_format: bool,
    audio_format: u8,
}

impl AudioTagReader {
    pub(super) fn new(track: TrackHandle) -> Self {
        Self {
            track,
            has_parsed_audio_data_header: false,
            has_output_format: false,
            audio_format: 0,
        }
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
        self.parse_header(header, output)?;
        self.parse_payload(payload, time_us, output)
    }

    fn parse_header(&mut self, header: u8, output: &mut dyn TrackOutput) -> Result<()> {
        if self.has_parsed_audio_data_header {
            return Ok(());
        }

        self.audio_format = (header >> 4) & 0x0F;
        match self.audio_format {
            AUDIO_FORMAT_MP3 => {
                let sample_rate = AUDIO_SAMPLING_RATES[((header >> 2) & 0x03) as usize];
                output.format(&Format {
                    channel_count: Some(1),
                    sample_rate: Some(sample_rate),
                    ..Format::new(mime::AUDIO_MPEG)
                });
                self.has_output_format = true;
            }
            AUDIO_FORMAT_ALAW | AUDIO_FORMAT_ULAW => {
                let mime_type = if self.audio_format == AUDIO_FORMAT_ALAW {
                    mime::AUDIO_ALAW
                } else {
                    mime::AUDIO_MLAW
                };
                output.format(&Format {
                    channel_count: Some(1),
                    sample_rate: Some(8000),
                    ..Format::new(mime_type)
                });
                self.has_output_format = true;
            }
            AUDIO_FORMAT_AAC => {}
            other => bail!(CodecError::UnsupportedFormat(format!(
                "FLV audio format {other}"
            ))),
        }

        self.has_parsed_audio_data_header = true;
        Ok(())
    }

    fn parse_payload(
        &mut self,
        payload: &[u8],
        time_us: i64,
        output: &mut dyn TrackOutput,
    ) -> Result<bool> {
        if self.audio_format != AUDIO_FORMAT_AAC {
            write_sample(payload, time_us, output);
            return Ok(true);
        }

        let Some((&packet_type, payload)) = payload.split_first() else {
            return Ok(false);
        };

        if packet_type == AAC_PACKET_TYPE_SEQUENCE_HEADER && !self.has_output_format {
            let config = parse_audio_specific_config(payload)?;
            output.format(&Format {
                codecs: Some(config.codecs),
                channel_count: Some(config.channel_count),
                sample_rate: Some(config.sample_rate),
                initialization_data: vec![payload.to_vec()],
                ..Format::new(mime::AUDIO_AAC)
            });
            self.has_output_format = true;
            Ok(false)
        } else if packet_type == AAC_PACKET_TYPE_AAC_RAW {
            write_sample(payload, time_us, output);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

fn write_sample(payload: &[u8], time_us: i64, output: &mut dyn TrackOutput) {
    output.sample_data(payload);
    output.sample_metadata(time_us, SampleFlags::KEY_FRAME, payload.len(), 0, None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{ExtractorOutput, MediaType, SampleCollector};

    #[test]
    fn aac_sequence_header_sets_format() -> Result<()> {
        let mut collector = SampleCollector::new();
        let handle = collector.track(8, MediaType::Audio);
        let mut reader = AudioTagReader::new(handle);

        let header = 0xAF;
        let wrote = reader.consume(&[header, 0, 0x12, 0x10], 0, collector.track_output(handle))?;
        assert!(!wrote);
        let wrote = reader.consume(&[header, 1, 0xDE, 0xAD], 23_000, collector.track_output(handle))?;
        assert!(wrote);

        let track = &collector.tracks[0];
        let format = track.format.as_ref().expect("format");
        assert_eq!(format.sample_mime_type, mime::AUDIO_AAC);
        assert_eq!(format.sample_rate, Some(44100));
        assert_eq!(track.samples[0].data, vec![0xDE, 0xAD]);
        assert_eq!(track.samples[0].time_us, 23_000);
        Ok(())
    }

    #[test]
    fn unsupported_codec_is_reported() {
        let mut collector = SampleCollector::new();
        let handle = collector.track(8, MediaType::Audio);
        let mut reader = AudioTagReader::new(handle);

        // Format 6 (Nellymoser).
        let err = reader
            .consume(&[0x60, 1, 2], 0, collector.track_output(handle))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CodecError>(),
            Some(CodecError::UnsupportedFormat(_))
        ));
    }
}
