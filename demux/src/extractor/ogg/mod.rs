//! Ogg container carrying a single Opus, Vorbis or FLAC bitstream.

use anyhow::{bail, Result};
use log::Level;

use super::{Extractor, ReadResult};
use crate::input::ExtractorInput;
use crate::output::{ExtractorOutput, MediaType};
use crate::utils::errors::OggError;

mod flac;
mod opus;
mod packet;
mod page;
mod reader;
mod seeker;
mod vorbis;

pub use page::OggPageHeader;

use page::PAGE_TYPE_BOS;
use reader::{CodecReader, StreamReader};

/// Bytes of the first packet needed to tell the codecs apart.
const SNIFF_SIZE: usize = 8;

const AUDIO_TRACK_ID: u32 = 0;

#[derive(Debug)]
pub struct OggExtractor {
    stream_reader: Option<StreamReader>,
    sniffed_codec: Option<CodecReader>,
    tracks_registered: bool,
    fail_level: Level,
}

impl Default for OggExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl OggExtractor {
    pub fn new() -> Self {
        Self {
            stream_reader: None,
            sniffed_codec: None,
            tracks_registered: false,
            fail_level: Level::Error,
        }
    }

    pub fn set_fail_level(&mut self, level: Level) {
        self.fail_level = level;
    }

    /// Name of the codec found in the stream, once known.
    pub fn codec_name(&self) -> Option<&'static str> {
        self.sniffed_codec.as_ref().map(CodecReader::name).or_else(|| {
            self.stream_reader
                .as_ref()
                .map(|reader| reader.codec_name())
        })
    }

    fn sniff_internal(&mut self, input: &mut dyn ExtractorInput) -> Result<bool> {
        let mut header = OggPageHeader::default();
        if !header.populate(input, true)? || header.page_type & PAGE_TYPE_BOS == 0 {
            return Ok(false);
        }

        let length = header.body_size.min(SNIFF_SIZE);
        let mut scratch = [0u8; SNIFF_SIZE];
        input.peek_fully(&mut scratch[..length], false)?;

        self.sniffed_codec = CodecReader::detect(&scratch[..length]);
        if let Some(codec) = self.sniffed_codec.as_ref() {
            log::debug!("Ogg bitstream carries {}", codec.name());
        }
        Ok(self.sniffed_codec.is_some())
    }
}

impl Extractor for OggExtractor {
    fn sniff(&mut self, input: &mut dyn ExtractorInput) -> Result<bool> {
        match self.sniff_internal(input) {
            Ok(found) => Ok(found),
            Err(e) => {
                log::trace!("Ogg sniff: {e}");
                Ok(false)
            }
        }
    }

    fn init(&mut self, _output: &mut dyn ExtractorOutput) -> Result<()> {
        Ok(())
    }

    fn read(
        &mut self,
        input: &mut dyn ExtractorInput,
        output: &mut dyn ExtractorOutput,
    ) -> Result<ReadResult> {
        if self.stream_reader.is_none() {
            if self.sniffed_codec.is_none() {
                let found = self.sniff_internal(input)?;
                input.reset_peek_position();
                if !found {
                    bail!(OggError::UnknownBitstream);
                }
            }
            let Some(codec) = self.sniffed_codec.take() else {
                bail!(OggError::UnknownBitstream);
            };

            let track = output.track(AUDIO_TRACK_ID, MediaType::Audio);
            if !self.tracks_registered {
                output.end_tracks();
                self.tracks_registered = true;
            }
            self.stream_reader = Some(StreamReader::new(codec, track, self.fail_level));
        }

        match self.stream_reader.as_mut() {
            Some(reader) => reader.read(input, output),
            None => bail!(OggError::UnknownBitstream),
        }
    }

    fn seek(&mut self, position: u64, time_us: i64) {
        if let Some(reader) = self.stream_reader.as_mut() {
            reader.seek(position, time_us);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::input::tests::ChunkedReader;
    use crate::input::StreamInput;
    use crate::output::{mime, SampleCollector};
    use page::tests::page_with_packets;
    use page::PAGE_TYPE_EOS;

    const CELT_20MS: u8 = 31 << 3;

    fn opus_stream() -> Vec<u8> {
        let mut data = page_with_packets(PAGE_TYPE_BOS, 0, 0, &[&opus::tests::id_header(2, 312)]);
        data.extend_from_slice(&page_with_packets(0, 0, 1, &[b"OpusTags\0\0\0\0\0\0\0\0"]));
        data.extend_from_slice(&page_with_packets(0, 1920, 2, &[&[CELT_20MS, 1], &[CELT_20MS, 2]]));
        data.extend_from_slice(&page_with_packets(PAGE_TYPE_EOS, 2880, 3, &[&[CELT_20MS, 3]]));
        data
    }

    fn input_at(data: &[u8], position: u64) -> StreamInput<Cursor<Vec<u8>>> {
        let mut cursor = Cursor::new(data.to_vec());
        cursor.set_position(position);
        StreamInput::new(cursor, position, Some(data.len() as u64))
    }

    /// Reads until the end of input, following seeks requested by the extractor.
    fn drive(
        extractor: &mut OggExtractor,
        data: &[u8],
        position: u64,
        output: &mut SampleCollector,
    ) -> Result<usize> {
        let mut input = input_at(data, position);
        let mut seeks = 0;
        loop {
            match extractor.read(&mut input, output)? {
                ReadResult::Continue => {}
                ReadResult::Seek(position) => {
                    input = input_at(data, position);
                    seeks += 1;
                }
                ReadResult::EndOfInput => return Ok(seeks),
            }
        }
    }

    fn times(output: &SampleCollector) -> Vec<i64> {
        let track = output.track_by_id(AUDIO_TRACK_ID).expect("audio track");
        track.samples.iter().map(|s| s.time_us).collect()
    }

    #[test]
    fn sniff_needs_known_codec_in_first_page() -> Result<()> {
        let data = opus_stream();
        let mut extractor = OggExtractor::new();
        assert!(extractor.sniff(&mut input_at(&data, 0))?);
        assert_eq!(extractor.codec_name(), Some("Opus"));

        let unknown = page_with_packets(PAGE_TYPE_BOS, 0, 0, &[b"Speex   "]);
        assert!(!OggExtractor::new().sniff(&mut input_at(&unknown, 0))?);

        let not_first = page_with_packets(0, 0, 0, &[&opus::tests::id_header(2, 0)]);
        assert!(!OggExtractor::new().sniff(&mut input_at(&not_first, 0))?);
        Ok(())
    }

    #[test]
    fn opus_stream_with_duration_from_last_page() -> Result<()> {
        let data = opus_stream();
        let mut extractor = OggExtractor::new();
        let mut output = SampleCollector::new();
        extractor.init(&mut output)?;

        // One seek towards the last page and one back.
        assert_eq!(drive(&mut extractor, &data, 0, &mut output)?, 1);
        assert!(output.tracks_ended());

        let seek_map = output.seek_map.clone().expect("seek map");
        assert!(seek_map.is_seekable());
        assert_eq!(seek_map.duration_us(), Some(60_000));

        let track = output.track_by_id(AUDIO_TRACK_ID).expect("audio track");
        let format = track.format.as_ref().expect("format");
        assert_eq!(format.sample_mime_type, mime::AUDIO_OPUS);
        assert_eq!(format.channel_count, Some(2));
        assert_eq!(format.encoder_delay, 312);
        assert_eq!(times(&output), vec![0, 20_000, 40_000]);
        assert_eq!(track.samples[2].data, vec![CELT_20MS, 3]);
        Ok(())
    }

    #[test]
    fn seek_skips_packets_before_target() -> Result<()> {
        let data = opus_stream();
        let mut extractor = OggExtractor::new();
        let mut output = SampleCollector::new();
        drive(&mut extractor, &data, 0, &mut output)?;
        output.clear_samples();

        let seek_map = output.seek_map.clone().expect("seek map");
        let point = seek_map.seek_points(30_000).first;
        extractor.seek(point.position, 30_000);
        drive(&mut extractor, &data, point.position, &mut output)?;

        assert_eq!(times(&output), vec![20_000, 40_000]);
        Ok(())
    }

    #[test]
    fn seek_bisects_long_stream() -> Result<()> {
        let mut data = page_with_packets(PAGE_TYPE_BOS, 0, 0, &[&opus::tests::id_header(1, 0)]);
        data.extend_from_slice(&page_with_packets(0, 0, 1, &[b"OpusTags\0\0\0\0\0\0\0\0"]));
        // 400 pages of one 20 ms packet each, about 1 KB per page.
        for i in 0..400u32 {
            let mut packet = vec![0x55u8; 1000];
            packet[0] = CELT_20MS;
            let page_type = if i == 399 { PAGE_TYPE_EOS } else { 0 };
            data.extend_from_slice(&page_with_packets(page_type, 960 * (i as i64 + 1), i + 2, &[&packet]));
        }
        assert!(data.len() > 400_000);

        let mut extractor = OggExtractor::new();
        let mut output = SampleCollector::new();
        drive(&mut extractor, &data, 0, &mut output)?;
        assert_eq!(output.seek_map.as_ref().and_then(|m| m.duration_us()), Some(8_000_000));
        output.clear_samples();

        // Start near the end so the first page seen lies far past the target.
        let far = data.len() as u64 - 50_000;
        extractor.seek(far, 5_000_000);
        assert!(drive(&mut extractor, &data, far, &mut output)? >= 1);

        let times = times(&output);
        assert_eq!(times.first(), Some(&5_000_000));
        assert_eq!(times.len(), 150);
        Ok(())
    }

    #[test]
    fn vorbis_stream_of_unknown_length() -> Result<()> {
        let mut data = page_with_packets(PAGE_TYPE_BOS, 0, 0, &[&vorbis::tests::id_header(1, 44100)]);
        data.extend_from_slice(&page_with_packets(
            0,
            0,
            1,
            &[&vorbis::tests::comment_header(), &vorbis::tests::setup_header(&[false, true])],
        ));
        data.extend_from_slice(&page_with_packets(PAGE_TYPE_EOS, 576, 2, &[&[0x00, 0xAA], &[0x02], &[0x00]]));

        let mut extractor = OggExtractor::new();
        let mut output = SampleCollector::new();
        let mut input = StreamInput::new(ChunkedReader::new(data, 5), 0, None);
        while extractor.read(&mut input, &mut output)? != ReadResult::EndOfInput {}

        let seek_map = output.seek_map.clone().expect("seek map");
        assert!(!seek_map.is_seekable());
        assert_eq!(times(&output), vec![0, 0, 13_061]);

        let track = output.track_by_id(AUDIO_TRACK_ID).expect("audio track");
        assert_eq!(track.format.as_ref().and_then(|f| f.sample_rate), Some(44100));
        assert_eq!(track.samples[0].data, vec![0x00, 0xAA, 0, 0, 0, 0]);
        Ok(())
    }

    #[test]
    fn flac_stream_in_one_page() -> Result<()> {
        let frame = [0xFF, 0xF8, 0xC9, 0x18, 0x00, 0x11];
        let mut data = page_with_packets(PAGE_TYPE_BOS, 0, 0, &[&flac::tests::mapping_header()]);
        data.extend_from_slice(&page_with_packets(PAGE_TYPE_EOS, 8192, 1, &[&frame, &frame]));

        let mut extractor = OggExtractor::new();
        let mut output = SampleCollector::new();
        assert_eq!(drive(&mut extractor, &data, 0, &mut output)?, 0);

        assert_eq!(output.seek_map.as_ref().and_then(|m| m.duration_us()), Some(185_759));
        assert_eq!(times(&output), vec![0, 92_879]);
        Ok(())
    }

    #[test]
    fn unknown_bitstream_fails_read() {
        let data = page_with_packets(PAGE_TYPE_BOS, 0, 0, &[b"Speex   "]);
        let mut output = SampleCollector::new();
        let err = OggExtractor::new()
            .read(&mut input_at(&data, 0), &mut output)
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<OggError>(), Some(OggError::UnknownBitstream)));
    }
}
