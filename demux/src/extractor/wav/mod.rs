//! RIFF/WAVE files holding PCM, IEEE float or G.711 samples.

use std::sync::Arc;

use anyhow::Result;

use super::{Extractor, ReadResult};
use crate::input::ExtractorInput;
use crate::output::{ExtractorOutput, Format, MediaType, SampleFlags, TrackHandle};
use crate::seek::{scale_large_timestamp, SeekMap, Unseekable, MICROS_PER_SECOND};

mod header;
mod seek_map;

pub use header::{WavEncoding, WavHeader};
pub use seek_map::WavSeekMap;

/// Output samples hold about this fraction of a second of audio.
const TARGET_SAMPLES_PER_SECOND: u32 = 10;

const AUDIO_TRACK_ID: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ReadingRiffHeader,
    ReadingFormat,
    SkippingToData,
    ReadingSamples,
}

/// Cuts the data chunk into samples of whole blocks.
#[derive(Debug)]
struct PassthroughWriter {
    track: TrackHandle,
    block_size: usize,
    frame_rate_hz: u32,
    target_sample_size: usize,

    start_time_us: i64,
    pending_bytes: usize,
    frames_output: u64,
}

impl PassthroughWriter {
    fn new(track: TrackHandle, header: &WavHeader) -> Self {
        let block_size = header.block_size as usize;
        let frames_per_sample = (header.frame_rate_hz / TARGET_SAMPLES_PER_SECOND).max(1) as usize;
        Self {
            track,
            block_size,
            frame_rate_hz: header.frame_rate_hz,
            target_sample_size: frames_per_sample * block_size,
            start_time_us: 0,
            pending_bytes: 0,
            frames_output: 0,
        }
    }

    fn reset(&mut self, time_us: i64) {
        self.start_time_us = time_us;
        self.pending_bytes = 0;
        self.frames_output = 0;
    }

    /// Writes up to one sample from `input`. Returns `true` once `bytes_left`
    /// bytes were consumed or the input ended.
    fn sample_data(
        &mut self,
        input: &mut dyn ExtractorInput,
        output: &mut dyn ExtractorOutput,
        buffer: &mut [u8],
        mut bytes_left: u64,
    ) -> Result<bool> {
        let track_output = output.track_output(self.track);

        while bytes_left > 0 && self.pending_bytes < self.target_sample_size {
            let want = (self.target_sample_size - self.pending_bytes)
                .min(buffer.len())
                .min(bytes_left.min(usize::MAX as u64) as usize);
            let read = input.read(&mut buffer[..want])?;
            if read == 0 {
                bytes_left = 0;
            } else {
                track_output.sample_data(&buffer[..read]);
                self.pending_bytes += read;
                bytes_left -= read as u64;
            }
        }

        let pending_frames = self.pending_bytes / self.block_size;
        if pending_frames > 0 {
            let time_us = self.start_time_us
                + scale_large_timestamp(
                    self.frames_output as i64,
                    MICROS_PER_SECOND,
                    self.frame_rate_hz as i64,
                );
            let size = pending_frames * self.block_size;
            let offset = self.pending_bytes - size;
            track_output.sample_metadata(time_us, SampleFlags::KEY_FRAME, size, offset, None);
            self.frames_output += pending_frames as u64;
            self.pending_bytes = offset;
        }

        Ok(bytes_left == 0)
    }
}

#[derive(Debug)]
pub struct WavExtractor {
    state: State,
    track: Option<TrackHandle>,
    header: Option<WavHeader>,
    format_set: bool,
    writer: Option<PassthroughWriter>,
    data_start_position: u64,
    data_end_position: Option<u64>,
    /// Time to resume at after a seek into the sample data.
    pending_seek_time_us: Option<i64>,
    buffer: Vec<u8>,
}

impl Default for WavExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl WavExtractor {
    pub fn new() -> Self {
        Self {
            state: State::ReadingRiffHeader,
            track: None,
            header: None,
            format_set: false,
            writer: None,
            data_start_position: 0,
            data_end_position: None,
            pending_seek_time_us: None,
            buffer: Vec::new(),
        }
    }

    pub fn header(&self) -> Option<&WavHeader> {
        self.header.as_ref()
    }

    fn read_format(&mut self, input: &mut dyn ExtractorInput) -> Result<()> {
        let header = header::read_format(input)?;
        log::debug!(
            "WAV format {:#06X}: {} channels at {} Hz, {} bits",
            header.format_type,
            header.channels,
            header.frame_rate_hz,
            header.bits_per_sample
        );
        self.header = Some(header);
        self.state = State::SkippingToData;
        Ok(())
    }

    fn skip_to_data(
        &mut self,
        input: &mut dyn ExtractorInput,
        output: &mut dyn ExtractorOutput,
    ) -> Result<()> {
        let (start, end) = header::skip_to_data(input)?;
        self.data_start_position = start;
        self.data_end_position = end;

        let (Some(header), Some(track)) = (self.header.as_ref(), self.track) else {
            self.state = State::ReadingFormat;
            return Ok(());
        };
        // Unsupported encodings end parsing, there is no other track.
        let encoding = header.encoding()?;

        if !self.format_set {
            let seek_map: Arc<dyn SeekMap> = match end {
                Some(end) => Arc::new(WavSeekMap::new(header.frame_rate_hz, header.block_size, 1, start, end)),
                None => Arc::new(Unseekable::with_start_position(None, start)),
            };
            output.seek_map(seek_map);

            let writer = PassthroughWriter::new(track, header);
            let format = Format {
                average_bitrate: Some(header.average_bytes_per_second.saturating_mul(8)),
                peak_bitrate: Some(header.average_bytes_per_second.saturating_mul(8)),
                max_input_size: Some(writer.target_sample_size),
                channel_count: Some(header.channels as u32),
                sample_rate: Some(header.frame_rate_hz),
                pcm_encoding: encoding.pcm_encoding,
                ..Format::new(encoding.mime_type)
            };
            output.track_output(track).format(&format);
            self.buffer = vec![0; writer.target_sample_size];
            self.writer = Some(writer);
            self.format_set = true;
        }

        if let Some(writer) = self.writer.as_mut() {
            writer.reset(self.pending_seek_time_us.take().unwrap_or(0));
        }
        self.state = State::ReadingSamples;
        Ok(())
    }

    fn read_samples(
        &mut self,
        input: &mut dyn ExtractorInput,
        output: &mut dyn ExtractorOutput,
    ) -> Result<ReadResult> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(ReadResult::EndOfInput);
        };
        if let Some(time_us) = self.pending_seek_time_us.take() {
            writer.reset(time_us);
        }

        let bytes_left = match self.data_end_position {
            Some(end) => end.saturating_sub(input.position()),
            None => u64::MAX,
        };
        if writer.sample_data(input, output, &mut self.buffer, bytes_left)? {
            Ok(ReadResult::EndOfInput)
        } else {
            Ok(ReadResult::Continue)
        }
    }
}

impl Extractor for WavExtractor {
    fn sniff(&mut self, input: &mut dyn ExtractorInput) -> Result<bool> {
        header::sniff(input)
    }

    fn init(&mut self, output: &mut dyn ExtractorOutput) -> Result<()> {
        self.track = Some(output.track(AUDIO_TRACK_ID, MediaType::Audio));
        output.end_tracks();
        Ok(())
    }

    fn read(
        &mut self,
        input: &mut dyn ExtractorInput,
        output: &mut dyn ExtractorOutput,
    ) -> Result<ReadResult> {
        match self.state {
            State::ReadingRiffHeader => {
                if !header::read_riff_header(input)? {
                    return Ok(ReadResult::EndOfInput);
                }
                self.state = State::ReadingFormat;
            }
            State::ReadingFormat => self.read_format(input)?,
            State::SkippingToData => self.skip_to_data(input, output)?,
            State::ReadingSamples => return self.read_samples(input, output),
        }
        Ok(ReadResult::Continue)
    }

    fn seek(&mut self, position: u64, time_us: i64) {
        if position == 0 || self.writer.is_none() {
            self.state = State::ReadingRiffHeader;
            self.pending_seek_time_us = None;
        } else {
            self.state = State::ReadingSamples;
            self.pending_seek_time_us = Some(time_us);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::header::tests::{extensible_fmt_chunk, fmt_chunk, wav_file};
    use super::header::{TYPE_FLOAT, TYPE_PCM};
    use super::*;
    use crate::input::tests::{input_for, ChunkedReader};
    use crate::input::StreamInput;
    use crate::output::{mime, PcmEncoding, SampleCollector};
    use crate::utils::errors::CodecError;

    fn drive(extractor: &mut WavExtractor, input: &mut dyn ExtractorInput, output: &mut SampleCollector) -> Result<()> {
        while extractor.read(input, output)? != ReadResult::EndOfInput {}
        Ok(())
    }

    /// 1000 frames of 16-bit stereo at 8 kHz, after an odd-sized chunk.
    fn stereo_file() -> (Vec<u8>, Vec<u8>) {
        let data: Vec<u8> = (0..4000u32).map(|i| (i % 251) as u8).collect();
        let file = wav_file(&[
            (b"LIST", b"odd"),
            (b"fmt ", &fmt_chunk(TYPE_PCM, 2, 8000, 16)),
            (b"data", &data),
        ]);
        (file, data)
    }

    fn sample_summary(output: &SampleCollector) -> Vec<(i64, usize)> {
        let track = output.track_by_id(AUDIO_TRACK_ID).expect("audio track");
        track.samples.iter().map(|s| (s.time_us, s.data.len())).collect()
    }

    #[test]
    fn pcm_samples_of_a_tenth_second() -> Result<()> {
        let (file, data) = stereo_file();
        let mut extractor = WavExtractor::new();
        assert!(extractor.sniff(&mut input_for(&file))?);

        let mut output = SampleCollector::new();
        extractor.init(&mut output)?;
        drive(&mut extractor, &mut input_for(&file), &mut output)?;

        assert_eq!(sample_summary(&output), vec![(0, 3200), (100_000, 800)]);
        let track = output.track_by_id(AUDIO_TRACK_ID).expect("audio track");
        assert_eq!([track.samples[0].data.as_slice(), track.samples[1].data.as_slice()].concat(), data);

        let format = track.format.as_ref().expect("format");
        assert_eq!(format.sample_mime_type, mime::AUDIO_RAW);
        assert_eq!(format.pcm_encoding, Some(PcmEncoding::S16Le));
        assert_eq!(format.channel_count, Some(2));
        assert_eq!(format.average_bitrate, Some(256_000));

        let seek_map = output.seek_map.as_ref().expect("seek map");
        assert!(seek_map.is_seekable());
        assert_eq!(seek_map.duration_us(), Some(125_000));
        Ok(())
    }

    #[test]
    fn seek_resumes_in_sample_data() -> Result<()> {
        let (file, _) = stereo_file();
        let mut extractor = WavExtractor::new();
        let mut output = SampleCollector::new();
        extractor.init(&mut output)?;
        drive(&mut extractor, &mut input_for(&file), &mut output)?;

        let point = output.seek_map.as_ref().expect("seek map").seek_points(50_000).first;
        assert_eq!(point.position, file.len() as u64 - 2400);
        output.clear_samples();

        extractor.seek(point.position, point.time_us);
        let tail = file[point.position as usize..].to_vec();
        let mut input = StreamInput::new(std::io::Cursor::new(tail), point.position, Some(file.len() as u64));
        drive(&mut extractor, &mut input, &mut output)?;
        assert_eq!(sample_summary(&output), vec![(50_000, 2400)]);

        // Seeking to the start parses the header again.
        output.clear_samples();
        extractor.seek(0, 0);
        drive(&mut extractor, &mut input_for(&file), &mut output)?;
        assert_eq!(sample_summary(&output), vec![(0, 3200), (100_000, 800)]);
        let track = output.track_by_id(AUDIO_TRACK_ID).expect("audio track");
        assert_eq!(track.format_changes, 1);
        Ok(())
    }

    #[test]
    fn extensible_float_of_unknown_length() -> Result<()> {
        let mut file = wav_file(&[
            (b"fmt ", &extensible_fmt_chunk(TYPE_FLOAT, 1, 100, 32)),
            (b"data", &[0; 20 * 4]),
        ]);
        // Streaming writers leave the data size unset.
        let size_at = file.len() - 80 - 4;
        file[size_at..size_at + 4].copy_from_slice(&u32::MAX.to_le_bytes());

        let mut extractor = WavExtractor::new();
        let mut output = SampleCollector::new();
        extractor.init(&mut output)?;
        let mut input = StreamInput::new(ChunkedReader::new(file, 7), 0, None);
        drive(&mut extractor, &mut input, &mut output)?;

        // 10 frames per sample at 100 Hz.
        assert_eq!(sample_summary(&output), vec![(0, 40), (100_000, 40)]);
        let track = output.track_by_id(AUDIO_TRACK_ID).expect("audio track");
        assert_eq!(track.format.as_ref().and_then(|f| f.pcm_encoding), Some(PcmEncoding::F32Le));
        assert!(!output.seek_map.as_ref().expect("seek map").is_seekable());
        Ok(())
    }

    #[test]
    fn unsupported_encoding_is_fatal() -> Result<()> {
        let file = wav_file(&[(b"fmt ", &fmt_chunk(0x0011, 1, 8000, 4)), (b"data", &[0; 8])]);
        let mut extractor = WavExtractor::new();
        let mut output = SampleCollector::new();
        extractor.init(&mut output)?;
        let err = drive(&mut extractor, &mut input_for(&file), &mut output).unwrap_err();
        assert!(matches!(err.downcast_ref::<CodecError>(), Some(CodecError::UnsupportedFormat(_))));
        Ok(())
    }
}
