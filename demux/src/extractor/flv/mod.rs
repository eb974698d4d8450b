//! Flash Video (FLV) container.

use std::sync::Arc;

use anyhow::{Result, ensure};
use log::Level;

use super::{Extractor, ReadResult};
use crate::input::ExtractorInput;
use crate::log_or_err;
use crate::output::{ExtractorOutput, MediaType};
use crate::seek::{SeekMap, Unseekable};
use crate::utils::errors::{CodecError, FlvError};

mod audio;
mod script;
mod video;

use audio::AudioTagReader;
use script::ScriptTagReader;
use video::VideoTagReader;

const FLV_HEADER_SIZE: usize = 9;
const FLV_TAG_HEADER_SIZE: usize = 11;
const FLV_SIGNATURE: &[u8; 3] = b"FLV";

const TAG_TYPE_AUDIO: u8 = 8;
const TAG_TYPE_VIDEO: u8 = 9;
const TAG_TYPE_SCRIPT_DATA: u8 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ReadingFlvHeader,
    SkippingToTagHeader,
    ReadingTagHeader,
    ReadingTagData,
}

#[derive(Debug)]
pub struct FlvExtractor {
    state: State,
    tag_data: Vec<u8>,

    bytes_to_next_tag_header: usize,
    tag_type: u8,
    tag_data_size: usize,
    tag_timestamp_us: i64,

    output_first_sample: bool,
    output_seek_map: bool,
    media_tag_timestamp_offset_us: i64,

    audio_reader: Option<AudioTagReader>,
    video_reader: Option<VideoTagReader>,
    metadata_reader: ScriptTagReader,
    tracks_registered: bool,

    fail_level: Level,
}

impl Default for FlvExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FlvExtractor {
    pub fn new() -> Self {
        Self {
            state: State::ReadingFlvHeader,
            tag_data: Vec::new(),
            bytes_to_next_tag_header: 0,
            tag_type: 0,
            tag_data_size: 0,
            tag_timestamp_us: 0,
            output_first_sample: false,
            output_seek_map: false,
            media_tag_timestamp_offset_us: 0,
            audio_reader: None,
            video_reader: None,
            metadata_reader: ScriptTagReader::default(),
            tracks_registered: false,
            fail_level: Level::Error,
        }
    }

    pub fn set_fail_level(&mut self, level: Level) {
        self.fail_level = level;
    }

    fn read_flv_header(
        &mut self,
        input: &mut dyn ExtractorInput,
        output: &mut dyn ExtractorOutput,
    ) -> Result<bool> {
        let mut header = [0u8; FLV_HEADER_SIZE];
        if !input.read_fully(&mut header, true)? {
            return Ok(false);
        }

        let flags = header[4];
        ensure!(
            &header[..3] == FLV_SIGNATURE && flags & 0xFA == 0,
            FlvError::InvalidHeader {
                signature: [header[0], header[1], header[2]],
                flags,
            }
        );
        let has_audio = flags & 0x04 != 0;
        let has_video = flags & 0x01 != 0;

        // Tracks are registered once; a seek to 0 reads the header again.
        if !self.tracks_registered {
            if has_audio {
                let track = output.track(TAG_TYPE_AUDIO as u32, MediaType::Audio);
                self.audio_reader = Some(AudioTagReader::new(track));
            }
            if has_video {
                let track = output.track(TAG_TYPE_VIDEO as u32, MediaType::Video);
                self.video_reader = Some(VideoTagReader::new(track));
            }
            output.end_tracks();
            self.tracks_registered = true;
        }

        // Skip any extra header bytes plus the first previous-tag-size field.
        let data_offset = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as usize;
        self.bytes_to_next_tag_header = (data_offset + 4).saturating_sub(FLV_HEADER_SIZE);
        self.state = State::SkippingToTagHeader;
        Ok(true)
    }

    fn skip_to_tag_header(&mut self, input: &mut dyn ExtractorInput) -> Result<bool> {
        if !input.skip_fully(self.bytes_to_next_tag_header, true)? {
            return Ok(false);
        }
        self.bytes_to_next_tag_header = 0;
        self.state = State::ReadingTagHeader;
        Ok(true)
    }

    fn read_tag_header(&mut self, input: &mut dyn ExtractorInput) -> Result<bool> {
        let mut header = [0u8; FLV_TAG_HEADER_SIZE];
        if !input.read_fully(&mut header, true)? {
            return Ok(false);
        }

        self.tag_type = header[0];
        self.tag_data_size = u32::from_be_bytes([0, header[1], header[2], header[3]]) as usize;
        let timestamp = u32::from_be_bytes([header[7], header[4], header[5], header[6]]);
        self.tag_timestamp_us = timestamp as i64 * 1000;
        log::trace!(
            "FLV tag type {} size {} at {} us",
            self.tag_type,
            self.tag_data_size,
            self.tag_timestamp_us
        );

        self.state = State::ReadingTagData;
        Ok(true)
    }

    /// Returns whether the tag payload was consumed rather than skipped.
    fn read_tag_data(
        &mut self,
        input: &mut dyn ExtractorInput,
        output: &mut dyn ExtractorOutput,
    ) -> Result<bool> {
        let mut was_consumed = true;
        let mut was_sample_output = false;
        let time_us = self.current_timestamp_us();

        if self.tag_type == TAG_TYPE_AUDIO && self.audio_reader.is_some() {
            self.ensure_ready_for_media_output(output);
            self.prepare_tag_data(input)?;
            if let Some(reader) = self.audio_reader.as_mut() {
                let data = &self.tag_data[..self.tag_data_size];
                match reader.consume(data, time_us, output.track_output(reader.track)) {
                    Ok(wrote) => was_sample_output = wrote,
                    Err(e) if is_unsupported(&e) => {
                        log_or_err!(self, Level::Warn, e);
                        self.audio_reader = None;
                    }
                    Err(e) => return Err(e),
                }
            }
        } else if self.tag_type == TAG_TYPE_VIDEO && self.video_reader.is_some() {
            self.ensure_ready_for_media_output(output);
            self.prepare_tag_data(input)?;
            if let Some(reader) = self.video_reader.as_mut() {
                let data = &self.tag_data[..self.tag_data_size];
                match reader.consume(data, time_us, output.track_output(reader.track)) {
                    Ok(wrote) => was_sample_output = wrote,
                    Err(e) if is_unsupported(&e) => {
                        log_or_err!(self, Level::Warn, e);
                        self.video_reader = None;
                    }
                    Err(e) => return Err(e),
                }
            }
        } else if self.tag_type == TAG_TYPE_SCRIPT_DATA && !self.output_seek_map {
            self.prepare_tag_data(input)?;
            if let Err(e) = self
                .metadata_reader
                .consume(&self.tag_data[..self.tag_data_size])
            {
                log_or_err!(self, Level::Warn, e);
            }

            let seek_map: Option<Arc<dyn SeekMap>> = match self.metadata_reader.keyframe_index() {
                Some(index) => Some(Arc::new(index)),
                None => match self.metadata_reader.duration_us() {
                    Some(duration_us) => Some(Arc::new(Unseekable::new(Some(duration_us)))),
                    None => None,
                },
            };
            if let Some(seek_map) = seek_map {
                log::debug!("FLV seek map from metadata: {seek_map:?}");
                output.seek_map(seek_map);
                self.output_seek_map = true;
            }
        } else {
            input.skip_fully(self.tag_data_size, false)?;
            was_consumed = false;
        }

        if !self.output_first_sample && was_sample_output {
            self.output_first_sample = true;
            self.media_tag_timestamp_offset_us = match self.metadata_reader.duration_us() {
                Some(_) => 0,
                None => -self.tag_timestamp_us,
            };
        }

        self.bytes_to_next_tag_header = 4;
        self.state = State::SkippingToTagHeader;
        Ok(was_consumed)
    }

    fn prepare_tag_data(&mut self, input: &mut dyn ExtractorInput) -> Result<()> {
        if self.tag_data.len() < self.tag_data_size {
            let capacity = (self.tag_data.len() * 2).max(self.tag_data_size);
            self.tag_data.resize(capacity, 0);
        }
        input.read_fully(&mut self.tag_data[..self.tag_data_size], false)?;
        Ok(())
    }

    fn ensure_ready_for_media_output(&mut self, output: &mut dyn ExtractorOutput) {
        if !self.output_seek_map {
            output.seek_map(Arc::new(Unseekable::new(None)));
            self.output_seek_map = true;
        }
    }

    /// Without a declared duration, timestamps are shifted so that the first
    /// sample starts at zero.
    fn current_timestamp_us(&self) -> i64 {
        if self.output_first_sample {
            self.media_tag_timestamp_offset_us + self.tag_timestamp_us
        } else if self.metadata_reader.duration_us().is_none() {
            0
        } else {
            self.tag_timestamp_us
        }
    }
}

fn is_unsupported(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<CodecError>(),
        Some(CodecError::UnsupportedFormat(_))
    )
}

impl Extractor for FlvExtractor {
    fn sniff(&mut self, input: &mut dyn ExtractorInput) -> Result<bool> {
        let mut scratch = [0u8; 4];

        if !input.peek_fully(&mut scratch[..3], true)? || &scratch[..3] != FLV_SIGNATURE {
            input.reset_peek_position();
            return Ok(false);
        }

        // Version byte, then the flags whose reserved bits must be clear.
        input.peek_fully(&mut scratch[..2], false)?;
        if u16::from_be_bytes([scratch[0], scratch[1]]) & 0xFA != 0 {
            input.reset_peek_position();
            return Ok(false);
        }

        input.peek_fully(&mut scratch, false)?;
        let data_offset = u32::from_be_bytes(scratch) as usize;

        input.reset_peek_position();
        input.advance_peek_position(data_offset, false)?;

        // The first previous-tag-size field is zero.
        input.peek_fully(&mut scratch, false)?;
        input.reset_peek_position();
        Ok(u32::from_be_bytes(scratch) == 0)
    }

    fn init(&mut self, _output: &mut dyn ExtractorOutput) -> Result<()> {
        Ok(())
    }

    fn read(
        &mut self,
        input: &mut dyn ExtractorInput,
        output: &mut dyn ExtractorOutput,
    ) -> Result<ReadResult> {
        loop {
            match self.state {
                State::ReadingFlvHeader => {
                    if !self.read_flv_header(input, output)? {
                        return Ok(ReadResult::EndOfInput);
                    }
                }
                State::SkippingToTagHeader => {
                    if !self.skip_to_tag_header(input)? {
                        return Ok(ReadResult::EndOfInput);
                    }
                }
                State::ReadingTagHeader => {
                    if !self.read_tag_header(input)? {
                        return Ok(ReadResult::EndOfInput);
                    }
                }
                State::ReadingTagData => {
                    if self.read_tag_data(input, output)? {
                        return Ok(ReadResult::Continue);
                    }
                }
            }
        }
    }

    fn seek(&mut self, position: u64, _time_us: i64) {
        self.state = if position == 0 {
            State::ReadingFlvHeader
        } else {
            State::ReadingTagHeader
        };
        self.output_first_sample = false;
        self.bytes_to_next_tag_header = 0;
        if let Some(reader) = self.video_reader.as_mut() {
            reader.seek();
        }
    }
}
