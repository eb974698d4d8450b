use anyhow::{bail, Result};
use log::Level;

use super::flac::FlacReader;
use super::opus::OpusReader;
use super::packet::OggPacket;
use super::seeker::{granule_to_time_us, time_us_to_granule, DefaultOggSeeker, OggSeeker, SeekerStep};
use super::vorbis::VorbisReader;
use crate::extractor::ReadResult;
use crate::input::ExtractorInput;
use crate::output::{ExtractorOutput, Format, SampleFlags, TrackHandle};
use crate::utils::errors::OggError;

/// Values collected while reading the header packets.
#[derive(Debug, Default)]
pub struct SetupData {
    pub format: Option<Format>,
}

/// Codec-specific part of an Ogg logical bitstream.
#[derive(Debug)]
pub enum CodecReader {
    Flac(FlacReader),
    Vorbis(VorbisReader),
    Opus(OpusReader),
}

impl CodecReader {
    /// Picks the codec from the first packet of the stream.
    pub fn detect(first_packet: &[u8]) -> Option<Self> {
        if FlacReader::verify_bitstream_type(first_packet) {
            Some(CodecReader::Flac(FlacReader::default()))
        } else if VorbisReader::verify_bitstream_type(first_packet) {
            Some(CodecReader::Vorbis(VorbisReader::default()))
        } else if OpusReader::verify_bitstream_type(first_packet) {
            Some(CodecReader::Opus(OpusReader::default()))
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CodecReader::Flac(_) => "FLAC",
            CodecReader::Vorbis(_) => "Vorbis",
            CodecReader::Opus(_) => "Opus",
        }
    }

    fn reset(&mut self, header_data: bool) {
        match self {
            CodecReader::Flac(reader) => reader.reset(header_data),
            CodecReader::Vorbis(reader) => reader.reset(header_data),
            CodecReader::Opus(reader) => reader.reset(header_data),
        }
    }

    /// Returns whether `packet` was a header packet.
    fn read_headers(&mut self, packet: &[u8], setup: &mut SetupData) -> Result<bool> {
        match self {
            CodecReader::Flac(reader) => reader.read_headers(packet, setup),
            CodecReader::Vorbis(reader) => reader.read_headers(packet, setup),
            CodecReader::Opus(reader) => reader.read_headers(packet, setup),
        }
    }

    /// Granules covered by `packet`, or `None` to drop it.
    fn prepare_payload(&mut self, packet: &mut Vec<u8>) -> Option<i64> {
        match self {
            CodecReader::Flac(reader) => reader.prepare_payload(packet),
            CodecReader::Vorbis(reader) => reader.prepare_payload(packet),
            CodecReader::Opus(reader) => reader.prepare_payload(packet),
        }
    }

    fn on_seek_end(&mut self, current_granule: i64) {
        if let CodecReader::Vorbis(reader) = self {
            reader.on_seek_end(current_granule);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ReadHeaders,
    SkipHeaders,
    ReadPayload,
    EndOfInput,
}

/// Turns the packets of one logical bitstream into samples.
#[derive(Debug)]
pub struct StreamReader {
    codec: CodecReader,
    packet: OggPacket,
    track: TrackHandle,
    seeker: Option<OggSeeker>,
    setup: SetupData,

    state: State,
    sample_rate: u32,
    target_granule: Option<i64>,
    current_granule: i64,
    payload_start_position: u64,
    /// The first audio packet was read while looking for the end of the headers.
    packet_pending: bool,
    seek_map_set: bool,
    format_set: bool,
}

impl StreamReader {
    pub fn new(codec: CodecReader, track: TrackHandle, fail_level: Level) -> Self {
        let mut packet = OggPacket::default();
        packet.fail_level = fail_level;

        let mut reader = Self {
            codec,
            packet,
            track,
            seeker: None,
            setup: SetupData::default(),
            state: State::ReadHeaders,
            sample_rate: 0,
            target_granule: None,
            current_granule: 0,
            payload_start_position: 0,
            packet_pending: false,
            seek_map_set: false,
            format_set: false,
        };
        reader.reset(true);
        reader
    }

    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    fn reset(&mut self, header_data: bool) {
        if header_data {
            self.setup = SetupData::default();
            self.payload_start_position = 0;
            self.state = State::ReadHeaders;
        } else {
            self.state = State::SkipHeaders;
        }
        self.target_granule = None;
        self.current_granule = 0;
        self.codec.reset(header_data);
    }

    pub fn seek(&mut self, position: u64, time_us: i64) {
        self.packet.reset();
        self.packet_pending = false;
        if position == 0 {
            self.reset(!self.seek_map_set);
        } else if self.state != State::ReadHeaders {
            let target_granule = time_us_to_granule(time_us, self.sample_rate);
            self.target_granule = Some(target_granule);
            if let Some(seeker) = self.seeker.as_mut() {
                seeker.start_seek(target_granule);
            }
            self.state = State::ReadPayload;
        }
    }

    pub fn read(
        &mut self,
        input: &mut dyn ExtractorInput,
        output: &mut dyn ExtractorOutput,
    ) -> Result<ReadResult> {
        match self.state {
            State::ReadHeaders => self.read_headers_and_update_state(input, output),
            State::SkipHeaders => {
                input.skip_fully(self.payload_start_position as usize, false)?;
                self.state = State::ReadPayload;
                Ok(ReadResult::Continue)
            }
            State::ReadPayload => self.read_payload(input, output),
            State::EndOfInput => Ok(ReadResult::EndOfInput),
        }
    }

    /// Returns `false` if the input ended before the first audio packet.
    fn read_headers(&mut self, input: &mut dyn ExtractorInput) -> Result<bool> {
        loop {
            if !self.packet.populate(input)? {
                self.state = State::EndOfInput;
                return Ok(false);
            }
            if self.codec.read_headers(self.packet.payload(), &mut self.setup)? {
                self.payload_start_position = input.position();
            } else {
                self.packet_pending = true;
                return Ok(true);
            }
        }
    }

    fn read_headers_and_update_state(
        &mut self,
        input: &mut dyn ExtractorInput,
        output: &mut dyn ExtractorOutput,
    ) -> Result<ReadResult> {
        if !self.read_headers(input)? {
            return Ok(ReadResult::EndOfInput);
        }

        let Some(format) = self.setup.format.as_ref() else {
            bail!(OggError::InvalidHeader(self.codec.name()));
        };
        self.sample_rate = format.sample_rate.unwrap_or(0);
        if !self.format_set {
            output.track_output(self.track).format(format);
            self.format_set = true;
        }

        let seeker = match input.length() {
            None => OggSeeker::Unseekable,
            Some(length) => {
                let header = self.packet.page_header();
                OggSeeker::Default(DefaultOggSeeker::new(
                    self.payload_start_position,
                    length,
                    header.page_size(),
                    header.granule_position,
                    header.is_last_page(),
                ))
            }
        };
        log::debug!("Ogg {} payload starts at {}", self.codec.name(), self.payload_start_position);
        self.seeker = Some(seeker);

        self.state = State::ReadPayload;
        self.packet.trim_payload();
        Ok(ReadResult::Continue)
    }

    fn read_payload(
        &mut self,
        input: &mut dyn ExtractorInput,
        output: &mut dyn ExtractorOutput,
    ) -> Result<ReadResult> {
        let Some(seeker) = self.seeker.as_mut() else {
            bail!(OggError::InvalidHeader(self.codec.name()));
        };

        match seeker.read(input)? {
            SeekerStep::Seek(position) => return Ok(ReadResult::Seek(position)),
            SeekerStep::SeekEnded(granule) => {
                self.current_granule = granule;
                self.codec.on_seek_end(granule);
            }
            SeekerStep::Idle => {}
        }

        if !self.seek_map_set {
            output.seek_map(seeker.create_seek_map(self.sample_rate));
            self.seek_map_set = true;
        }

        if !std::mem::take(&mut self.packet_pending) && !self.packet.populate(input)? {
            self.state = State::EndOfInput;
            return Ok(ReadResult::EndOfInput);
        }

        if let Some(granules) = self.codec.prepare_payload(self.packet.payload_mut()) {
            if self
                .target_granule
                .is_none_or(|target| self.current_granule + granules >= target)
            {
                let time_us = granule_to_time_us(self.current_granule, self.sample_rate);
                let payload = self.packet.payload();
                let track = output.track_output(self.track);
                track.sample_data(payload);
                track.sample_metadata(time_us, SampleFlags::KEY_FRAME, payload.len(), 0, None);
                self.target_granule = None;
            }
            self.current_granule += granules;
        }
        Ok(ReadResult::Continue)
    }
}
