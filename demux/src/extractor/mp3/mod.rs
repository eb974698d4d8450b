//! MPEG audio elementary streams, optionally preceded by ID3v2 tags.

use std::io;
use std::sync::Arc;

use anyhow::{bail, Result};
use log::Level;

use super::{Extractor, ReadResult};
use crate::input::{peek_fully_quietly, ExtractorInput};
use crate::log_or_err;
use crate::output::{DummyTrackOutput, ExtractorOutput, Format, MediaType, SampleFlags, TrackHandle, TrackOutput};
use crate::seek::{ConstantBitrateSeeker, IndexSeeker, MlltSeeker, SeekMap, Seeker, Unseekable};
use crate::utils::errors::Mp3Error;

mod gapless;
pub mod header;
pub mod id3;

pub use gapless::GaplessInfo;
pub use header::MpegAudioHeader;
pub use id3::{Id3Tag, MlltFrame};

use header::{frame_size, headers_match, MAX_FRAME_SIZE_BYTES};
use id3::FramePredicate;

/// Bytes searched for a frame sync when sniffing.
const MAX_SNIFF_BYTES: usize = 32 * 1024;
/// Bytes searched for a frame sync when reading.
const MAX_SYNC_BYTES: usize = 128 * 1024;
/// Consecutive frames needed to trust a frame sync.
const MIN_VALID_FRAMES: usize = 4;

const SEEK_HEADER_XING: &[u8; 4] = b"Xing";
const SEEK_HEADER_INFO: &[u8; 4] = b"Info";
const SEEK_HEADER_VBRI: &[u8; 4] = b"VBRI";
/// Offset of a VBRI tag within the first frame.
const VBRI_OFFSET: usize = 36;
/// Offset of the LAME delay and padding field after a Xing tag.
const LAME_GAPLESS_OFFSET: usize = 141;

const AUDIO_TRACK_ID: u32 = 0;

/// Options of [`Mp3Extractor`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mp3Flags {
    /// Build a seek index while reading instead of estimating positions.
    pub enable_index_seeking: bool,
    /// Publish an unseekable seek map whatever the stream carries.
    pub disable_seeking: bool,
    /// Decode only the ID3 frames needed for seeking and gapless playback.
    pub disable_id3_metadata: bool,
}

/// The seeking strategy picked for a stream.
#[derive(Debug, Clone)]
enum Mp3Seeker {
    Unseekable(Arc<Unseekable>),
    Index(Arc<IndexSeeker>),
    Mllt(Arc<MlltSeeker>),
    ConstantBitrate(Arc<ConstantBitrateSeeker>),
}

impl Mp3Seeker {
    fn seeker(&self) -> &dyn Seeker {
        match self {
            Mp3Seeker::Unseekable(seeker) => seeker.as_ref(),
            Mp3Seeker::Index(seeker) => seeker.as_ref(),
            Mp3Seeker::Mllt(seeker) => seeker.as_ref(),
            Mp3Seeker::ConstantBitrate(seeker) => seeker.as_ref(),
        }
    }

    fn seek_map(&self) -> Arc<dyn SeekMap> {
        match self {
            Mp3Seeker::Unseekable(seeker) => seeker.clone(),
            Mp3Seeker::Index(seeker) => seeker.clone(),
            Mp3Seeker::Mllt(seeker) => seeker.clone(),
            Mp3Seeker::ConstantBitrate(seeker) => seeker.clone(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Mp3Seeker::Unseekable(_) => "unseekable",
            Mp3Seeker::Index(_) => "index",
            Mp3Seeker::Mllt(_) => "MLLT",
            Mp3Seeker::ConstantBitrate(_) => "constant bitrate",
        }
    }
}

#[derive(Debug)]
pub struct Mp3Extractor {
    flags: Mp3Flags,
    fail_level: Level,
    track: Option<TrackHandle>,
    skipping_output: DummyTrackOutput,

    /// Header of the first frame of the current sync, 0 when out of sync.
    synchronized_header_data: u32,
    synchronized_header: Option<MpegAudioHeader>,
    id3: Option<Id3Tag>,
    gapless: Option<GaplessInfo>,
    seeker: Option<Mp3Seeker>,

    basis_time_us: Option<i64>,
    samples_read: u64,
    sample_size: usize,
    sample_bytes_remaining: usize,
    first_sample_position: u64,
    seek_time_us: i64,
    is_seek_in_progress: bool,

    scratch: [u8; 4],
    sample_buffer: Vec<u8>,
}

impl Default for Mp3Extractor {
    fn default() -> Self {
        Self::new(Mp3Flags::default())
    }
}

impl Mp3Extractor {
    pub fn new(flags: Mp3Flags) -> Self {
        Self {
            flags,
            fail_level: Level::Error,
            track: None,
            skipping_output: DummyTrackOutput,
            synchronized_header_data: 0,
            synchronized_header: None,
            id3: None,
            gapless: None,
            seeker: None,
            basis_time_us: None,
            samples_read: 0,
            sample_size: 0,
            sample_bytes_remaining: 0,
            first_sample_position: 0,
            seek_time_us: 0,
            is_seek_in_progress: false,
            scratch: [0; 4],
            sample_buffer: vec![0; MAX_FRAME_SIZE_BYTES],
        }
    }

    pub fn set_fail_level(&mut self, level: Level) {
        self.fail_level = level;
    }

    /// ID3 tag found at the start of the stream.
    pub fn id3_tag(&self) -> Option<&Id3Tag> {
        self.id3.as_ref()
    }

    fn compute_time_us(&self, samples: u64) -> i64 {
        let sample_rate = self.synchronized_header.map_or(0, |h| h.sample_rate);
        if sample_rate == 0 {
            return self.basis_time_us.unwrap_or(0);
        }
        self.basis_time_us.unwrap_or(0) + (samples as i128 * 1_000_000 / sample_rate as i128) as i64
    }

    /// Peeks the next four bytes into `scratch`. Returns `true` at the end of
    /// the stream or of its audio data.
    fn peek_end_of_stream_or_header(&mut self, input: &mut dyn ExtractorInput) -> Result<bool> {
        if let Some(data_end) = self
            .seeker
            .as_ref()
            .and_then(|seeker| seeker.seeker().data_end_position())
        {
            if input.peek_position() + 4 > data_end {
                return Ok(true);
            }
        }
        Ok(!peek_fully_quietly(input, &mut self.scratch, true)?)
    }

    /// Finds `MIN_VALID_FRAMES` consecutive matching frames, skipping ID3
    /// tags at the start of the stream. Sniffing only peeks; reading skips
    /// to the first frame.
    ///
    /// Returns `false` at the end of the input, or when sniffing gives up.
    fn synchronize(&mut self, input: &mut dyn ExtractorInput, sniffing: bool) -> Result<bool> {
        let search_limit = if sniffing { MAX_SNIFF_BYTES } else { MAX_SYNC_BYTES };
        let mut valid_frame_count = 0;
        let mut candidate_header_data = 0u32;
        let mut peeked_id3_bytes = 0;
        let mut searched_bytes = 0;

        input.reset_peek_position();
        if input.position() == 0 {
            let predicate = self
                .flags
                .disable_id3_metadata
                .then_some(id3::required_frames as FramePredicate);
            if let Some(tag) = id3::peek_id3_data(input, predicate)? {
                self.gapless = GaplessInfo::from_tag(&tag);
                self.id3 = Some(tag);
            }
            peeked_id3_bytes = input.peek_position() as usize;
            if !sniffing {
                input.skip_fully(peeked_id3_bytes, false)?;
                input.reset_peek_position();
            }
        }

        loop {
            if self.peek_end_of_stream_or_header(input)? {
                if valid_frame_count > 0 {
                    break;
                }
                input.reset_peek_position();
                return Ok(false);
            }

            let header_data = u32::from_be_bytes(self.scratch);
            let size = if candidate_header_data != 0 && !headers_match(header_data, candidate_header_data) {
                None
            } else {
                frame_size(header_data)
            };

            match size {
                None => {
                    if searched_bytes == search_limit {
                        input.reset_peek_position();
                        if sniffing {
                            return Ok(false);
                        }
                        bail!(Mp3Error::SyncNotFound(search_limit));
                    }
                    searched_bytes += 1;
                    valid_frame_count = 0;
                    candidate_header_data = 0;
                    input.reset_peek_position();
                    if sniffing {
                        if !input.advance_peek_position(peeked_id3_bytes + searched_bytes, true)? {
                            input.reset_peek_position();
                            return Ok(false);
                        }
                    } else {
                        input.skip_fully(1, false)?;
                        input.reset_peek_position();
                    }
                }
                Some(size) => {
                    valid_frame_count += 1;
                    if valid_frame_count == 1 {
                        self.synchronized_header = MpegAudioHeader::parse(header_data);
                        candidate_header_data = header_data;
                    } else if valid_frame_count == MIN_VALID_FRAMES {
                        break;
                    }
                    input.advance_peek_position(size - 4, false)?;
                }
            }
        }

        input.reset_peek_position();
        if !sniffing {
            log::debug!(
                "MPEG audio sync at {} after {searched_bytes} bytes: {:?}",
                input.position(),
                self.synchronized_header
            );
            self.synchronized_header_data = candidate_header_data;
        }
        Ok(true)
    }

    /// Skips a Xing, Info or VBRI frame, which carries no audio. LAME delay
    /// and padding in a Xing frame are kept when ID3 had none.
    fn maybe_skip_seek_frame(&mut self, input: &mut dyn ExtractorInput, header: &MpegAudioHeader) -> Result<()> {
        let mut frame = vec![0u8; header.frame_size];
        input.reset_peek_position();
        let peeked = peek_fully_quietly(input, &mut frame, true)?;
        input.reset_peek_position();
        if !peeked {
            return Ok(());
        }

        let xing_base = header.xing_offset();
        let tag_at = |offset: usize| frame.get(offset..offset + 4);
        if tag_at(xing_base).is_some_and(|tag| tag == SEEK_HEADER_XING || tag == SEEK_HEADER_INFO) {
            if self.gapless.is_none() {
                let lame = xing_base + LAME_GAPLESS_OFFSET;
                if let Some(value) = frame.get(lame..lame + 3) {
                    let value = u32::from_be_bytes([0, value[0], value[1], value[2]]);
                    self.gapless = GaplessInfo::from_xing_header_value(value);
                }
            }
            log::debug!("Skipping Xing/Info frame at {}", input.position());
        } else if tag_at(VBRI_OFFSET).is_some_and(|tag| tag == SEEK_HEADER_VBRI) {
            log::debug!("Skipping VBRI frame at {}", input.position());
        } else {
            return Ok(());
        }
        input.skip_fully(header.frame_size, false)?;
        Ok(())
    }

    fn compute_seeker(&mut self, input: &mut dyn ExtractorInput, header: &MpegAudioHeader) -> Result<Mp3Seeker> {
        self.maybe_skip_seek_frame(input, header)?;

        let mllt = self
            .id3
            .as_ref()
            .and_then(Id3Tag::mllt)
            .map(|frame| MlltSeeker::new(input.position(), frame));

        if self.flags.disable_seeking {
            return Ok(Mp3Seeker::Unseekable(Arc::new(Unseekable::new(None))));
        }

        if self.flags.enable_index_seeking {
            let duration_us = match mllt.as_ref() {
                Some(mllt) => mllt.duration_us(),
                None => self.id3.as_ref().and_then(Id3Tag::length_us),
            };
            let data_end_position = mllt.as_ref().and_then(|mllt| mllt.data_end_position());
            return Ok(Mp3Seeker::Index(Arc::new(IndexSeeker::new(
                duration_us,
                input.position(),
                data_end_position,
            ))));
        }

        if let Some(mllt) = mllt {
            return Ok(Mp3Seeker::Mllt(Arc::new(mllt)));
        }

        // The frame after a seek frame may differ from the first one.
        let mut header = *header;
        input.reset_peek_position();
        if peek_fully_quietly(input, &mut self.scratch, true)? {
            if let Some(next) = MpegAudioHeader::parse(u32::from_be_bytes(self.scratch)) {
                header = next;
            }
        }
        input.reset_peek_position();

        Ok(Mp3Seeker::ConstantBitrate(Arc::new(ConstantBitrateSeeker::new(
            input.length(),
            input.position(),
            header.bitrate,
            header.frame_size,
        ))))
    }

    fn read_internal(
        &mut self,
        input: &mut dyn ExtractorInput,
        output: &mut dyn ExtractorOutput,
    ) -> Result<ReadResult> {
        if self.synchronized_header_data == 0 && !self.synchronize(input, false)? {
            return Ok(ReadResult::EndOfInput);
        }

        if self.seeker.is_none() {
            let Some(header) = self.synchronized_header else {
                return Ok(ReadResult::EndOfInput);
            };
            let seeker = self.compute_seeker(input, &header)?;
            log::debug!("MP3 seeking uses the {} seeker", seeker.name());
            output.seek_map(seeker.seek_map());

            let gapless = self.gapless.unwrap_or_default();
            let format = Format {
                max_input_size: Some(MAX_FRAME_SIZE_BYTES),
                channel_count: Some(header.channels),
                sample_rate: Some(header.sample_rate),
                encoder_delay: gapless.encoder_delay,
                encoder_padding: gapless.encoder_padding,
                ..Format::new(header.mime_type)
            };
            if let Some(track) = self.track {
                output.track_output(track).format(&format);
            }

            self.first_sample_position = input.position();
            self.seeker = Some(seeker);
        } else if self.first_sample_position != 0 && input.position() < self.first_sample_position {
            // Skip past the seek frame.
            input.skip_fully((self.first_sample_position - input.position()) as usize, false)?;
            input.reset_peek_position();
        }

        self.read_sample(input, output)
    }

    fn read_sample(
        &mut self,
        input: &mut dyn ExtractorInput,
        output: &mut dyn ExtractorOutput,
    ) -> Result<ReadResult> {
        let Some(seeker) = self.seeker.clone() else {
            return Ok(ReadResult::EndOfInput);
        };

        if self.sample_bytes_remaining == 0 {
            input.reset_peek_position();
            if self.peek_end_of_stream_or_header(input)? {
                return Ok(ReadResult::EndOfInput);
            }
            input.reset_peek_position();

            let header_data = u32::from_be_bytes(self.scratch);
            let header = if headers_match(header_data, self.synchronized_header_data) {
                MpegAudioHeader::parse(header_data)
            } else {
                None
            };
            let Some(header) = header else {
                // Let the next read find a new sync.
                log_or_err!(self, Level::Warn, Mp3Error::LostSync(input.position()));
                input.skip_fully(1, false)?;
                self.synchronized_header_data = 0;
                return Ok(ReadResult::Continue);
            };

            self.synchronized_header = Some(header);
            if self.basis_time_us.is_none() {
                self.basis_time_us = Some(seeker.seeker().time_us(input.position()));
            }
            self.sample_size = header.frame_size;
            self.sample_bytes_remaining = header.frame_size;

            if let Mp3Seeker::Index(index) = &seeker {
                index.maybe_add_seek_point(
                    self.compute_time_us(self.samples_read + header.samples_per_frame as u64),
                    input.position() + header.frame_size as u64,
                );
                if self.is_seek_in_progress && index.is_time_us_in_index(self.seek_time_us) {
                    self.is_seek_in_progress = false;
                }
            }
        }

        let want = self.sample_bytes_remaining.min(self.sample_buffer.len());
        let read = input.read(&mut self.sample_buffer[..want])?;
        if read == 0 {
            return Ok(ReadResult::EndOfInput);
        }

        let time_us = self.compute_time_us(self.samples_read);
        let track_output: &mut dyn TrackOutput = match self.track {
            Some(track) if !self.is_seek_in_progress => output.track_output(track),
            _ => &mut self.skipping_output,
        };
        track_output.sample_data(&self.sample_buffer[..read]);
        self.sample_bytes_remaining -= read;
        if self.sample_bytes_remaining > 0 {
            return Ok(ReadResult::Continue);
        }

        track_output.sample_metadata(time_us, SampleFlags::KEY_FRAME, self.sample_size, 0, None);
        self.samples_read += self
            .synchronized_header
            .map_or(0, |header| header.samples_per_frame as u64);
        Ok(ReadResult::Continue)
    }
}

fn is_end_of_input(err: &anyhow::Error) -> bool {
    err.downcast_ref::<io::Error>()
        .is_some_and(|e| e.kind() == io::ErrorKind::UnexpectedEof)
}

impl Extractor for Mp3Extractor {
    fn sniff(&mut self, input: &mut dyn ExtractorInput) -> Result<bool> {
        self.synchronize(input, true)
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
        let result = match self.read_internal(input, output) {
            Err(e) if is_end_of_input(&e) => {
                log::debug!("MP3 stream ends mid-frame: {e}");
                ReadResult::EndOfInput
            }
            result => result?,
        };

        if result == ReadResult::EndOfInput {
            if let Some(Mp3Seeker::Index(index)) = &self.seeker {
                let duration_us = self.compute_time_us(self.samples_read);
                if index.duration_us() != Some(duration_us) {
                    index.set_duration_us(duration_us);
                    output.seek_map(index.clone());
                }
            }
        }
        Ok(result)
    }

    fn seek(&mut self, _position: u64, time_us: i64) {
        self.synchronized_header_data = 0;
        self.basis_time_us = None;
        self.samples_read = 0;
        self.sample_bytes_remaining = 0;
        self.seek_time_us = time_us;
        if let Some(Mp3Seeker::Index(index)) = &self.seeker {
            if !index.is_time_us_in_index(time_us) {
                self.is_seek_in_progress = true;
            }
        }
    }
}
