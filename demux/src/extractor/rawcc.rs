//! Raw CEA-608 caption container.
//!
//! An 8-byte header (`"RCC\x01"`, a version byte, three reserved bytes) is
//! followed by records of a timestamp, a triplet count and that many 3-byte
//! caption triplets. Version 0 timestamps are 45 kHz ticks in a `u32`,
//! version 1 timestamps are microseconds in an `i64`.

use std::sync::Arc;

use anyhow::{bail, ensure, Result};

use super::{Extractor, ReadResult};
use crate::input::{peek_fully_quietly, ExtractorInput};
use crate::output::{ExtractorOutput, Format, MediaType, SampleFlags, TrackHandle};
use crate::seek::Unseekable;
use crate::utils::errors::RawCcError;

const HEADER_SIZE: usize = 8;
const HEADER_ID: u32 = 0x5243_4301;
const TIMESTAMP_SIZE_V0: usize = 4;
const TIMESTAMP_SIZE_V1: usize = 8;
const TRIPLET_SIZE: usize = 3;

const TEXT_TRACK_ID: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ReadingHeader,
    ReadingTimestampAndCount,
    ReadingSamples,
}

#[derive(Debug)]
pub struct RawCcExtractor {
    format: Format,
    track: Option<TrackHandle>,
    state: State,
    version: u8,
    timestamp_us: i64,
    remaining_triplets: usize,
    scratch: Vec<u8>,
}

impl RawCcExtractor {
    /// `format` describes the captions carried by the container.
    pub fn new(format: Format) -> Self {
        Self {
            format,
            track: None,
            state: State::ReadingHeader,
            version: 0,
            timestamp_us: 0,
            remaining_triplets: 0,
            scratch: Vec::with_capacity(u8::MAX as usize * TRIPLET_SIZE),
        }
    }

    fn parse_header(&mut self, input: &mut dyn ExtractorInput) -> Result<bool> {
        let mut header = [0u8; HEADER_SIZE];
        if !input.read_fully(&mut header, true)? {
            return Ok(false);
        }
        let id = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        ensure!(id == HEADER_ID, RawCcError::InvalidHeaderId(id));
        // The reserved bytes carry no flags yet.
        self.version = header[4];
        log::debug!("Raw captions version {}", self.version);
        Ok(true)
    }

    fn parse_timestamp_and_count(&mut self, input: &mut dyn ExtractorInput) -> Result<bool> {
        let mut record = [0u8; TIMESTAMP_SIZE_V1 + 1];
        let timestamp_size = match self.version {
            0 => TIMESTAMP_SIZE_V0,
            1 => TIMESTAMP_SIZE_V1,
            version => bail!(RawCcError::UnsupportedVersion(version)),
        };
        let record = &mut record[..timestamp_size + 1];
        if !input.read_fully(record, true)? {
            return Ok(false);
        }

        self.timestamp_us = if self.version == 0 {
            let ticks = u32::from_be_bytes([record[0], record[1], record[2], record[3]]);
            ticks as i64 * 1000 / 45
        } else {
            let mut bytes = [0u8; TIMESTAMP_SIZE_V1];
            bytes.copy_from_slice(&record[..TIMESTAMP_SIZE_V1]);
            i64::from_be_bytes(bytes)
        };
        self.remaining_triplets = record[timestamp_size] as usize;
        Ok(true)
    }

    fn parse_samples(
        &mut self,
        input: &mut dyn ExtractorInput,
        output: &mut dyn ExtractorOutput,
    ) -> Result<()> {
        let size = self.remaining_triplets * TRIPLET_SIZE;
        self.remaining_triplets = 0;
        if size == 0 {
            return Ok(());
        }

        self.scratch.resize(size, 0);
        input.read_fully(&mut self.scratch, false)?;
        if let Some(track) = self.track {
            let track_output = output.track_output(track);
            track_output.sample_data(&self.scratch);
            track_output.sample_metadata(self.timestamp_us, SampleFlags::KEY_FRAME, size, 0, None);
        }
        Ok(())
    }
}

impl Extractor for RawCcExtractor {
    fn sniff(&mut self, input: &mut dyn ExtractorInput) -> Result<bool> {
        let mut header = [0u8; HEADER_SIZE];
        if !peek_fully_quietly(input, &mut header, true)? {
            return Ok(false);
        }
        Ok(u32::from_be_bytes([header[0], header[1], header[2], header[3]]) == HEADER_ID)
    }

    fn init(&mut self, output: &mut dyn ExtractorOutput) -> Result<()> {
        output.seek_map(Arc::new(Unseekable::new(None)));
        let track = output.track(TEXT_TRACK_ID, MediaType::Text);
        output.track_output(track).format(&self.format);
        output.end_tracks();
        self.track = Some(track);
        Ok(())
    }

    fn read(
        &mut self,
        input: &mut dyn ExtractorInput,
        output: &mut dyn ExtractorOutput,
    ) -> Result<ReadResult> {
        loop {
            match self.state {
                State::ReadingHeader => {
                    if !self.parse_header(input)? {
                        return Ok(ReadResult::EndOfInput);
                    }
                    self.state = State::ReadingTimestampAndCount;
                }
                State::ReadingTimestampAndCount => {
                    if !self.parse_timestamp_and_count(input)? {
                        self.state = State::ReadingHeader;
                        return Ok(ReadResult::EndOfInput);
                    }
                    self.state = State::ReadingSamples;
                }
                State::ReadingSamples => {
                    self.parse_samples(input, output)?;
                    self.state = State::ReadingTimestampAndCount;
                    return Ok(ReadResult::Continue);
                }
            }
        }
    }

    fn seek(&mut self, _position: u64, _time_us: i64) {
        self.state = State::ReadingHeader;
    }
}
