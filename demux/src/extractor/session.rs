//! Drives an extractor over a seekable reader.

use std::io::{Read, Seek};
use std::sync::Arc;

use anyhow::{bail, Result};

use super::{probe, ContainerExtractor, Extractor, ExtractorConfig, ReadResult};
use crate::input::{ExtractorInput, StreamInput};
use crate::output::{ExtractorOutput, MediaType, TrackHandle, TrackOutput};
use crate::seek::{SeekMap, SeekPoint};
use crate::utils::errors::SessionError;

/// Forwards to the caller's sink, keeping the latest seek map.
#[derive(Debug)]
struct SessionOutput<O> {
    inner: O,
    seek_map: Option<Arc<dyn SeekMap>>,
}

impl<O: ExtractorOutput> ExtractorOutput for SessionOutput<O> {
    fn track(&mut self, id: u32, media_type: MediaType) -> TrackHandle {
        self.inner.track(id, media_type)
    }

    fn track_output(&mut self, handle: TrackHandle) -> &mut dyn TrackOutput {
        self.inner.track_output(handle)
    }

    fn end_tracks(&mut self) {
        self.inner.end_tracks()
    }

    fn seek_map(&mut self, seek_map: Arc<dyn SeekMap>) {
        self.seek_map = Some(seek_map.clone());
        self.inner.seek_map(seek_map);
    }
}

/// Owns an extractor together with its input and sink, and follows the
/// repositioning requests of the extractor.
#[derive(Debug)]
pub struct ExtractionSession<R, O> {
    extractor: ContainerExtractor,
    input: StreamInput<R>,
    output: SessionOutput<O>,
    ended: bool,
}

impl<R: Read + Seek, O: ExtractorOutput> ExtractionSession<R, O> {
    /// Probes `reader` from its current position and initialises the
    /// matching extractor. `length` is the total stream length, if known.
    pub fn open(mut reader: R, length: Option<u64>, config: &ExtractorConfig, output: O) -> Result<Self> {
        let position = reader.stream_position()?;
        let mut input = StreamInput::new(reader, position, length);
        let extractor = probe(&mut input, config)?;
        Self::with_extractor(extractor, input, output)
    }

    pub fn with_extractor(mut extractor: ContainerExtractor, input: StreamInput<R>, output: O) -> Result<Self> {
        let mut output = SessionOutput {
            inner: output,
            seek_map: None,
        };
        extractor.init(&mut output)?;
        Ok(Self {
            extractor,
            input,
            output,
            ended: false,
        })
    }

    pub fn extractor_name(&self) -> &'static str {
        self.extractor.name()
    }

    pub fn extractor(&self) -> &ContainerExtractor {
        &self.extractor
    }

    /// Latest seek map published by the extractor.
    pub fn seek_map(&self) -> Option<&Arc<dyn SeekMap>> {
        self.output.seek_map.as_ref()
    }

    pub fn output(&self) -> &O {
        &self.output.inner
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output.inner
    }

    pub fn position(&self) -> u64 {
        self.input.position()
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Performs one read.
    pub fn step(&mut self) -> Result<ReadResult> {
        if self.ended {
            return Ok(ReadResult::EndOfInput);
        }

        let result = self.extractor.read(&mut self.input, &mut self.output)?;
        match result {
            ReadResult::Seek(position) => {
                log::trace!("{} repositions input to {position}", self.extractor.name());
                self.input.seek_to(position)?;
            }
            ReadResult::EndOfInput => self.ended = true,
            ReadResult::Continue => {}
        }
        Ok(result)
    }

    pub fn run(&mut self) -> Result<()> {
        while self.step()? != ReadResult::EndOfInput {}
        Ok(())
    }

    /// Repositions reading at the seek point of `time_us` and returns it.
    ///
    /// Streams that publish their seek map while reading are read until they
    /// do, so samples may reach the sink before the seek happens.
    pub fn seek_to_time_us(&mut self, time_us: i64) -> Result<SeekPoint> {
        while self.output.seek_map.is_none() && !self.ended {
            self.step()?;
        }

        let point = match &self.output.seek_map {
            Some(seek_map) if seek_map.is_seekable() => seek_map.seek_points(time_us).first,
            _ => bail!(SessionError::NotSeekable(self.extractor.name())),
        };
        log::debug!(
            "Seeking to {time_us} us: resuming at {} us, byte {}",
            point.time_us,
            point.position
        );

        self.input.seek_to(point.position)?;
        self.extractor.seek(point.position, point.time_us);
        self.ended = false;
        Ok(point)
    }

    pub fn release(mut self) -> O {
        self.extractor.release();
        self.output.inner
    }
}
