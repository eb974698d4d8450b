use anyhow::{Result, bail};

use super::command::{CaptionsArgs, Cli, seconds_to_us};
use super::extractor_config;
use crate::input::InputReader;
use crate::timestamp::time_str;
use demux::decoder::{CaptionDecoder, Cea608Parser, Cue, CueParser};
use demux::extractor::{ContainerExtractor, ExtractionSession, ReadResult};
use demux::output::{MediaType, SampleCollector, SampleFlags};

pub fn cmd_captions(args: &CaptionsArgs, cli: &Cli) -> Result<()> {
    let reader = InputReader::new(&args.input)?;
    let length = reader.length();
    let config = extractor_config(cli);
    let mut session = ExtractionSession::open(reader, length, &config, SampleCollector::new())?;
    if !matches!(session.extractor(), ContainerExtractor::RawCc(_)) {
        bail!(
            "{} is a {} stream, not a raw caption stream",
            args.input.display(),
            session.extractor_name()
        );
    }

    let limit_us = args.position.map(seconds_to_us);
    let mut feeder = CueFeeder::new(CaptionDecoder::new(Cea608Parser::new()), limit_us);
    let mut shown = 0usize;

    loop {
        let result = session.step()?;
        for track in &mut session.output_mut().tracks {
            if track.media_type != MediaType::Text {
                continue;
            }
            for sample in std::mem::take(&mut track.samples) {
                for (time_us, cues) in feeder.push(sample.time_us, &sample.data)? {
                    display_cues(time_us, &cues);
                    shown += 1;
                }
            }
        }
        if result == ReadResult::EndOfInput {
            break;
        }
    }

    for (time_us, cues) in feeder.finish()? {
        display_cues(time_us, &cues);
        shown += 1;
    }
    log::info!("{shown} caption updates");
    Ok(())
}

fn display_cues(time_us: i64, cues: &[Cue]) {
    let time = time_str(time_us);
    if cues.is_empty() {
        println!("{time}  (clear)");
        return;
    }
    for cue in cues {
        let mut lines = cue.text.lines();
        println!("{time}  {}", lines.next().unwrap_or_default());
        for line in lines {
            println!("{:width$}  {line}", "", width = time.len());
        }
    }
}

/// Feeds caption samples into a decoder in arrival order. Playback only
/// advances when the decoder runs out of inputs, which leaves room for
/// samples to arrive out of order.
struct CueFeeder<P> {
    decoder: CaptionDecoder<P>,
    limit_us: Option<i64>,
    latest_time_us: i64,
}

impl<P: CueParser> CueFeeder<P> {
    fn new(decoder: CaptionDecoder<P>, limit_us: Option<i64>) -> Self {
        Self {
            decoder,
            limit_us,
            latest_time_us: i64::MIN,
        }
    }

    fn is_past_limit(&self, time_us: i64) -> bool {
        self.limit_us.is_some_and(|limit| time_us > limit)
    }

    /// Decoded cues up to the current position. Returns true once the end
    /// of stream comes out.
    fn drain(&mut self, updates: &mut Vec<(i64, Vec<Cue>)>) -> Result<bool> {
        while let Some(mut output) = self.decoder.dequeue_output()? {
            if output.is_end_of_stream() {
                return Ok(true);
            }
            updates.push((output.time_us, std::mem::take(&mut output.cues)));
        }
        Ok(false)
    }

    fn push(&mut self, time_us: i64, data: &[u8]) -> Result<Vec<(i64, Vec<Cue>)>> {
        let mut updates = Vec::new();
        if self.is_past_limit(time_us) {
            return Ok(updates);
        }

        if self.decoder.available_inputs() == 0 {
            self.decoder.set_position_us(self.latest_time_us);
            self.drain(&mut updates)?;
        }
        match self.decoder.dequeue_input()? {
            Some(input) => {
                input.data.extend_from_slice(data);
                input.time_us = time_us;
                input.flags = SampleFlags::KEY_FRAME;
                self.decoder.queue_input()?;
                self.latest_time_us = self.latest_time_us.max(time_us);
            }
            None => log::warn!("Caption decoder is full, dropping sample at {time_us} us"),
        }
        Ok(updates)
    }

    /// Signals the end of the stream and plays up to the limit.
    fn finish(mut self) -> Result<Vec<(i64, Vec<Cue>)>> {
        let mut updates = Vec::new();
        let end_us = self.limit_us.unwrap_or(self.latest_time_us);
        self.decoder.set_position_us(end_us);
        if self.decoder.available_inputs() == 0 {
            self.drain(&mut updates)?;
        }
        if let Some(input) = self.decoder.dequeue_input()? {
            input.time_us = end_us;
            input.flags = SampleFlags::END_OF_STREAM;
            self.decoder.queue_input()?;
        }
        if !self.drain(&mut updates)? {
            log::debug!("Captions past the end position were not shown");
        }
        self.decoder.release();
        Ok(updates)
    }
}
