//! Container extractors.
//!
//! Every container is parsed by a resumable state machine implementing
//! [`Extractor`]. A driver calls [`Extractor::read`] repeatedly; each call does
//! one bounded unit of work and tells the driver how to continue.
//!
//! [`probe`] picks the extractor for an input by sniffing every known
//! container in a fixed order.

use anyhow::Result;
use log::Level;

use crate::input::ExtractorInput;
use crate::output::{mime, ExtractorOutput, Format};
use crate::utils::errors::ProbeError;

pub mod flv;
pub mod mp3;
pub mod ogg;
pub mod rawcc;
pub mod session;
pub mod wav;

pub use flv::FlvExtractor;
pub use mp3::{Mp3Extractor, Mp3Flags};
pub use ogg::OggExtractor;
pub use rawcc::RawCcExtractor;
pub use session::ExtractionSession;
pub use wav::WavExtractor;

/// What the driver should do after a call to [`Extractor::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadResult {
    /// Call `read` again.
    Continue,
    /// Reposition the input at the given byte offset, then call `read` again.
    Seek(u64),
    /// No more data will be produced.
    EndOfInput,
}

pub trait Extractor {
    /// Whether the input starts with this container's signature. Only peeks.
    fn sniff(&mut self, input: &mut dyn ExtractorInput) -> Result<bool>;

    /// Called once before the first `read`.
    fn init(&mut self, output: &mut dyn ExtractorOutput) -> Result<()>;

    fn read(
        &mut self,
        input: &mut dyn ExtractorInput,
        output: &mut dyn ExtractorOutput,
    ) -> Result<ReadResult>;

    /// Resets parsing to resume at `position`, which corresponds to `time_us`.
    fn seek(&mut self, position: u64, time_us: i64);

    fn release(&mut self) {}
}

/// Options for the extractors created by [`probe`].
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub mp3_flags: Mp3Flags,
    /// Format of the track exposed by the raw captions container.
    pub raw_cc_format: Format,
    /// Anomalies at or above this level abort parsing instead of being logged.
    pub fail_level: Level,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            mp3_flags: Mp3Flags::default(),
            raw_cc_format: Format::new(mime::APPLICATION_CEA608),
            fail_level: Level::Error,
        }
    }
}

/// The containers this crate can read.
#[derive(Debug)]
pub enum ContainerExtractor {
    Flv(FlvExtractor),
    Ogg(OggExtractor),
    Wav(WavExtractor),
    RawCc(RawCcExtractor),
    Mp3(Mp3Extractor),
}

impl ContainerExtractor {
    /// Every candidate, in sniffing order. MP3 comes last as its frame sync
    /// is the weakest signature.
    pub fn candidates(config: &ExtractorConfig) -> Vec<ContainerExtractor> {
        let mut flv = FlvExtractor::new();
        flv.set_fail_level(config.fail_level);
        let mut ogg = OggExtractor::new();
        ogg.set_fail_level(config.fail_level);
        let mut mp3 = Mp3Extractor::new(config.mp3_flags);
        mp3.set_fail_level(config.fail_level);

        vec![
            ContainerExtractor::Flv(flv),
            ContainerExtractor::Ogg(ogg),
            ContainerExtractor::Wav(WavExtractor::new()),
            ContainerExtractor::RawCc(RawCcExtractor::new(config.raw_cc_format.clone())),
            ContainerExtractor::Mp3(mp3),
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ContainerExtractor::Flv(_) => "FLV",
            ContainerExtractor::Ogg(_) => "Ogg",
            ContainerExtractor::Wav(_) => "WAV",
            ContainerExtractor::RawCc(_) => "RawCC",
            ContainerExtractor::Mp3(_) => "MP3",
        }
    }

    fn inner(&mut self) -> &mut dyn Extractor {
        match self {
            ContainerExtractor::Flv(e) => e,
            ContainerExtractor::Ogg(e) => e,
            ContainerExtractor::Wav(e) => e,
            ContainerExtractor::RawCc(e) => e,
            ContainerExtractor::Mp3(e) => e,
        }
    }
}

impl Extractor for ContainerExtractor {
    fn sniff(&mut self, input: &mut dyn ExtractorInput) -> Result<bool> {
        input.reset_peek_position();
        let result = self.inner().sniff(input);
        input.reset_peek_position();
        result
    }

    fn init(&mut self, output: &mut dyn ExtractorOutput) -> Result<()> {
        self.inner().init(output)
    }

    fn read(
        &mut self,
        input: &mut dyn ExtractorInput,
        output: &mut dyn ExtractorOutput,
    ) -> Result<ReadResult> {
        self.inner().read(input, output)
    }

    fn seek(&mut self, position: u64, time_us: i64) {
        self.inner().seek(position, time_us)
    }

    fn release(&mut self) {
        self.inner().release()
    }
}

/// Returns the first extractor whose sniff matches `input`.
///
/// Sniff errors count as a mismatch. The input's read position is left
/// untouched.
pub fn probe(input: &mut dyn ExtractorInput, config: &ExtractorConfig) -> Result<ContainerExtractor> {
    let candidates = ContainerExtractor::candidates(config);
    let names = candidates
        .iter()
        .map(ContainerExtractor::name)
        .collect::<Vec<_>>()
        .join(", ");

    for mut extractor in candidates {
        match extractor.sniff(input) {
            Ok(true) => {
                log::debug!("Detected {} container", extractor.name());
                return Ok(extractor);
            }
            Ok(false) => log::trace!("{} sniff: no match", extractor.name()),
            Err(e) => log::debug!("{} sniff failed: {e}", extractor.name()),
        }
    }

    Err(ProbeError::UnrecognizedFormat(names).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::tests::input_for;

    #[test]
    fn probe_picks_container_by_signature() -> Result<()> {
        let config = ExtractorConfig::default();

        let flv = [
            b'F', b'L', b'V', 1, 0x05, 0, 0, 0, 9, 0, 0, 0, 0,
        ];
        let extractor = probe(&mut input_for(&flv), &config)?;
        assert_eq!(extractor.name(), "FLV");

        let mut wav = b"RIFF\x24\x00\x00\x00WAVE".to_vec();
        wav.extend_from_slice(&[0; 16]);
        let extractor = probe(&mut input_for(&wav), &config)?;
        assert_eq!(extractor.name(), "WAV");

        let rawcc = [0x52, 0x43, 0x43, 0x01, 0, 0, 0, 0];
        let extractor = probe(&mut input_for(&rawcc), &config)?;
        assert_eq!(extractor.name(), "RawCC");
        Ok(())
    }

    #[test]
    fn probe_reports_every_candidate() {
        let mut input = input_for(&[0x42; 64]);
        let err = probe(&mut input, &ExtractorConfig::default()).unwrap_err();
        assert_eq!(input.position(), 0);
        assert!(matches!(
            err.downcast_ref::<ProbeError>(),
            Some(ProbeError::UnrecognizedFormat(names)) if names == "FLV, Ogg, WAV, RawCC, MP3"
        ));
    }
}
