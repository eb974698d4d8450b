#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! ### Extraction
//!
//! An [`extractor::Extractor`] turns container bytes into samples:
//!
//! - **Sniffing**: `sniff` peeks at the start of the input and never consumes it.
//! - **Reading**: `read` does one unit of work and returns
//!   [`extractor::ReadResult::Continue`], a request to reposition the input,
//!   or the end of the input.
//! - **Seeking**: `seek` resets parsing to a byte position and its time,
//!   usually taken from the stream's [`seek::SeekMap`].
//!
//! ### Seek Maps
//!
//! - Unseekable streams
//! - Constant bitrate interpolation
//! - Indexes learnt while reading
//! - ID3 MLLT lookup tables
//! - Chunk tables from container metadata
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::fs::File;
//!
//! use demux::extractor::{ExtractionSession, ExtractorConfig};
//! use demux::output::SampleCollector;
//!
//! let file = File::open("stream.flv")?;
//! let length = file.metadata()?.len();
//! let mut session = ExtractionSession::open(file, Some(length), &ExtractorConfig::default(), SampleCollector::new())?;
//! session.run()?;
//!
//! for track in &session.output().tracks {
//!     println!("track {}: {} samples", track.id, track.samples.len());
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

/// Byte cursor with a resettable peek window.
pub mod input;

/// Track sinks, format descriptors and sample flags.
pub mod output;

/// Seek maps from playback time to byte position.
pub mod seek;

/// Container extractors, the prober and the extraction driver.
///
/// - **FLV** ([`extractor::flv`]): audio, video and script tags
/// - **Ogg** ([`extractor::ogg`]): Opus, Vorbis and FLAC
/// - **MP3** ([`extractor::mp3`]): MPEG audio with ID3v2 and seek metadata
/// - **WAV** ([`extractor::wav`]): RIFF/WAVE
/// - **Raw captions** ([`extractor::rawcc`]): CEA-608 triplets
pub mod extractor;

/// Buffer pools and the caption decode pipeline.
pub mod decoder;

/// Utility functions and supporting infrastructure.
///
/// - **Bitstream I/O** ([`utils::bitstream_io`]): Bit-level reading
/// - **CRC Validation** ([`utils::crc`]): Ogg page checksums
/// - **Codec Configuration** ([`utils::codec`]): AAC and H.264 headers
/// - **Error Handling** ([`utils::errors`]): Error types
pub mod utils;
