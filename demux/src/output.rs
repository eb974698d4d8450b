//! Sinks that receive what the extractors find.
//!
//! An extractor registers tracks on an [`ExtractorOutput`], publishes its seek
//! map there, and writes samples through the [`TrackOutput`] of each track.

use std::fmt::{self, Display};
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use crate::seek::SeekMap;

/// MIME types of the sample formats the extractors produce.
pub mod mime {
    pub const AUDIO_AAC: &str = "audio/mp4a-latm";
    pub const AUDIO_MPEG: &str = "audio/mpeg";
    pub const AUDIO_MPEG_L1: &str = "audio/mpeg-L1";
    pub const AUDIO_MPEG_L2: &str = "audio/mpeg-L2";
    pub const AUDIO_ALAW: &str = "audio/g711-alaw";
    pub const AUDIO_MLAW: &str = "audio/g711-mlaw";
    pub const AUDIO_OPUS: &str = "audio/opus";
    pub const AUDIO_VORBIS: &str = "audio/vorbis";
    pub const AUDIO_FLAC: &str = "audio/flac";
    pub const AUDIO_RAW: &str = "audio/raw";
    pub const VIDEO_H264: &str = "video/avc";
    pub const APPLICATION_CEA608: &str = "application/cea-608";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Audio,
    Video,
    Text,
    Metadata,
}

impl Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
            MediaType::Text => "text",
            MediaType::Metadata => "metadata",
        };
        write!(f, "{name}")
    }
}

/// Sample layout of `audio/raw` tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmEncoding {
    U8,
    S16Le,
    S24Le,
    S32Le,
    F32Le,
    F64Le,
}

impl PcmEncoding {
    pub fn bits_per_sample(self) -> u32 {
        match self {
            PcmEncoding::U8 => 8,
            PcmEncoding::S16Le => 16,
            PcmEncoding::S24Le => 24,
            PcmEncoding::S32Le | PcmEncoding::F32Le => 32,
            PcmEncoding::F64Le => 64,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, PcmEncoding::F32Le | PcmEncoding::F64Le)
    }
}

/// Codec format descriptor of a track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Format {
    pub sample_mime_type: String,
    pub codecs: Option<String>,
    pub average_bitrate: Option<u32>,
    pub peak_bitrate: Option<u32>,
    pub max_input_size: Option<usize>,
    pub initialization_data: Vec<Vec<u8>>,

    pub channel_count: Option<u32>,
    pub sample_rate: Option<u32>,
    pub pcm_encoding: Option<PcmEncoding>,
    pub encoder_delay: u32,
    pub encoder_padding: u32,

    pub width: Option<u32>,
    pub height: Option<u32>,
    pub pixel_width_height_ratio: Option<f32>,
}

impl Format {
    pub fn new(sample_mime_type: &str) -> Self {
        Self {
            sample_mime_type: sample_mime_type.to_string(),
            ..Default::default()
        }
    }
}

/// Bitmask attached to samples and decoder buffers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SampleFlags(u32);

impl SampleFlags {
    pub const NONE: SampleFlags = SampleFlags(0);
    pub const KEY_FRAME: SampleFlags = SampleFlags(1);
    pub const END_OF_STREAM: SampleFlags = SampleFlags(1 << 2);
    pub const ENCRYPTED: SampleFlags = SampleFlags(1 << 30);
    pub const DECODE_ONLY: SampleFlags = SampleFlags(1 << 31);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: SampleFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: SampleFlags) {
        self.0 |= other.0;
    }
}

impl BitOr for SampleFlags {
    type Output = SampleFlags;

    fn bitor(self, rhs: SampleFlags) -> SampleFlags {
        SampleFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for SampleFlags {
    fn bitor_assign(&mut self, rhs: SampleFlags) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoMode {
    Unencrypted,
    AesCtr,
    AesCbc,
}

/// Per-sample encryption side data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoData {
    pub mode: CryptoMode,
    pub key: Vec<u8>,
    pub encrypted_blocks: u32,
    pub clear_blocks: u32,
}

/// Handle returned by [`ExtractorOutput::track`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackHandle(pub usize);

pub trait TrackOutput {
    /// Called once before the first sample, and again only if the format changes.
    fn format(&mut self, format: &Format);

    /// Appends payload bytes of the sample being written.
    fn sample_data(&mut self, data: &[u8]);

    /// Completes a sample made of the `size` bytes that end `offset` bytes
    /// before the end of the data written so far.
    fn sample_metadata(
        &mut self,
        time_us: i64,
        flags: SampleFlags,
        size: usize,
        offset: usize,
        crypto: Option<&CryptoData>,
    );
}

pub trait ExtractorOutput {
    /// Registers a track, or returns the handle of an already registered `id`.
    fn track(&mut self, id: u32, media_type: MediaType) -> TrackHandle;

    fn track_output(&mut self, handle: TrackHandle) -> &mut dyn TrackOutput;

    /// Signals that every track has been registered.
    fn end_tracks(&mut self);

    fn seek_map(&mut self, seek_map: Arc<dyn SeekMap>);
}

/// Discards everything written to it.
#[derive(Debug, Default)]
pub struct DummyTrackOutput;

impl TrackOutput for DummyTrackOutput {
    fn format(&mut self, _format: &Format) {}

    fn sample_data(&mut self, _data: &[u8]) {}

    fn sample_metadata(
        &mut self,
        _time_us: i64,
        _flags: SampleFlags,
        _size: usize,
        _offset: usize,
        _crypto: Option<&CryptoData>,
    ) {
    }
}

/// A completed sample captured by [`SampleCollector`].
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedSample {
    pub time_us: i64,
    pub flags: SampleFlags,
    pub data: Vec<u8>,
    pub crypto: Option<CryptoData>,
}

#[derive(Debug)]
pub struct CollectedTrack {
    pub id: u32,
    pub media_type: MediaType,
    pub format: Option<Format>,
    pub format_changes: usize,
    pub samples: Vec<CollectedSample>,
    pending: Vec<u8>,
}

impl CollectedTrack {
    fn new(id: u32, media_type: MediaType) -> Self {
        Self {
            id,
            media_type,
            format: None,
            format_changes: 0,
            samples: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Payload bytes written but not yet claimed by a sample.
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }
}

impl TrackOutput for CollectedTrack {
    fn format(&mut self, format: &Format) {
        if self.format.as_ref() != Some(format) {
            self.format_changes += 1;
            self.format = Some(format.clone());
        }
    }

    fn sample_data(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    fn sample_metadata(
        &mut self,
        time_us: i64,
        flags: SampleFlags,
        size: usize,
        offset: usize,
        crypto: Option<&CryptoData>,
    ) {
        let end = self.pending.len().saturating_sub(offset);
        let start = end.saturating_sub(size);
        if end - start < size {
            log::warn!(
                "Track {}: sample of {size} bytes claims more than the {} bytes written",
                self.id,
                end - start
            );
        }

        let data = self.pending[start..end].to_vec();
        self.pending.drain(..end);
        self.samples.push(CollectedSample {
            time_us,
            flags,
            data,
            crypto: crypto.cloned(),
        });
    }
}

/// [`ExtractorOutput`] that keeps every track, sample and seek map in memory.
#[derive(Debug, Default)]
pub struct SampleCollector {
    pub tracks: Vec<CollectedTrack>,
    pub end_tracks_calls: usize,
    pub seek_map: Option<Arc<dyn SeekMap>>,
    pub seek_map_updates: usize,
}

impl SampleCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_by_id(&self, id: u32) -> Option<&CollectedTrack> {
        self.tracks.iter().find(|track| track.id == id)
    }

    pub fn tracks_ended(&self) -> bool {
        self.end_tracks_calls > 0
    }

    /// Drops captured samples while keeping tracks and formats, as after a seek.
    pub fn clear_samples(&mut self) {
        for track in &mut self.tracks {
            track.samples.clear();
            track.pending.clear();
        }
    }
}

impl ExtractorOutput for SampleCollector {
    fn track(&mut self, id: u32, media_type: MediaType) -> TrackHandle {
        if let Some(index) = self.tracks.iter().position(|track| track.id == id) {
            return TrackHandle(index);
        }

        self.tracks.push(CollectedTrack::new(id, media_type));
        TrackHandle(self.tracks.len() - 1)
    }

    fn track_output(&mut self, handle: TrackHandle) -> &mut dyn TrackOutput {
        &mut self.tracks[handle.0]
    }

    fn end_tracks(&mut self) {
        self.end_tracks_calls += 1;
    }

    fn seek_map(&mut self, seek_map: Arc<dyn SeekMap>) {
        self.seek_map = Some(seek_map);
        self.seek_map_updates += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_claim_bytes_before_offset() {
        let mut collector = SampleCollector::new();
        let handle = collector.track(3, MediaType::Audio);
        assert_eq!(collector.track(3, MediaType::Audio), handle);

        let track = collector.track_output(handle);
        track.sample_data(&[1, 2, 3]);
        track.sample_data(&[4, 5]);
        track.sample_metadata(10, SampleFlags::KEY_FRAME, 4, 1, None);

        let track = &collector.tracks[handle.0];
        assert_eq!(track.samples[0].data, vec![1, 2, 3, 4]);
        assert_eq!(track.pending_bytes(), 1);
    }

    #[test]
    fn flags_combine() {
        let flags = SampleFlags::KEY_FRAME | SampleFlags::END_OF_STREAM;
        assert!(flags.contains(SampleFlags::KEY_FRAME));
        assert!(!flags.contains(SampleFlags::DECODE_ONLY));
        assert_eq!(flags.bits(), 5);
    }
}
